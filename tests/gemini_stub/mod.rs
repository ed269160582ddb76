use std::collections::VecDeque;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value;

/// One canned reply. The last one repeats once the script runs out.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

#[allow(dead_code)]
impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }

    pub fn raw(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_owned(),
        }
    }

    pub fn text(text: &str) -> Self {
        Self::json(
            200,
            serde_json::json!({
                "candidates": [{ "content": { "parts": [{ "text": text }] } }]
            }),
        )
    }

    pub fn image(base64: &str) -> Self {
        Self::json(
            200,
            serde_json::json!({ "predictions": [{ "bytesBase64Encoded": base64 }] }),
        )
    }

    pub fn server_error() -> Self {
        Self::json(
            500,
            serde_json::json!({ "error": { "message": "backend overloaded" } }),
        )
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct Recorded {
    pub url: String,
    pub body: Value,
}

pub struct GeminiStub {
    pub base_url: String,
    recorded: Arc<Mutex<Vec<Recorded>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[allow(dead_code)]
impl GeminiStub {
    pub fn spawn(script: Vec<Reply>) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start gemini stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/v1beta");

        let recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&recorded);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            let mut script: VecDeque<Reply> = script.into();
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let url = request.url().to_string();
                if request.method() != &tiny_http::Method::Post || !url.starts_with("/v1beta/models/")
                {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                    continue;
                }

                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }
                let body = serde_json::from_str(&body).unwrap_or(Value::Null);
                sink.lock().expect("lock recorded").push(Recorded { url, body });

                let reply = if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().cloned()
                }
                .unwrap_or_else(|| Reply::raw(404, "no scripted reply"));

                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                let response = tiny_http::Response::from_string(reply.body)
                    .with_status_code(reply.status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            recorded,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn hits(&self) -> usize {
        self.recorded.lock().expect("lock recorded").len()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.recorded.lock().expect("lock recorded").clone()
    }

    /// Config pointing the generative client at this stub.
    pub fn config(&self, max_attempts: u32) -> cryptid::config::AppConfig {
        let base_url = self.base_url.clone();
        cryptid::config::AppConfig::from_lookup(|key| match key {
            "GEMINI_API_KEY" => Some("test-key".to_owned()),
            "CRYPTID_GENAI_BASE_URL" => Some(base_url.clone()),
            "CRYPTID_MAX_ATTEMPTS" => Some(max_attempts.to_string()),
            _ => None,
        })
        .expect("stub config")
    }
}

impl Drop for GeminiStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
