use base64::Engine as _;
use serde_json::Value;

use crate::gateway::Gateway;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash-preview-09-2025";
pub const DEFAULT_IMAGE_MODEL: &str = "imagen-4.0-generate-001";

pub const STORYTELLER_INSTRUCTION: &str = "You are Meera, a magical storybook creator.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenAiConfig {
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
}

impl Default for GenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
        }
    }
}

pub fn generate_content_endpoint(base_url: &str, model: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/models/{model}:generateContent")
}

pub fn predict_endpoint(base_url: &str, model: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/models/{model}:predict")
}

/// Text and image generation on top of the retrying [`Gateway`].
///
/// `Ok(None)` means the endpoint answered but the body had nothing usable;
/// `Err` means every attempt failed at the transport or HTTP level.
#[derive(Debug, Clone)]
pub struct GenAiClient {
    gateway: Gateway,
    config: GenAiConfig,
}

impl GenAiClient {
    pub fn new(gateway: Gateway, config: GenAiConfig) -> Self {
        Self { gateway, config }
    }

    pub fn config(&self) -> &GenAiConfig {
        &self.config
    }

    pub async fn generate_text(
        &self,
        prompt: &str,
        instruction: &str,
    ) -> anyhow::Result<Option<String>> {
        let endpoint = generate_content_endpoint(&self.config.base_url, &self.config.text_model);
        let body = text_request_body(prompt, Some(instruction), false);
        tracing::info!(model = %self.config.text_model, "generate text");
        let response = self.gateway.call(&endpoint, &body).await?;
        Ok(extract_text(&response))
    }

    /// Asks the text model for a JSON document and returns its raw text.
    pub async fn generate_json_text(&self, prompt: &str) -> anyhow::Result<Option<String>> {
        let endpoint = generate_content_endpoint(&self.config.base_url, &self.config.text_model);
        let body = text_request_body(prompt, None, true);
        tracing::info!(model = %self.config.text_model, "generate json");
        let response = self.gateway.call(&endpoint, &body).await?;
        Ok(extract_text(&response))
    }

    /// Returns the generated picture as a `data:image/png;base64,` URI.
    pub async fn generate_image(&self, scene: &str) -> anyhow::Result<Option<String>> {
        let endpoint = predict_endpoint(&self.config.base_url, &self.config.image_model);
        let body = image_request_body(scene);
        tracing::info!(model = %self.config.image_model, "generate image");
        let response = self.gateway.call(&endpoint, &body).await?;
        Ok(extract_image_data_uri(&response))
    }
}

pub fn text_request_body(prompt: &str, instruction: Option<&str>, json_mode: bool) -> Value {
    let mut body = serde_json::json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
    });
    if let Some(obj) = body.as_object_mut() {
        if let Some(instruction) = instruction {
            obj.insert(
                "systemInstruction".to_owned(),
                serde_json::json!({ "parts": [{ "text": instruction }] }),
            );
        }
        if json_mode {
            obj.insert(
                "generationConfig".to_owned(),
                serde_json::json!({ "responseMimeType": "application/json" }),
            );
        }
    }
    body
}

pub fn image_request_body(prompt: &str) -> Value {
    serde_json::json!({
        "instances": [{ "prompt": prompt }],
        "parameters": { "sampleCount": 1 },
    })
}

fn extract_text(value: &Value) -> Option<String> {
    let text = value
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)?;
    if text.trim().is_empty() {
        tracing::warn!("generated text is empty");
        return None;
    }
    Some(text.to_owned())
}

fn extract_image_data_uri(value: &Value) -> Option<String> {
    let encoded = value
        .pointer("/predictions/0/bytesBase64Encoded")
        .and_then(Value::as_str)?
        .trim();
    if encoded.is_empty() {
        return None;
    }
    if let Err(err) = base64::engine::general_purpose::STANDARD.decode(encoded) {
        tracing::warn!(error = %err, "generated image is not valid base64");
        return None;
    }
    Some(format!("data:image/png;base64,{encoded}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_join_without_double_slash() {
        assert_eq!(
            generate_content_endpoint("http://127.0.0.1:9/v1beta/", "gemini"),
            "http://127.0.0.1:9/v1beta/models/gemini:generateContent"
        );
        assert_eq!(
            predict_endpoint("http://127.0.0.1:9/v1beta", "imagen"),
            "http://127.0.0.1:9/v1beta/models/imagen:predict"
        );
    }

    #[test]
    fn text_body_carries_instruction_and_json_mode() {
        let body = text_request_body("hello", Some("be kind"), false);
        assert_eq!(
            body.pointer("/contents/0/parts/0/text").and_then(Value::as_str),
            Some("hello")
        );
        assert_eq!(
            body.pointer("/systemInstruction/parts/0/text")
                .and_then(Value::as_str),
            Some("be kind")
        );
        assert!(body.get("generationConfig").is_none());

        let json_body = text_request_body("pages", None, true);
        assert!(json_body.get("systemInstruction").is_none());
        assert_eq!(
            json_body
                .pointer("/generationConfig/responseMimeType")
                .and_then(Value::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn text_extraction_is_soft() {
        let ok = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "Once upon a time" }] } }]
        });
        assert_eq!(extract_text(&ok).as_deref(), Some("Once upon a time"));
        assert!(extract_text(&serde_json::json!({ "candidates": [] })).is_none());
        assert!(extract_text(&Value::Null).is_none());
        let blank = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "   " }] } }]
        });
        assert!(extract_text(&blank).is_none());
    }

    #[test]
    fn image_extraction_builds_data_uri() {
        let ok = serde_json::json!({ "predictions": [{ "bytesBase64Encoded": "aGVsbG8=" }] });
        assert_eq!(
            extract_image_data_uri(&ok).as_deref(),
            Some("data:image/png;base64,aGVsbG8=")
        );
        let bad = serde_json::json!({ "predictions": [{ "bytesBase64Encoded": "***" }] });
        assert!(extract_image_data_uri(&bad).is_none());
        assert!(extract_image_data_uri(&serde_json::json!({})).is_none());
    }
}
