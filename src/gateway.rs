use std::future::Future;
use std::time::Duration;

use anyhow::Context as _;
use serde_json::Value;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// Upper bound for a single backoff wait. `None` lets the delay double
    /// without limit.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: Some(DEFAULT_MAX_DELAY),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }

    /// Wait after failed attempt `attempt` (1-based): `initial * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.initial_delay.saturating_mul(1u32 << exponent);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Runs `op` until it succeeds or `policy.max_attempts` attempts have failed,
/// sleeping between attempts. The error of the last attempt is returned.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> anyhow::Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts => {
                return Err(err.context(format!("giving up after {attempts} attempt(s)")));
            }
            Err(err) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %format!("{err:#}"),
                    "remote call failed; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// POSTs JSON to a generative endpoint with bounded exponential backoff.
/// Holds no per-call state, so clones can be used from any number of tasks.
#[derive(Debug, Clone)]
pub struct Gateway {
    client: reqwest::Client,
    api_key: Option<String>,
    policy: RetryPolicy,
}

impl Gateway {
    pub fn new(client: reqwest::Client, api_key: Option<String>, policy: RetryPolicy) -> Self {
        Self {
            client,
            api_key,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn call(&self, endpoint: &str, payload: &Value) -> anyhow::Result<Value> {
        self.call_with_attempts(endpoint, payload, self.policy.max_attempts)
            .await
    }

    /// A 2xx response whose body is not JSON yields `Value::Null` instead of
    /// an error; callers treat that as an empty result.
    pub async fn call_with_attempts(
        &self,
        endpoint: &str,
        payload: &Value,
        max_attempts: u32,
    ) -> anyhow::Result<Value> {
        let policy = self.policy.with_max_attempts(max_attempts);
        retry_with_backoff(&policy, |attempt| async move {
            self.post_once(endpoint, payload, attempt).await
        })
        .await
    }

    async fn post_once(&self, endpoint: &str, payload: &Value, attempt: u32) -> anyhow::Result<Value> {
        tracing::debug!(endpoint, attempt, "POST generative endpoint");

        let mut request = self.client.post(endpoint).json(payload);
        if let Some(key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            request = request.query(&[("key", key)]);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;

        let status = response.status();
        let raw = response.text().await.context("read response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            anyhow::bail!("generative API error ({status}): {message}");
        }

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::warn!(endpoint, error = %err, "response body is not JSON");
                Ok(Value::Null)
            }
        }
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;

    fn assert_close(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(5),
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn delay_doubles_from_one_second() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(4), Duration::from_millis(8000));
    }

    #[test]
    fn delay_is_capped_when_configured() {
        let capped = RetryPolicy {
            max_delay: Some(Duration::from_secs(5)),
            ..RetryPolicy::default()
        };
        assert_eq!(capped.delay_after(4), Duration::from_secs(5));

        let uncapped = RetryPolicy {
            max_delay: None,
            ..RetryPolicy::default()
        };
        assert_eq!(uncapped.delay_after(10), Duration::from_millis(512_000));
        assert!(uncapped.delay_after(100) > Duration::from_secs(1_000_000));
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_call_makes_exactly_n_attempts() {
        for n in 1..=5u32 {
            let policy = RetryPolicy::default().with_max_attempts(n);
            let started = Instant::now();
            let mut seen = Vec::new();

            let result = retry_with_backoff(&policy, |attempt| {
                seen.push((attempt, started.elapsed()));
                async { Err::<(), _>(anyhow::anyhow!("HTTP 500")) }
            })
            .await;

            let err = result.unwrap_err();
            assert!(format!("{err:#}").contains("HTTP 500"));
            assert_eq!(seen.len(), n as usize);
            assert_eq!(
                seen.iter().map(|(a, _)| *a).collect::<Vec<_>>(),
                (1..=n).collect::<Vec<_>>()
            );

            for (i, pair) in seen.windows(2).enumerate() {
                let gap = pair[1].1 - pair[0].1;
                assert_close(gap, Duration::from_millis(1000 * 2u64.pow(i as u32)));
            }
            let last_attempt_at = seen.last().map(|(_, at)| *at).unwrap();
            assert_close(started.elapsed(), last_attempt_at);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_attempt_k_stops_immediately() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let value = retry_with_backoff(&policy, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    anyhow::bail!("HTTP 503");
                }
                Ok(attempt * 10)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 30);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_close(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::default().with_max_attempts(0);
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(anyhow::anyhow!("nope")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn error_message_is_read_from_api_error_body() {
        assert_eq!(
            parse_error_message(r#"{"error":{"code":429,"message":"quota exhausted"}}"#).as_deref(),
            Some("quota exhausted")
        );
        assert!(parse_error_message("<html>").is_none());
    }
}
