use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;

use crate::gateway::{Gateway, RetryPolicy};
use crate::genai::{GenAiClient, GenAiConfig};
use crate::store::memory::{DEFAULT_MAX_DOCUMENT_BYTES, StoreOptions};

pub const DEFAULT_APP_ID: &str = "cryptid-creators-default";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub genai: GenAiConfig,
    pub retry: RetryPolicy,
    pub app_id: String,
    /// Admin routes are disabled when unset.
    pub admin_secret: Option<String>,
    pub max_document_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            genai: GenAiConfig::default(),
            retry: RetryPolicy::default(),
            app_id: DEFAULT_APP_ID.to_string(),
            admin_secret: None,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();
        config.api_key = text("GEMINI_API_KEY");

        if let Some(raw) = text("CRYPTID_GENAI_BASE_URL") {
            config.genai.base_url = parse_base_url(&raw)
                .with_context(|| format!("invalid CRYPTID_GENAI_BASE_URL={raw:?}"))?;
        }
        if let Some(model) = text("CRYPTID_TEXT_MODEL") {
            config.genai.text_model = model;
        }
        if let Some(model) = text("CRYPTID_IMAGE_MODEL") {
            config.genai.image_model = model;
        }
        if let Some(raw) = text("CRYPTID_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse_max_attempts(&raw)
                .with_context(|| format!("invalid CRYPTID_MAX_ATTEMPTS={raw:?}"))?;
        }
        if let Some(raw) = text("CRYPTID_MAX_BACKOFF_MS") {
            config.retry.max_delay = parse_max_backoff(&raw)
                .with_context(|| format!("invalid CRYPTID_MAX_BACKOFF_MS={raw:?}"))?;
        }
        if let Some(app_id) = text("CRYPTID_APP_ID") {
            config.app_id = app_id;
        }
        config.admin_secret = text("CRYPTID_ADMIN_SECRET");
        if let Some(raw) = text("CRYPTID_MAX_DOCUMENT_BYTES") {
            config.max_document_bytes = raw
                .parse::<usize>()
                .ok()
                .filter(|v| *v > 0)
                .with_context(|| format!("invalid CRYPTID_MAX_DOCUMENT_BYTES={raw:?}"))?;
        }

        Ok(config)
    }

    pub fn gateway(&self) -> anyhow::Result<Gateway> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("build http client")?;
        Ok(Gateway::new(client, self.api_key.clone(), self.retry))
    }

    pub fn genai_client(&self) -> anyhow::Result<GenAiClient> {
        Ok(GenAiClient::new(self.gateway()?, self.genai.clone()))
    }

    pub fn store_options(&self, persist_dir: Option<PathBuf>) -> StoreOptions {
        StoreOptions {
            app_id: self.app_id.clone(),
            max_document_bytes: self.max_document_bytes,
            persist_dir,
        }
    }
}

pub fn parse_base_url(raw: &str) -> anyhow::Result<String> {
    let url = url::Url::parse(raw.trim()).context("parse url")?;
    match url.scheme() {
        "http" | "https" => Ok(url.as_str().trim_end_matches('/').to_string()),
        other => anyhow::bail!("unsupported url scheme: {other}"),
    }
}

pub fn parse_max_attempts(raw: &str) -> anyhow::Result<u32> {
    let attempts: u32 = raw.trim().parse().context("parse number")?;
    if attempts == 0 {
        anyhow::bail!("max attempts must be >= 1");
    }
    Ok(attempts)
}

/// `0` disables the cap.
pub fn parse_max_backoff(raw: &str) -> anyhow::Result<Option<Duration>> {
    let millis: u64 = raw.trim().parse().context("parse number")?;
    Ok((millis > 0).then(|| Duration::from_millis(millis)))
}
