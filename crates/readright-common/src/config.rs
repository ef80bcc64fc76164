use std::time::Duration;

use crate::error::ClientError;
use crate::rewrite::DEFAULT_REWRITE_MODE;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_error_body_bytes: usize,
    pub rewrite_mode: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 0,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(5_000),
            max_error_body_bytes: 8 * 1024,
            rewrite_mode: DEFAULT_REWRITE_MODE.to_string(),
        }
    }
}

impl ClientConfig {
    /// Optional:
    /// - `READRIGHT_BASE_URL` (default: "http://localhost:8000")
    /// - `READRIGHT_TIMEOUT_SECS` (default: 60)
    /// - `READRIGHT_MAX_RETRIES` (default: 0)
    /// - `READRIGHT_RETRY_INITIAL_MS` / `READRIGHT_RETRY_MAX_MS` (default: 200 / 5000)
    /// - `READRIGHT_MAX_ERROR_BODY_BYTES` (default: 8192)
    /// - `READRIGHT_REWRITE_MODE` (default: "plain_english")
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let base_url = lookup("READRIGHT_BASE_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.base_url);

        let timeout = lookup("READRIGHT_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);

        let max_retries = lookup("READRIGHT_MAX_RETRIES")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(defaults.max_retries);

        let initial_backoff = lookup("READRIGHT_RETRY_INITIAL_MS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.initial_backoff);

        let max_backoff = lookup("READRIGHT_RETRY_MAX_MS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_backoff);

        let max_error_body_bytes = lookup("READRIGHT_MAX_ERROR_BODY_BYTES")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_error_body_bytes);

        let rewrite_mode = lookup("READRIGHT_REWRITE_MODE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.rewrite_mode);

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            max_retries,
            initial_backoff,
            max_backoff,
            max_error_body_bytes,
            rewrite_mode,
        }
    }

    /// Returns a copy pointing at a user-supplied backend. The URL must be
    /// absolute http(s); trailing slashes are dropped.
    pub fn with_base_url(&self, raw: &str) -> Result<Self, ClientError> {
        let base_url = normalize_base_url(raw)?;
        Ok(Self {
            base_url,
            ..self.clone()
        })
    }
}

pub fn normalize_base_url(raw: &str) -> Result<String, ClientError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ClientError::InvalidBaseUrl("url must not be empty".to_string()));
    }
    let parsed = reqwest::Url::parse(trimmed)
        .map_err(|e| ClientError::InvalidBaseUrl(format!("{trimmed}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ClientError::InvalidBaseUrl(format!(
            "{trimmed}: scheme must be http or https"
        )));
    }
    Ok(trimmed.to_string())
}
