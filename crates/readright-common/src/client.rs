use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use tracing::warn;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::model::{extract_rewrite, AnalysisResult, BackendHealth, PdfUpload, RewriteRequest};

/// The two backend calls a session depends on.
///
/// `rewrite` returns the extracted rewrite text, already substituted with the
/// empty-rewrite placeholder when the backend sent nothing usable.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    fn base_url(&self) -> &str;

    async fn analyze(&self, upload: &PdfUpload) -> Result<AnalysisResult, ClientError>;

    async fn rewrite(&self, sentence: &str, mode: &str) -> Result<String, ClientError>;
}

#[derive(Clone)]
pub struct ReadRightClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl ReadRightClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent("readright-mcp")
            .build()
            .map_err(ClientError::Request)?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Same HTTP pool, different backend.
    pub fn with_base_url(&self, raw: &str) -> Result<Self, ClientError> {
        Ok(Self {
            config: self.config.with_base_url(raw)?,
            http: self.http.clone(),
        })
    }

    pub fn into_backend(self) -> Arc<dyn AnalysisBackend> {
        Arc::new(self)
    }

    pub async fn health(&self) -> Result<BackendHealth, ClientError> {
        let url = format!("{}/health", self.config.base_url);
        let resp = self
            .http
            .get(&url)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        let body = self.success_body(resp).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Returns the body of a 2xx response, or the status and capped body text
    /// of anything else.
    async fn success_body(&self, resp: reqwest::Response) -> Result<Bytes, ClientError> {
        let status = resp.status();
        if status.is_success() {
            return resp.bytes().await.map_err(|e| self.unreachable(e));
        }
        let body = read_limited_text(resp, self.config.max_error_body_bytes).await;
        Err(ClientError::Http { status, body })
    }

    fn unreachable(&self, err: reqwest::Error) -> ClientError {
        ClientError::Unreachable {
            base_url: self.config.base_url.clone(),
            reason: err.to_string(),
        }
    }

    async fn request_with_retry<T, Fut, F>(&self, mut f: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ClientError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt > self.config.max_retries || !e.is_transient() {
                        return Err(e);
                    }
                    let delay = backoff_delay(
                        self.config.initial_backoff,
                        self.config.max_backoff,
                        attempt - 1,
                    );
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "backend request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl AnalysisBackend for ReadRightClient {
    fn base_url(&self) -> &str {
        &self.config.base_url
    }

    async fn analyze(&self, upload: &PdfUpload) -> Result<AnalysisResult, ClientError> {
        let url = format!("{}/analyze", self.config.base_url);
        let body = self
            .request_with_retry(|| async {
                let part = Part::bytes(upload.bytes().to_vec())
                    .file_name(upload.file_name().to_string())
                    .mime_str("application/pdf")
                    .map_err(ClientError::Request)?;
                let form = Form::new().part("file", part);
                let resp = self
                    .http
                    .post(&url)
                    .timeout(self.config.timeout)
                    .multipart(form)
                    .send()
                    .await
                    .map_err(|e| self.unreachable(e))?;
                self.success_body(resp).await
            })
            .await?;
        AnalysisResult::from_json(&body)
    }

    async fn rewrite(&self, sentence: &str, mode: &str) -> Result<String, ClientError> {
        let url = format!("{}/rewrite", self.config.base_url);
        let request = RewriteRequest { sentence, mode };
        let body = self
            .request_with_retry(|| async {
                let resp = self
                    .http
                    .post(&url)
                    .timeout(self.config.timeout)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| self.unreachable(e))?;
                self.success_body(resp).await
            })
            .await?;
        Ok(extract_rewrite(&body))
    }
}

fn backoff_delay(initial: Duration, max: Duration, exponent: u32) -> Duration {
    let mult = 1u128.checked_shl(exponent).unwrap_or(u128::MAX);
    let base_ms = initial.as_millis().saturating_mul(mult);
    let capped_ms = std::cmp::min(base_ms, max.as_millis()) as u64;
    let jitter_cap = std::cmp::max(1, capped_ms / 4);
    Duration::from_millis(capped_ms.saturating_add(pseudo_jitter_ms(jitter_cap)))
}

fn pseudo_jitter_ms(max_inclusive: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    (now.subsec_nanos() as u64) % (max_inclusive + 1)
}

async fn read_limited_text(resp: reqwest::Response, max_bytes: usize) -> String {
    match resp.bytes().await {
        Ok(mut b) => {
            if b.len() > max_bytes {
                b.truncate(max_bytes);
            }
            String::from_utf8_lossy(&b).to_string()
        }
        Err(e) => {
            warn!(error = %e, "failed to read backend error body");
            String::new()
        }
    }
}
