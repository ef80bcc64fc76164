//! Errors raised while talking to the ReadRight backend or checking local input.
//!
//! These never escape the session layer as values: `/analyze` failures are stored as
//! the session error message and `/rewrite` failures as the message of one sentence's
//! rewrite entry. Malformed fields inside an otherwise valid response are not errors;
//! they degrade to "unknown" in `crate::model`.
use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no file selected: choose a PDF first")]
    NoFileSelected,

    #[error("HTTP {}{}", .status.as_u16(), body_suffix(.body))]
    Http { status: StatusCode, body: String },

    #[error("could not reach backend at {base_url}")]
    Unreachable { base_url: String, reason: String },

    #[error("invalid response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("failed to build request: {0}")]
    Request(#[source] reqwest::Error),

    #[error("invalid backend url: {0}")]
    InvalidBaseUrl(String),
}

impl ClientError {
    /// Whether a failed call is worth repeating. Only transport failures,
    /// throttling and server-side errors qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Unreachable { .. } => true,
            ClientError::Http { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            ClientError::NoFileSelected
            | ClientError::InvalidJson(_)
            | ClientError::Request(_)
            | ClientError::InvalidBaseUrl(_) => false,
        }
    }
}

fn body_suffix(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        String::new()
    } else {
        format!(": {body}")
    }
}
