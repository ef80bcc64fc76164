//! Response shapes for the ReadRight backend.
//!
//! Parsing is lenient: a numeric field that is missing or not a number
//! becomes `None` and renders as "unknown", and sentence entries without text are
//! skipped. Only a body that is not a JSON object fails the whole analysis.
use bytes::Bytes;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ClientError;

pub const UNKNOWN_METRIC: &str = "unknown";
pub const EMPTY_REWRITE_PLACEHOLDER: &str = "(empty rewrite)";

/// Fields checked, in order, for the rewritten text.
const REWRITE_FIELDS: [&str; 3] = ["rewrite", "rewritten", "text"];

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct ScoredSentence {
    pub sentence: String,
    /// Risk score; `None` when the backend sent nothing usable.
    pub score: Option<f64>,
}

impl ScoredSentence {
    pub fn new(sentence: impl Into<String>, score: f64) -> Self {
        Self {
            sentence: sentence.into(),
            score: Some(score),
        }
    }

    /// Score used for ranking and filtering. Unknown ranks as zero.
    pub fn rank_score(&self) -> f64 {
        self.score.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisResult {
    #[serde(default, deserialize_with = "lenient_number")]
    pub grade_level: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub reading_time_minutes: Option<f64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub total_sentences: Option<u64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub average_risk_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_sentences")]
    pub all_sentences: Vec<ScoredSentence>,
    /// Backend shortlist. Empty when the backend omitted it.
    #[serde(default, deserialize_with = "lenient_sentences")]
    pub top_risk_sentences: Vec<ScoredSentence>,
}

impl AnalysisResult {
    pub fn from_json(body: &[u8]) -> Result<Self, ClientError> {
        let value: Value = serde_json::from_slice(body)?;
        if !value.is_object() {
            return Err(ClientError::InvalidJson(
                <serde_json::Error as serde::de::Error>::custom("expected a JSON object"),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn summary(&self) -> AnalysisSummary {
        AnalysisSummary {
            grade_level: format_metric(self.grade_level),
            reading_time_minutes: format_metric(self.reading_time_minutes),
            total_sentences: self
                .total_sentences
                .map(|n| n.to_string())
                .unwrap_or_else(|| UNKNOWN_METRIC.to_string()),
            average_risk_score: format_metric(self.average_risk_score),
        }
    }
}

/// Headline metrics as display strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct AnalysisSummary {
    pub grade_level: String,
    pub reading_time_minutes: String,
    pub total_sentences: String,
    pub average_risk_score: String,
}

pub fn format_metric(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.2}"),
        None => UNKNOWN_METRIC.to_string(),
    }
}

/// A PDF chosen for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfUpload {
    file_name: String,
    bytes: Bytes,
}

impl PdfUpload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Checks the `%PDF-` magic header.
    pub fn looks_like_pdf(&self) -> bool {
        self.bytes.starts_with(b"%PDF-")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RewriteRequest<'a> {
    pub sentence: &'a str,
    pub mode: &'a str,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct BackendHealth {
    pub status: String,
}

/// Pulls the rewritten text out of a `/rewrite` success body, substituting the
/// placeholder when the body carries none.
pub fn extract_rewrite(body: &[u8]) -> String {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return EMPTY_REWRITE_PLACEHOLDER.to_string();
    };
    REWRITE_FIELDS
        .iter()
        .find_map(|field| {
            value
                .get(field)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
        })
        .map(str::to_string)
        .unwrap_or_else(|| EMPTY_REWRITE_PLACEHOLDER.to_string())
}

fn number_from_value(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(number_from_value(&value))
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(number_from_value(&value)
        .filter(|n| *n >= 0.0 && n.fract() == 0.0)
        .map(|n| n as u64))
}

fn lenient_sentences<'de, D>(deserializer: D) -> Result<Vec<ScoredSentence>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .iter()
        .filter_map(|item| {
            let sentence = item.get("sentence")?.as_str()?;
            if sentence.trim().is_empty() {
                return None;
            }
            Some(ScoredSentence {
                sentence: sentence.to_string(),
                score: item.get("score").and_then(number_from_value),
            })
        })
        .collect())
}
