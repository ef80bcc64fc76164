use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::Semaphore;

use crate::client::AnalysisBackend;
use crate::error::ClientError;
use crate::model::{AnalysisResult, PdfUpload, ScoredSentence};

pub(crate) fn analysis(sentences: &[(&str, f64)]) -> AnalysisResult {
    AnalysisResult {
        grade_level: Some(10.0),
        reading_time_minutes: Some(1.0),
        total_sentences: Some(sentences.len() as u64),
        average_risk_score: None,
        all_sentences: sentences
            .iter()
            .map(|(s, score)| ScoredSentence::new(*s, *score))
            .collect(),
        top_risk_sentences: Vec::new(),
    }
}

/// In-memory backend with scripted replies. A gated backend parks every call until
/// the test hands out permits with [`release`](Self::release).
pub(crate) struct ScriptedBackend {
    base_url: String,
    gate: Option<Semaphore>,
    analyses: Mutex<VecDeque<Result<AnalysisResult, ClientError>>>,
    rewrites: Mutex<HashMap<String, VecDeque<Result<String, ClientError>>>>,
    analyzed_files: Mutex<Vec<String>>,
    rewrite_modes: Mutex<Vec<String>>,
    analyze_calls: AtomicUsize,
    rewrite_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::build("scripted://backend", None))
    }

    pub(crate) fn gated() -> Arc<Self> {
        Arc::new(Self::build("scripted://backend", Some(Semaphore::new(0))))
    }

    pub(crate) fn with_base_url(base_url: &str) -> Arc<Self> {
        Arc::new(Self::build(base_url, None))
    }

    fn build(base_url: &str, gate: Option<Semaphore>) -> Self {
        Self {
            base_url: base_url.to_string(),
            gate,
            analyses: Mutex::new(VecDeque::new()),
            rewrites: Mutex::new(HashMap::new()),
            analyzed_files: Mutex::new(Vec::new()),
            rewrite_modes: Mutex::new(Vec::new()),
            analyze_calls: AtomicUsize::new(0),
            rewrite_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn script_analysis(&self, reply: Result<AnalysisResult, ClientError>) {
        self.analyses.lock().unwrap().push_back(reply);
    }

    pub(crate) fn script_rewrite(&self, sentence: &str, reply: Result<String, ClientError>) {
        self.rewrites
            .lock()
            .unwrap()
            .entry(sentence.to_string())
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub(crate) fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn rewrite_calls(&self) -> usize {
        self.rewrite_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn analyzed_files(&self) -> Vec<String> {
        self.analyzed_files.lock().unwrap().clone()
    }

    pub(crate) fn rewrite_modes(&self) -> Vec<String> {
        self.rewrite_modes.lock().unwrap().clone()
    }

    pub(crate) async fn wait_for_analyze_calls(&self, n: usize) {
        while self.analyze_calls() < n {
            tokio::task::yield_now().await;
        }
    }

    pub(crate) async fn wait_for_rewrite_calls(&self, n: usize) {
        while self.rewrite_calls() < n {
            tokio::task::yield_now().await;
        }
    }

    async fn pass_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
    }
}

#[async_trait]
impl AnalysisBackend for ScriptedBackend {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn analyze(&self, upload: &PdfUpload) -> Result<AnalysisResult, ClientError> {
        self.analyzed_files
            .lock()
            .unwrap()
            .push(upload.file_name().to_string());
        let reply = self.analyses.lock().unwrap().pop_front();
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        reply.unwrap_or_else(|| {
            Err(ClientError::Http {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "no scripted analysis".to_string(),
            })
        })
    }

    async fn rewrite(&self, sentence: &str, mode: &str) -> Result<String, ClientError> {
        self.rewrite_modes.lock().unwrap().push(mode.to_string());
        let reply = self
            .rewrites
            .lock()
            .unwrap()
            .get_mut(sentence)
            .and_then(VecDeque::pop_front);
        self.rewrite_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        reply.unwrap_or_else(|| Ok(format!("Plain: {sentence}")))
    }
}
