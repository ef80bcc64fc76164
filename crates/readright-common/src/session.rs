//! Analysis session state machine.
//!
//! One `SessionManager` owns the chosen file, the overall status, the last error and
//! the current [`Session`] (analysis result, filters and rewrite cache). All of it sits
//! behind a single lock so a new analysis replaces result, filters and rewrites in one
//! step. The lock is never held across a backend call.
//!
//! Status transitions:
//! - `select_file`: any -> `Ready`
//! - `submit`: `Ready | Done | Error` -> `Analyzing` -> `Done | Error`
//!
//! Every `select_file` and `submit` takes a fresh analysis token. An `/analyze`
//! response that resolves after its token was superseded is discarded.
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::client::AnalysisBackend;
use crate::error::ClientError;
use crate::filter::{derive_view, DerivedView, FilterState};
use crate::model::{AnalysisResult, PdfUpload};
use crate::rewrite::{RewriteCache, RewriteCoordinator, RewriteDispatch, RewriteState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No file chosen yet.
    Idle,
    Ready,
    Analyzing,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Analyzed,
    Failed,
    /// The file selection changed (or another submit started) while this one was
    /// in flight; its response was dropped.
    Superseded,
}

/// The state tied to one analyzed document.
#[derive(Debug, Clone, Default)]
pub struct Session {
    result: Option<Arc<AnalysisResult>>,
    filters: FilterState,
    rewrites: RewriteCache,
}

impl Session {
    pub fn result(&self) -> Option<&Arc<AnalysisResult>> {
        self.result.as_ref()
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    pub fn rewrites(&self) -> &RewriteCache {
        &self.rewrites
    }

    pub(crate) fn rewrites_mut(&mut self) -> &mut RewriteCache {
        &mut self.rewrites
    }

    pub fn view(&self) -> Option<DerivedView> {
        self.result
            .as_deref()
            .map(|result| derive_view(result, &self.filters))
    }

    /// Installs a fresh analysis with default filters and an empty rewrite cache.
    fn replace(&mut self, result: AnalysisResult) {
        self.result = Some(Arc::new(result));
        self.filters = FilterState::default();
        self.rewrites.clear();
    }

    fn discard(&mut self) {
        self.result = None;
        self.rewrites.clear();
    }
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub error: Option<String>,
    pub file_name: Option<String>,
    pub session: Session,
}

pub(crate) struct SessionCore {
    pub(crate) backend: Arc<dyn AnalysisBackend>,
    pub(crate) session: Session,
    analysis_token: u64,
    file: Option<PdfUpload>,
    status: SessionStatus,
    error: Option<String>,
}

#[derive(Clone)]
pub struct SessionManager {
    core: Arc<Mutex<SessionCore>>,
    rewrites: RewriteCoordinator,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn AnalysisBackend>) -> Self {
        let core = Arc::new(Mutex::new(SessionCore {
            backend,
            session: Session::default(),
            analysis_token: 0,
            file: None,
            status: SessionStatus::Idle,
            error: None,
        }));
        Self {
            rewrites: RewriteCoordinator::new(Arc::clone(&core)),
            core,
        }
    }

    /// Chooses a new file. Drops the previous result, rewrites and error.
    pub async fn select_file(&self, upload: PdfUpload) {
        let mut core = self.core.lock().await;
        core.analysis_token = core.analysis_token.wrapping_add(1);
        info!(
            file = upload.file_name(),
            bytes = upload.len(),
            "file selected"
        );
        core.file = Some(upload);
        core.status = SessionStatus::Ready;
        core.error = None;
        core.session.discard();
    }

    pub async fn submit(&self) -> SubmitOutcome {
        let (token, upload, backend) = {
            let mut core = self.core.lock().await;
            let Some(upload) = core.file.clone() else {
                warn!("submit without a file");
                core.status = SessionStatus::Error;
                core.error = Some(ClientError::NoFileSelected.to_string());
                return SubmitOutcome::Failed;
            };
            core.analysis_token = core.analysis_token.wrapping_add(1);
            core.status = SessionStatus::Analyzing;
            core.error = None;
            (core.analysis_token, upload, Arc::clone(&core.backend))
        };

        info!(file = upload.file_name(), token, "analysis started");
        let outcome = backend.analyze(&upload).await;

        let mut core = self.core.lock().await;
        if core.analysis_token != token {
            warn!(
                token,
                current = core.analysis_token,
                "discarding stale analysis response"
            );
            return SubmitOutcome::Superseded;
        }

        match outcome {
            Ok(result) => {
                info!(
                    sentences = result.all_sentences.len(),
                    shortlist = result.top_risk_sentences.len(),
                    "analysis complete"
                );
                core.session.replace(result);
                core.status = SessionStatus::Done;
                SubmitOutcome::Analyzed
            }
            Err(e) => {
                warn!(error = %e, "analysis failed");
                core.status = SessionStatus::Error;
                core.error = Some(format!("analysis failed: {e}"));
                SubmitOutcome::Failed
            }
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let core = self.core.lock().await;
        SessionSnapshot {
            status: core.status,
            error: core.error.clone(),
            file_name: core.file.as_ref().map(|f| f.file_name().to_string()),
            session: core.session.clone(),
        }
    }

    pub async fn status(&self) -> SessionStatus {
        self.core.lock().await.status
    }

    pub async fn error(&self) -> Option<String> {
        self.core.lock().await.error.clone()
    }

    pub async fn result(&self) -> Option<Arc<AnalysisResult>> {
        self.core.lock().await.session.result.clone()
    }

    pub async fn filters(&self) -> FilterState {
        self.core.lock().await.session.filters
    }

    /// Read-modify-write on the current filters. Returns the updated value.
    pub async fn update_filters<F>(&self, update: F) -> FilterState
    where
        F: FnOnce(&mut FilterState),
    {
        let mut core = self.core.lock().await;
        update(&mut core.session.filters);
        core.session.filters
    }

    pub async fn view(&self) -> Option<DerivedView> {
        self.core.lock().await.session.view()
    }

    pub async fn request_rewrite(&self, sentence: &str, mode: &str) -> RewriteDispatch {
        self.rewrites.request_rewrite(sentence, mode).await
    }

    pub async fn rewrite_entry(&self, sentence: &str) -> RewriteState {
        self.rewrites.entry(sentence).await
    }

    /// Points subsequent calls at another backend. Calls already in flight finish
    /// against the old one.
    pub async fn set_backend(&self, backend: Arc<dyn AnalysisBackend>) {
        let mut core = self.core.lock().await;
        info!(base_url = backend.base_url(), "backend changed");
        core.backend = backend;
    }

    pub async fn backend_url(&self) -> String {
        self.core.lock().await.backend.base_url().to_string()
    }
}
