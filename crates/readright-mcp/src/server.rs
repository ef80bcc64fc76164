//! MCP server driving one ReadRight analysis session.
//!
//! Exposes nine tools:
//! - `select_file`: Choose a PDF on disk (hard reset of the session)
//! - `analyze`: Send the chosen PDF to `/analyze`
//! - `session_status`: Status, last error and headline metrics
//! - `set_filters`: Adjust the minimum risk and result count
//! - `get_hotspots`: Ranked, filtered sentences plus the hotspot shortlist
//! - `request_rewrite` / `get_rewrite`: Per-sentence plain-language rewrites
//! - `set_backend_url` / `backend_health`: Point at and probe the backend
use std::path::Path;
use std::sync::Arc;

use rmcp::{
    Json, ServerHandler,
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use readright_common::client::ReadRightClient;
use readright_common::filter::{DerivedView, FilterState};
use readright_common::model::{AnalysisSummary, BackendHealth, PdfUpload};
use readright_common::rewrite::{RewriteDispatch, RewriteState};
use readright_common::session::{SessionManager, SessionSnapshot, SessionStatus, SubmitOutcome};

#[derive(Clone)]
pub struct ReadRightServer {
    sessions: SessionManager,
    client: Arc<RwLock<ReadRightClient>>,
    tool_router: ToolRouter<ReadRightServer>,
}

impl ReadRightServer {
    pub fn new(client: ReadRightClient) -> Self {
        let sessions = SessionManager::new(client.clone().into_backend());
        Self {
            sessions,
            client: Arc::new(RwLock::new(client)),
            tool_router: Self::tool_router(),
        }
    }

    async fn status_response(&self) -> SessionStatusResponse {
        let snapshot = self.sessions.snapshot().await;
        let backend_url = self.sessions.backend_url().await;
        to_status_response(snapshot, backend_url)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SelectFileParams {
    /// Path to a text-based PDF on the local filesystem.
    path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SetFiltersParams {
    /// Minimum risk score to include (evaluated within 0..=999).
    min_risk: Option<f64>,
    /// Maximum number of sentences to list (evaluated within 1..=200).
    top_n: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RequestRewriteParams {
    /// Exact sentence text as returned by get_hotspots.
    sentence: String,
    /// Rewrite mode (default: the server's configured mode, normally "plain_english").
    mode: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GetRewriteParams {
    sentence: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SetBackendUrlParams {
    /// Absolute http(s) URL of the ReadRight backend.
    url: String,
}

#[derive(Debug, Serialize, JsonSchema)]
struct SessionStatusResponse {
    status: SessionStatus,
    error: Option<String>,
    file_name: Option<String>,
    backend_url: String,
    summary: Option<AnalysisSummary>,
    filters: FilterState,
    rewrites_cached: usize,
    rewrites_in_flight: usize,
}

#[derive(Debug, Serialize, JsonSchema)]
struct FiltersResponse {
    requested: FilterState,
    effective_min_risk: f64,
    effective_top_n: usize,
}

#[derive(Debug, Serialize, JsonSchema)]
struct RewriteResponse {
    sentence: String,
    dispatch: RewriteDispatch,
    entry: RewriteState,
}

#[derive(Debug, Serialize, JsonSchema)]
struct RewriteEntryResponse {
    sentence: String,
    entry: RewriteState,
}

#[derive(Debug, Serialize, JsonSchema)]
struct BackendUrlResponse {
    backend_url: String,
}

#[tool_router]
impl ReadRightServer {
    #[tool(description = "Choose a PDF from the local filesystem for analysis. Clears any previous analysis, rewrites and error.")]
    async fn select_file(
        &self,
        Parameters(params): Parameters<SelectFileParams>,
    ) -> Result<Json<SessionStatusResponse>, String> {
        let upload = load_pdf(Path::new(params.path.trim())).await?;
        self.sessions.select_file(upload).await;
        Ok(Json(self.status_response().await))
    }

    #[tool(description = "Send the selected PDF to the backend (POST /analyze). On success the filters reset to defaults and cached rewrites are dropped.")]
    async fn analyze(&self) -> Result<Json<SessionStatusResponse>, String> {
        match self.sessions.submit().await {
            SubmitOutcome::Analyzed => Ok(Json(self.status_response().await)),
            SubmitOutcome::Failed => Err(self
                .sessions
                .error()
                .await
                .unwrap_or_else(|| "analysis failed".to_string())),
            SubmitOutcome::Superseded => {
                Err("analysis superseded by a newer file selection or analysis".to_string())
            }
        }
    }

    #[tool(description = "Report the session status, last error, selected file, backend URL and headline metrics (unknown when the backend omitted them).")]
    async fn session_status(&self) -> Result<Json<SessionStatusResponse>, String> {
        Ok(Json(self.status_response().await))
    }

    #[tool(description = "Update the minimum risk score and/or the number of sentences listed. Omitted fields keep their current value.")]
    async fn set_filters(
        &self,
        Parameters(params): Parameters<SetFiltersParams>,
    ) -> Result<Json<FiltersResponse>, String> {
        let filters = self
            .sessions
            .update_filters(|f| {
                if let Some(min_risk) = params.min_risk {
                    f.min_risk = min_risk;
                }
                if let Some(top_n) = params.top_n {
                    f.top_n = top_n;
                }
            })
            .await;
        Ok(Json(FiltersResponse {
            requested: filters,
            effective_min_risk: filters.effective_min_risk(),
            effective_top_n: filters.effective_top_n(),
        }))
    }

    #[tool(description = "List the riskiest sentences of the current analysis, sorted by score and filtered by the current filters, plus the hotspot shortlist.")]
    async fn get_hotspots(&self) -> Result<Json<DerivedView>, String> {
        self.sessions
            .view()
            .await
            .map(Json)
            .ok_or_else(|| "no analysis yet: select a file and run analyze".to_string())
    }

    #[tool(description = "Request a rewrite of one sentence (POST /rewrite). Identical sentence text shares one cached rewrite; cached and in-flight rewrites are not requested again.")]
    async fn request_rewrite(
        &self,
        Parameters(params): Parameters<RequestRewriteParams>,
    ) -> Result<Json<RewriteResponse>, String> {
        if params.sentence.trim().is_empty() {
            return Err("sentence must not be empty".to_string());
        }
        let mode = match params.mode.as_deref().map(str::trim) {
            Some(mode) if !mode.is_empty() => mode.to_string(),
            _ => self.client.read().await.config().rewrite_mode.clone(),
        };
        let dispatch = self.sessions.request_rewrite(&params.sentence, &mode).await;
        let entry = self.sessions.rewrite_entry(&params.sentence).await;
        Ok(Json(RewriteResponse {
            sentence: params.sentence,
            dispatch,
            entry,
        }))
    }

    #[tool(description = "Look up the rewrite state of one sentence: idle, loading, error or success.")]
    async fn get_rewrite(
        &self,
        Parameters(params): Parameters<GetRewriteParams>,
    ) -> Result<Json<RewriteEntryResponse>, String> {
        let entry = self.sessions.rewrite_entry(&params.sentence).await;
        Ok(Json(RewriteEntryResponse {
            sentence: params.sentence,
            entry,
        }))
    }

    #[tool(description = "Point the session at a different ReadRight backend. Trailing slashes are ignored.")]
    async fn set_backend_url(
        &self,
        Parameters(params): Parameters<SetBackendUrlParams>,
    ) -> Result<Json<BackendUrlResponse>, String> {
        let mut client = self.client.write().await;
        let updated = client
            .with_base_url(&params.url)
            .map_err(|e| e.to_string())?;
        self.sessions.set_backend(updated.clone().into_backend()).await;
        *client = updated;
        let backend_url = client.config().base_url.clone();
        info!(backend_url = %backend_url, "backend url updated");
        Ok(Json(BackendUrlResponse { backend_url }))
    }

    #[tool(description = "Probe the backend (GET /health).")]
    async fn backend_health(&self) -> Result<Json<BackendHealth>, String> {
        let client = self.client.read().await.clone();
        client
            .health()
            .await
            .map(Json)
            .map_err(|e| format!("health check failed: {e}"))
    }
}

async fn load_pdf(path: &Path) -> Result<PdfUpload, String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document.pdf".to_string());
    let upload = PdfUpload::new(file_name, bytes);
    if !upload.looks_like_pdf() {
        return Err(format!("{} is not a PDF", path.display()));
    }
    Ok(upload)
}

fn to_status_response(snapshot: SessionSnapshot, backend_url: String) -> SessionStatusResponse {
    let rewrites = snapshot.session.rewrites();
    let rewrites_in_flight = rewrites
        .iter()
        .filter(|(_, state)| matches!(state, RewriteState::Loading))
        .count();
    let rewrites_cached = rewrites
        .iter()
        .filter(|(_, state)| matches!(state, RewriteState::Success(_)))
        .count();
    SessionStatusResponse {
        status: snapshot.status,
        error: snapshot.error,
        file_name: snapshot.file_name,
        backend_url,
        summary: snapshot.session.result().map(|r| r.summary()),
        filters: *snapshot.session.filters(),
        rewrites_cached,
        rewrites_in_flight,
    }
}

#[tool_handler]
impl ServerHandler for ReadRightServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "readright-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "ReadRight reading-risk client. Use select_file with a PDF path, then analyze. \
get_hotspots lists the riskiest sentences under the current filters (set_filters adjusts them). \
request_rewrite asks the backend for a plain-language version of one sentence; get_rewrite reads \
its state. Selecting a new file or a new successful analysis discards earlier results and rewrites."
                    .to_string(),
            ),
        }
    }
}
