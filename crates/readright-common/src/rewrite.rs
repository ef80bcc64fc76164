//! Per-sentence rewrite state and the coordinator that drives `/rewrite` calls.
//!
//! Entries are keyed by the literal sentence text, so two sentences with identical
//! text share one entry and one in-flight request.
//!
//! State machine per key:
//! - `Idle | Error -> Loading` when a rewrite is requested
//! - `Loading -> Success` on a 2xx response
//! - `Loading -> Error` on a non-2xx response or transport failure
//!
//! `Loading` suppresses further requests, as does `Success` with non-empty output.
//! The transition into `Loading` happens under the session lock before the call is
//! issued.
use std::collections::HashMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::session::SessionCore;

pub const DEFAULT_REWRITE_MODE: &str = "plain_english";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, JsonSchema)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum RewriteState {
    #[default]
    Idle,
    Loading,
    Error(String),
    Success(String),
}

impl RewriteState {
    fn accepts_request(&self) -> bool {
        match self {
            RewriteState::Idle | RewriteState::Error(_) => true,
            RewriteState::Loading => false,
            RewriteState::Success(output) => output.is_empty(),
        }
    }
}

/// What a call to [`RewriteCoordinator::request_rewrite`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RewriteDispatch {
    /// A request was sent and its outcome recorded.
    Completed,
    /// Another request for the same text is already in flight.
    InFlight,
    /// A successful rewrite is already cached.
    Cached,
    /// A request was sent but the session was reset before it resolved.
    Stale,
    /// Blank sentence text; nothing was sent.
    Blank,
}

/// Proof that a key entered `Loading` under a given cache epoch.
#[derive(Debug)]
pub struct RewriteTicket {
    key: String,
    epoch: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RewriteCache {
    entries: HashMap<String, RewriteState>,
    epoch: u64,
}

impl RewriteCache {
    pub fn entry(&self, sentence: &str) -> RewriteState {
        self.entries.get(sentence).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RewriteState)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Moves `sentence` into `Loading` if its current state allows a request.
    pub fn begin(&mut self, sentence: &str) -> Result<RewriteTicket, RewriteDispatch> {
        let current = self.entries.get(sentence);
        match current {
            Some(RewriteState::Loading) => return Err(RewriteDispatch::InFlight),
            Some(state) if !state.accepts_request() => return Err(RewriteDispatch::Cached),
            _ => {}
        }
        self.entries.insert(sentence.to_string(), RewriteState::Loading);
        Ok(RewriteTicket {
            key: sentence.to_string(),
            epoch: self.epoch,
        })
    }

    /// Applies the outcome of a request. Returns `false` when the ticket predates
    /// the last [`clear`](Self::clear) and the outcome was dropped.
    pub fn finish(&mut self, ticket: RewriteTicket, outcome: Result<String, String>) -> bool {
        if ticket.epoch != self.epoch {
            return false;
        }
        let state = match outcome {
            Ok(output) => RewriteState::Success(output),
            Err(message) => RewriteState::Error(message),
        };
        self.entries.insert(ticket.key, state);
        true
    }

    /// Drops every entry. Outstanding tickets become stale.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.epoch = self.epoch.wrapping_add(1);
    }
}

#[derive(Clone)]
pub struct RewriteCoordinator {
    core: Arc<Mutex<SessionCore>>,
}

impl RewriteCoordinator {
    pub(crate) fn new(core: Arc<Mutex<SessionCore>>) -> Self {
        Self { core }
    }

    pub async fn entry(&self, sentence: &str) -> RewriteState {
        self.core.lock().await.session.rewrites().entry(sentence)
    }

    pub async fn request_rewrite(&self, sentence: &str, mode: &str) -> RewriteDispatch {
        if sentence.trim().is_empty() {
            return RewriteDispatch::Blank;
        }

        let (ticket, backend) = {
            let mut core = self.core.lock().await;
            match core.session.rewrites_mut().begin(sentence) {
                Ok(ticket) => (ticket, Arc::clone(&core.backend)),
                Err(dispatch) => {
                    debug!(?dispatch, sentence_len = sentence.len(), "rewrite suppressed");
                    return dispatch;
                }
            }
        };
        let epoch = ticket.epoch;

        let outcome = backend.rewrite(sentence, mode).await.map_err(|e| {
            warn!(error = %e, sentence_len = sentence.len(), "rewrite failed");
            format!("rewrite failed: {e}")
        });

        let mut core = self.core.lock().await;
        if core.session.rewrites_mut().finish(ticket, outcome) {
            info!(sentence_len = sentence.len(), epoch, "rewrite resolved");
            RewriteDispatch::Completed
        } else {
            warn!(epoch, "discarding rewrite for a previous session");
            RewriteDispatch::Stale
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::future;
    use reqwest::StatusCode;

    use super::*;
    use crate::error::ClientError;
    use crate::model::EMPTY_REWRITE_PLACEHOLDER;
    use crate::session::SessionManager;
    use crate::test_support::ScriptedBackend;

    #[test]
    fn cache_transitions() {
        let mut cache = RewriteCache::default();
        assert_eq!(cache.entry("B"), RewriteState::Idle);

        let ticket = cache.begin("B").unwrap();
        assert_eq!(cache.entry("B"), RewriteState::Loading);
        assert!(matches!(cache.begin("B"), Err(RewriteDispatch::InFlight)));

        assert!(cache.finish(ticket, Err("rewrite failed: HTTP 502".to_string())));
        assert_eq!(
            cache.entry("B"),
            RewriteState::Error("rewrite failed: HTTP 502".to_string())
        );

        let retry = cache.begin("B").unwrap();
        assert_eq!(cache.entry("B"), RewriteState::Loading);
        assert!(cache.finish(retry, Ok("Simpler B.".to_string())));
        assert!(matches!(cache.begin("B"), Err(RewriteDispatch::Cached)));
    }

    #[test]
    fn empty_success_can_be_requested_again() {
        let mut cache = RewriteCache::default();
        let ticket = cache.begin("B").unwrap();
        assert!(cache.finish(ticket, Ok(String::new())));
        assert_eq!(cache.entry("B"), RewriteState::Success(String::new()));

        assert!(cache.begin("B").is_ok());
        assert_eq!(cache.entry("B"), RewriteState::Loading);
    }

    #[test]
    fn tickets_from_before_a_clear_are_dropped() {
        let mut cache = RewriteCache::default();
        let ticket = cache.begin("B").unwrap();
        cache.clear();
        assert!(!cache.finish(ticket, Ok("late".to_string())));
        assert_eq!(cache.entry("B"), RewriteState::Idle);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn success_is_cached_and_never_refetched() {
        let backend = ScriptedBackend::new();
        backend.script_rewrite("B", Ok("Simpler B.".to_string()));
        let manager = SessionManager::new(backend.clone());

        let first = manager.request_rewrite("B", DEFAULT_REWRITE_MODE).await;
        assert_eq!(first, RewriteDispatch::Completed);
        assert_eq!(
            manager.rewrite_entry("B").await,
            RewriteState::Success("Simpler B.".to_string())
        );

        let second = manager.request_rewrite("B", DEFAULT_REWRITE_MODE).await;
        assert_eq!(second, RewriteDispatch::Cached);
        assert_eq!(backend.rewrite_calls(), 1);
        assert_eq!(
            manager.rewrite_entry("B").await,
            RewriteState::Success("Simpler B.".to_string())
        );
    }

    #[tokio::test]
    async fn concurrent_requests_for_one_sentence_send_once() {
        let backend = ScriptedBackend::gated();
        backend.script_rewrite("B", Ok("Simpler B.".to_string()));
        let manager = SessionManager::new(backend.clone());

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.request_rewrite("B", DEFAULT_REWRITE_MODE).await }
        });
        backend.wait_for_rewrite_calls(1).await;
        assert_eq!(manager.rewrite_entry("B").await, RewriteState::Loading);

        let second = manager.request_rewrite("B", DEFAULT_REWRITE_MODE).await;
        assert_eq!(second, RewriteDispatch::InFlight);

        backend.release(1);
        assert_eq!(first.await.unwrap(), RewriteDispatch::Completed);
        assert_eq!(backend.rewrite_calls(), 1);
    }

    #[tokio::test]
    async fn joined_requests_for_one_sentence_send_once() {
        let backend = ScriptedBackend::gated();
        backend.script_rewrite("B", Ok("Simpler B.".to_string()));
        let manager = SessionManager::new(backend.clone());

        let ((first, second), ()) = future::join(
            future::join(
                manager.request_rewrite("B", DEFAULT_REWRITE_MODE),
                manager.request_rewrite("B", DEFAULT_REWRITE_MODE),
            ),
            async {
                backend.wait_for_rewrite_calls(1).await;
                backend.release(1);
            },
        )
        .await;

        let mut outcomes = vec![first, second];
        outcomes.sort_by_key(|d| format!("{d:?}"));
        assert_eq!(
            outcomes,
            vec![RewriteDispatch::Completed, RewriteDispatch::InFlight]
        );
        assert_eq!(backend.rewrite_calls(), 1);
        assert_eq!(
            manager.rewrite_entry("B").await,
            RewriteState::Success("Simpler B.".to_string())
        );
    }

    #[tokio::test]
    async fn identical_text_shares_one_entry() {
        let backend = ScriptedBackend::new();
        backend.script_rewrite("The lessee shall pay.", Ok("You must pay.".to_string()));
        let manager = SessionManager::new(backend.clone());

        // Same text appearing at two positions in the document.
        let occurrences = ["The lessee shall pay.", "The lessee shall pay."];
        let mut dispatches = Vec::new();
        for sentence in occurrences {
            dispatches.push(manager.request_rewrite(sentence, DEFAULT_REWRITE_MODE).await);
        }
        assert_eq!(
            dispatches,
            vec![RewriteDispatch::Completed, RewriteDispatch::Cached]
        );
        assert_eq!(backend.rewrite_calls(), 1);
        assert_eq!(manager.snapshot().await.session.rewrites().len(), 1);
    }

    #[tokio::test]
    async fn different_sentences_resolve_independently() {
        let backend = ScriptedBackend::gated();
        backend.script_rewrite("A", Ok("Plain A.".to_string()));
        backend.script_rewrite("C", Ok("Plain C.".to_string()));
        let manager = SessionManager::new(backend.clone());

        let a = tokio::spawn({
            let manager = manager.clone();
            async move { manager.request_rewrite("A", DEFAULT_REWRITE_MODE).await }
        });
        let c = tokio::spawn({
            let manager = manager.clone();
            async move { manager.request_rewrite("C", DEFAULT_REWRITE_MODE).await }
        });
        backend.wait_for_rewrite_calls(2).await;
        assert_eq!(manager.rewrite_entry("A").await, RewriteState::Loading);
        assert_eq!(manager.rewrite_entry("C").await, RewriteState::Loading);

        backend.release(2);
        assert_eq!(a.await.unwrap(), RewriteDispatch::Completed);
        assert_eq!(c.await.unwrap(), RewriteDispatch::Completed);
        assert_eq!(
            manager.rewrite_entry("A").await,
            RewriteState::Success("Plain A.".to_string())
        );
        assert_eq!(
            manager.rewrite_entry("C").await,
            RewriteState::Success("Plain C.".to_string())
        );
    }

    #[tokio::test]
    async fn failures_stay_scoped_to_their_sentence_and_can_be_retried() {
        let backend = ScriptedBackend::new();
        backend.script_rewrite(
            "B",
            Err(ClientError::Http {
                status: StatusCode::BAD_GATEWAY,
                body: "model offline".to_string(),
            }),
        );
        backend.script_rewrite("B", Ok("Simpler B.".to_string()));
        backend.script_rewrite("C", Ok("Simpler C.".to_string()));
        let manager = SessionManager::new(backend.clone());

        manager.request_rewrite("C", DEFAULT_REWRITE_MODE).await;
        manager.request_rewrite("B", DEFAULT_REWRITE_MODE).await;

        let RewriteState::Error(message) = manager.rewrite_entry("B").await else {
            panic!("expected error entry");
        };
        assert!(message.contains("502"));
        assert!(message.contains("model offline"));
        assert_eq!(
            manager.rewrite_entry("C").await,
            RewriteState::Success("Simpler C.".to_string())
        );
        assert_eq!(manager.error().await, None);

        let retry = manager.request_rewrite("B", DEFAULT_REWRITE_MODE).await;
        assert_eq!(retry, RewriteDispatch::Completed);
        assert_eq!(
            manager.rewrite_entry("B").await,
            RewriteState::Success("Simpler B.".to_string())
        );
        assert_eq!(backend.rewrite_calls(), 3);
    }

    #[tokio::test]
    async fn unreachable_backend_lands_in_the_entry() {
        let backend = ScriptedBackend::new();
        backend.script_rewrite(
            "B",
            Err(ClientError::Unreachable {
                base_url: "http://localhost:8000".to_string(),
                reason: "connection refused".to_string(),
            }),
        );
        let manager = SessionManager::new(backend.clone());

        manager.request_rewrite("B", DEFAULT_REWRITE_MODE).await;
        assert_eq!(
            manager.rewrite_entry("B").await,
            RewriteState::Error(
                "rewrite failed: could not reach backend at http://localhost:8000".to_string()
            )
        );
    }

    #[tokio::test]
    async fn placeholder_output_counts_as_success() {
        let backend = ScriptedBackend::new();
        backend.script_rewrite("B", Ok(EMPTY_REWRITE_PLACEHOLDER.to_string()));
        let manager = SessionManager::new(backend.clone());

        manager.request_rewrite("B", DEFAULT_REWRITE_MODE).await;
        assert_eq!(
            manager.rewrite_entry("B").await,
            RewriteState::Success(EMPTY_REWRITE_PLACEHOLDER.to_string())
        );
        assert_eq!(
            manager.request_rewrite("B", DEFAULT_REWRITE_MODE).await,
            RewriteDispatch::Cached
        );
    }

    #[tokio::test]
    async fn blank_sentences_are_ignored() {
        let backend = ScriptedBackend::new();
        let manager = SessionManager::new(backend.clone());
        assert_eq!(
            manager.request_rewrite("   ", DEFAULT_REWRITE_MODE).await,
            RewriteDispatch::Blank
        );
        assert_eq!(backend.rewrite_calls(), 0);
    }

    #[tokio::test]
    async fn mode_is_forwarded() {
        let backend = ScriptedBackend::new();
        let manager = SessionManager::new(backend.clone());
        manager.request_rewrite("B", "legal_summary").await;
        assert_eq!(backend.rewrite_modes(), vec!["legal_summary".to_string()]);
    }
}
