//! Per-build session state and the owned session registry.
//!
//! The registry replaces the original design's module-level mutable map with
//! an explicit store injected into the service. Each session sits behind its
//! own mutex so unrelated builds never contend on a shared lock; the outer
//! map lock is held only for lookup/insert/remove.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::ai::provider::TokenUsage;
use crate::builder::analyze::WorkbookSnapshot;
use crate::builder::chunk::{CodeChunk, ExecutionStatus};

/// All mutable state for one incremental build session.
///
/// Chunk counters are derived from chunk statuses rather than stored, so a
/// duplicate or out-of-order execution report can never skew the bookkeeping.
#[derive(Debug)]
pub struct ModelBuildState {
    pub session_id: String,
    pub model_kind: String,
    pub initial_request: String,
    pub chunks: HashMap<String, CodeChunk>,
    pub current_chunk_id: Option<String>,
    /// Append-only log of human-readable result strings.
    pub execution_history: Vec<String>,
    /// Last-known full document snapshot.
    pub workbook_context: WorkbookSnapshot,
    /// Snapshot after the most recent successful chunk, kept as a recovery checkpoint.
    pub last_successful_context: WorkbookSnapshot,
    /// Raw error strings across all chunks, for cross-chunk learning.
    pub error_patterns: Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl ModelBuildState {
    pub fn new(
        session_id: String,
        model_kind: String,
        initial_request: String,
        workbook_context: WorkbookSnapshot,
    ) -> Self {
        let last_successful_context = workbook_context.clone();
        Self {
            session_id,
            model_kind,
            initial_request,
            chunks: HashMap::new(),
            current_chunk_id: None,
            execution_history: Vec::new(),
            workbook_context,
            last_successful_context,
            error_patterns: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Next monotonic chunk id. Chunks are never removed, so the map size is
    /// also the issue counter.
    pub fn next_chunk_id(&self) -> String {
        format!("chunk_{}", self.chunks.len() + 1)
    }

    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn completed_chunks(&self) -> usize {
        self.chunks
            .values()
            .filter(|c| c.status == ExecutionStatus::Completed)
            .count()
    }

    /// Chunks whose most recent outcome was a failure (including those
    /// queued for retry).
    pub fn failed_chunks(&self) -> usize {
        self.chunks
            .values()
            .filter(|c| {
                matches!(
                    c.status,
                    ExecutionStatus::Failed | ExecutionStatus::Retrying
                )
            })
            .count()
    }

    /// Completed / total, in percent. Zero when nothing has been generated.
    pub fn progress_percentage(&self) -> f64 {
        let total = self.total_chunks();
        if total == 0 {
            return 0.0;
        }
        self.completed_chunks() as f64 / total as f64 * 100.0
    }

    /// Completed / (completed + failed), in percent. Vacuously 100 before
    /// any terminal outcome has been recorded.
    pub fn success_rate(&self) -> f64 {
        let completed = self.completed_chunks();
        let attempts = completed + self.failed_chunks();
        if attempts == 0 {
            return 100.0;
        }
        completed as f64 / attempts as f64 * 100.0
    }

    /// Chunks in id order (the map itself is unordered).
    pub fn chunks_in_order(&self) -> Vec<&CodeChunk> {
        let mut chunks: Vec<&CodeChunk> = self.chunks.values().collect();
        chunks.sort_by_key(|c| {
            c.id.rsplit('_')
                .next()
                .and_then(|n| n.parse::<u32>().ok())
                .unwrap_or(u32::MAX)
        });
        chunks
    }

    /// Error patterns de-duplicated while preserving first-seen order.
    pub fn unique_error_patterns(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for err in &self.error_patterns {
            if !seen.contains(err) {
                seen.push(err.clone());
            }
        }
        seen
    }

    pub fn cumulative_token_usage(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for chunk in self.chunks.values() {
            if let Some(usage) = &chunk.token_usage {
                total.add(usage);
            }
        }
        total
    }

    pub fn elapsed_seconds(&self) -> f64 {
        (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Lightweight listing entry for the sessions overview.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub model_kind: String,
    pub progress_percentage: f64,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub failed_chunks: usize,
    pub started_at: DateTime<Utc>,
}

pub type SessionHandle = Arc<Mutex<ModelBuildState>>;

/// Owned registry of active build sessions, keyed by session id.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, replacing any prior state under the same id.
    /// Returns the handle and whether an existing session was replaced.
    pub async fn create(&self, state: ModelBuildState) -> (SessionHandle, bool) {
        let session_id = state.session_id.clone();
        let handle = Arc::new(Mutex::new(state));
        let replaced = self
            .sessions
            .write()
            .await
            .insert(session_id, handle.clone())
            .is_some();
        (handle, replaced)
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Remove a session. Returns false if it was not present. Removal is
    /// immediate and unconditional; an in-flight generation holding the
    /// session handle simply completes against a detached state.
    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    /// Listing snapshot over every live session, oldest first.
    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            let state = handle.lock().await;
            summaries.push(SessionSummary {
                session_id: state.session_id.clone(),
                model_kind: state.model_kind.clone(),
                progress_percentage: state.progress_percentage(),
                total_chunks: state.total_chunks(),
                completed_chunks: state.completed_chunks(),
                failed_chunks: state.failed_chunks(),
                started_at: state.started_at,
            });
        }
        summaries.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        summaries
    }
}
