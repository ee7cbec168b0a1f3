//! The incremental build state machine.
//!
//! Chunks are generated one at a time, executed out-of-process by the
//! caller, and reported back here. The machine owns all session state and
//! exposes the decision points: what to generate next, whether a failed
//! chunk deserves another attempt, and when the build is done.

use serde::Serialize;
use tracing::{info, warn};

use crate::ai::provider::TokenUsage;
use crate::builder::analyze::WorkbookSnapshot;
use crate::builder::chunk::{CodeChunk, ExecutionStatus, MAX_CHUNK_RETRIES};
use crate::builder::classify::{analyze_code_complexity, determine_chunk_type, estimate_operations};
use crate::builder::generator::{ChunkGenerator, GenerateRequest};
use crate::builder::prompts;
use crate::builder::sanitize::sanitize_code;
use crate::builder::session::{ModelBuildState, SessionStore, SessionSummary};
use crate::builder::stages::{determine_build_stage, next_stage_description, stage_count, table_for};
use crate::error::AppError;

// Build completion ceilings, independent of the per-kind stage tables.
const COMPLETION_CEILING: usize = 25;
const TOTAL_CHUNK_CEILING: usize = 50;
const FAILURE_CEILING: usize = 15;

/// Point-in-time snapshot of a session, shaped for status responses.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub session_id: String,
    pub model_kind: String,
    pub stage: u32,
    pub stage_count: u32,
    pub stage_goal: String,
    pub progress_percentage: f64,
    pub success_rate: f64,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub failed_chunks: usize,
    pub current_chunk_id: Option<String>,
    pub recent_history: Vec<String>,
    pub error_patterns: Vec<String>,
    pub elapsed_seconds: f64,
    pub token_usage: TokenUsage,
    pub complete: bool,
}

/// History entries shown in a progress report.
const HISTORY_WINDOW: usize = 10;

pub struct IncrementalBuilder {
    store: SessionStore,
}

impl Default for IncrementalBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalBuilder {
    pub fn new() -> Self {
        Self {
            store: SessionStore::new(),
        }
    }

    /// Start a session. An existing session under the same id is replaced
    /// wholesale; stale state must never leak into a fresh build.
    pub async fn start_build(
        &self,
        session_id: &str,
        model_kind: &str,
        initial_request: &str,
        workbook_context: WorkbookSnapshot,
    ) -> ProgressReport {
        let state = ModelBuildState::new(
            session_id.to_string(),
            normalize_model_kind(model_kind),
            initial_request.to_string(),
            workbook_context,
        );
        let report = report_for(&state);
        let (_, replaced) = self.store.create(state).await;
        if replaced {
            warn!(session_id, "replaced existing build session");
        }
        info!(session_id, model_kind = %report.model_kind, "build session started");
        report
    }

    /// Generate the next chunk for a session. On provider failure the build
    /// degrades to a deterministic placeholder chunk rather than stalling.
    pub async fn generate_next_chunk(
        &self,
        session_id: &str,
        generator: &dyn ChunkGenerator,
        current_context: Option<WorkbookSnapshot>,
    ) -> Result<CodeChunk, AppError> {
        let handle = self
            .store
            .get(session_id)
            .await
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        let mut state = handle.lock().await;

        if let Some(context) = current_context {
            state.workbook_context = context;
        }

        let chunk_id = state.next_chunk_id();
        let stage = state.total_chunks() as u32;
        let request = GenerateRequest {
            session_id: session_id.to_string(),
            model_kind: state.model_kind.clone(),
            build_context: prompts::build_chunk_context(&state),
            previous_errors: prompts::recent_errors(&state),
        };

        let generated = match generator.generate(&request).await {
            Ok(generated) => generated,
            Err(err) => {
                warn!(session_id, %chunk_id, error = %err, "generation failed, using fallback chunk");
                fallback_chunk(state.total_chunks() + 1)
            }
        };

        let code = sanitize_code(&generated.code);
        let chunk = CodeChunk {
            id: chunk_id.clone(),
            chunk_type: determine_chunk_type(&code, stage),
            complexity: analyze_code_complexity(&code),
            description: format!("Generated {} for {} model", chunk_id, state.model_kind),
            estimated_operations: estimate_operations(&code),
            code,
            stage,
            status: ExecutionStatus::Pending,
            execution_attempts: 0,
            max_retries: MAX_CHUNK_RETRIES,
            error_history: Vec::new(),
            execution_time: None,
            token_usage: generated.token_usage,
            created_at: chrono::Utc::now(),
        };

        state.chunks.insert(chunk_id.clone(), chunk.clone());
        state.current_chunk_id = Some(chunk_id);
        Ok(chunk)
    }

    /// Record the outcome of executing a chunk. Returns false for an unknown
    /// session or chunk, and for a chunk that already completed (completion
    /// is terminal, late duplicate reports are ignored).
    pub async fn record_chunk_execution(
        &self,
        session_id: &str,
        chunk_id: &str,
        success: bool,
        error_message: Option<&str>,
        execution_time: Option<f64>,
        new_context: Option<WorkbookSnapshot>,
    ) -> bool {
        let Some(handle) = self.store.get(session_id).await else {
            return false;
        };
        let mut state = handle.lock().await;

        let history_entry;
        {
            let Some(chunk) = state.chunks.get_mut(chunk_id) else {
                return false;
            };
            if chunk.status == ExecutionStatus::Completed {
                warn!(session_id, chunk_id, "ignoring report for completed chunk");
                return false;
            }

            chunk.execution_attempts += 1;
            chunk.execution_time = execution_time;
            if success {
                chunk.status = ExecutionStatus::Completed;
                history_entry = format!("{} completed: {}", chunk_id, chunk.description);
            } else {
                chunk.status = ExecutionStatus::Failed;
                if let Some(message) = error_message {
                    chunk.error_history.push(message.to_string());
                    history_entry = format!("{} failed: {}", chunk_id, message);
                } else {
                    history_entry = format!("{} failed", chunk_id);
                }
            }
        }

        if success {
            if let Some(context) = new_context {
                state.last_successful_context = context.clone();
                state.workbook_context = context;
            }
        } else if let Some(message) = error_message {
            state.error_patterns.push(message.to_string());
        }
        state.execution_history.push(history_entry);
        true
    }

    /// Current status of a chunk, if the session and chunk exist.
    pub async fn chunk_status(
        &self,
        session_id: &str,
        chunk_id: &str,
    ) -> Option<ExecutionStatus> {
        let handle = self.store.get(session_id).await?;
        let state = handle.lock().await;
        state.chunks.get(chunk_id).map(|c| c.status)
    }

    /// Whether a failed chunk still has retry budget.
    pub async fn should_retry_chunk(&self, session_id: &str, chunk_id: &str) -> bool {
        let Some(handle) = self.store.get(session_id).await else {
            return false;
        };
        let state = handle.lock().await;
        state
            .chunks
            .get(chunk_id)
            .map(|c| c.is_retryable())
            .unwrap_or(false)
    }

    /// Move a failed chunk into the retrying state. Returns false when the
    /// chunk is unknown or its retry budget is spent.
    pub async fn prepare_retry(&self, session_id: &str, chunk_id: &str) -> bool {
        let Some(handle) = self.store.get(session_id).await else {
            return false;
        };
        let mut state = handle.lock().await;
        let Some(chunk) = state.chunks.get_mut(chunk_id) else {
            return false;
        };
        if !chunk.is_retryable() {
            return false;
        }
        chunk.status = ExecutionStatus::Retrying;
        true
    }

    /// Hand a failed or retrying chunk back out for another attempt.
    /// Returns the chunk marked in-progress, or None if it is unknown or
    /// out of retry budget.
    pub async fn take_retry_chunk(&self, session_id: &str, chunk_id: &str) -> Option<CodeChunk> {
        let handle = self.store.get(session_id).await?;
        let mut state = handle.lock().await;
        let current = chunk_id.to_string();
        let chunk = state.chunks.get_mut(chunk_id)?;
        let eligible = matches!(
            chunk.status,
            ExecutionStatus::Failed | ExecutionStatus::Retrying
        ) && chunk.execution_attempts < chunk.max_retries;
        if !eligible {
            return None;
        }
        chunk.status = ExecutionStatus::InProgress;
        let chunk = chunk.clone();
        state.current_chunk_id = Some(current);
        Some(chunk)
    }

    /// Completion check: any one condition ends the build.
    pub async fn is_build_complete(&self, session_id: &str) -> bool {
        let Some(handle) = self.store.get(session_id).await else {
            return false;
        };
        let state = handle.lock().await;
        build_complete(&state)
    }

    pub async fn get_build_progress(&self, session_id: &str) -> Option<ProgressReport> {
        let handle = self.store.get(session_id).await?;
        let state = handle.lock().await;
        Some(report_for(&state))
    }

    /// Drop a session. Returns false if it did not exist.
    pub async fn cleanup_session(&self, session_id: &str) -> bool {
        let removed = self.store.remove(session_id).await;
        if removed {
            info!(session_id, "build session removed");
        }
        removed
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        self.store.summaries().await
    }
}

/// Canonical model-kind spelling: lowercase, underscores. Unknown kinds fall
/// through to the generic stage table downstream.
fn normalize_model_kind(model_kind: &str) -> String {
    let kind = model_kind.trim().to_lowercase().replace('-', "_");
    if kind.is_empty() {
        "generic".to_string()
    } else {
        kind
    }
}

fn build_complete(state: &ModelBuildState) -> bool {
    let completed = state.completed_chunks();
    if completed >= COMPLETION_CEILING {
        info!(session_id = %state.session_id, completed, "build complete: chunk ceiling");
        return true;
    }
    let table = table_for(&state.model_kind);
    let stage = determine_build_stage(completed as u32, &state.model_kind);
    if stage >= table.terminal_stage && completed >= table.min_completed as usize {
        info!(session_id = %state.session_id, stage, completed, "build complete: terminal stage");
        return true;
    }
    if state.total_chunks() > TOTAL_CHUNK_CEILING {
        warn!(session_id = %state.session_id, total = state.total_chunks(), "build complete: total chunk ceiling");
        return true;
    }
    if state.failed_chunks() > FAILURE_CEILING {
        warn!(session_id = %state.session_id, failed = state.failed_chunks(), "build complete: failure ceiling");
        return true;
    }
    false
}

fn report_for(state: &ModelBuildState) -> ProgressReport {
    let completed = state.completed_chunks() as u32;
    let stage = determine_build_stage(completed, &state.model_kind);
    let history_start = state
        .execution_history
        .len()
        .saturating_sub(HISTORY_WINDOW);
    ProgressReport {
        session_id: state.session_id.clone(),
        model_kind: state.model_kind.clone(),
        stage,
        stage_count: stage_count(&state.model_kind),
        stage_goal: next_stage_description(stage, &state.model_kind).to_string(),
        progress_percentage: state.progress_percentage(),
        success_rate: state.success_rate(),
        total_chunks: state.total_chunks(),
        completed_chunks: state.completed_chunks(),
        failed_chunks: state.failed_chunks(),
        current_chunk_id: state.current_chunk_id.clone(),
        recent_history: state.execution_history[history_start..].to_vec(),
        error_patterns: state.unique_error_patterns(),
        elapsed_seconds: state.elapsed_seconds(),
        token_usage: state.cumulative_token_usage(),
        complete: build_complete(state),
    }
}

/// Deterministic placeholder emitted when the provider is unavailable. Writes
/// a single labeled cell so the build can keep moving.
fn fallback_chunk(step: usize) -> crate::builder::generator::GeneratedChunk {
    crate::builder::generator::GeneratedChunk {
        code: format!(
            "await Excel.run(async (context) => {{\n    \
             const sheet = context.workbook.worksheets.getActiveWorksheet();\n    \
             sheet.getRange(\"A{row}\").values = [[\"Step {row}\"]];\n    \
             await context.sync();\n}});",
            row = step
        ),
        token_usage: None,
    }
}
