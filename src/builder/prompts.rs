//! Prompt assembly for chunk generation.
//!
//! The system prompt carries the execution-environment contract; the per-chunk
//! user message carries session progress, a live document summary, and the
//! recent failure history so the provider can steer around known problems.

use crate::builder::analyze::{placement_guidance, summarize_workbook};
use crate::builder::chunk::ExecutionStatus;
use crate::builder::generator::GenerateRequest;
use crate::builder::session::ModelBuildState;
use crate::builder::stages::{determine_build_stage, next_stage_description, stage_count};

/// Rules the execution runtime enforces. Violations are the dominant cause of
/// chunk failures, so they are stated bluntly and repeated in the user turn
/// when a related error has already occurred.
pub const SYSTEM_PROMPT: &str = "\
You are an expert financial model builder writing Office.js code for Excel.

OUTPUT FORMAT:
- Return ONLY executable JavaScript, no markdown fences, no prose.
- Every chunk is exactly one block: await Excel.run(async (context) => { ... });
- Every chunk ends with await context.sync(); before the closing brace.

STRICT API RULES:
- Each chunk performs ONE focused step (roughly 5-15 operations).
- range.values and range.formulas take a 2D array: [[a, b]], never [a, b].
- The array shape must match the range shape exactly.
- Use context.workbook.worksheets.getActiveWorksheet() unless told otherwise.
- Build on what previous chunks created; never clear or rewrite their output.
- Formulas reference cells by address (for example =B5*C5), not by name.
- No console.log, no comments, no explanation text.";

/// Number of recent completions echoed back to the provider.
const RECENT_COMPLETIONS: usize = 3;
/// Window used to discourage repeating the same kind of chunk.
const RECENT_TYPES: usize = 5;
/// Errors carried into the next request.
const RECENT_ERRORS: usize = 2;

/// Assemble the progress context for the next chunk of a session.
pub fn build_chunk_context(state: &ModelBuildState) -> String {
    let completed = state.completed_chunks() as u32;
    let stage = determine_build_stage(completed, &state.model_kind);
    let stages = stage_count(&state.model_kind);
    let stage_goal = next_stage_description(stage, &state.model_kind);

    let mut out = String::new();
    out.push_str(&format!(
        "Build request: {}\nModel type: {}\n",
        state.initial_request, state.model_kind
    ));
    out.push_str(&format!(
        "Build stage {} of {}: {}\n",
        stage, stages, stage_goal
    ));
    out.push_str(&format!(
        "Progress: {} of {} chunks completed, success rate {:.0}%\n",
        completed,
        state.total_chunks(),
        state.success_rate()
    ));

    let ordered = state.chunks_in_order();

    let recent_done: Vec<&str> = ordered
        .iter()
        .filter(|c| c.status == ExecutionStatus::Completed)
        .rev()
        .take(RECENT_COMPLETIONS)
        .map(|c| c.description.as_str())
        .collect();
    if !recent_done.is_empty() {
        out.push_str("\nRecently completed:\n");
        for desc in recent_done.iter().rev() {
            out.push_str(&format!("- {}\n", desc));
        }
    }

    let mut recent_types: Vec<&str> = ordered
        .iter()
        .rev()
        .take(RECENT_TYPES)
        .map(|c| c.chunk_type.label())
        .collect();
    recent_types.dedup();
    if !recent_types.is_empty() {
        out.push_str(&format!(
            "\nRecent chunk types (avoid repeating): {}\n",
            recent_types.join(", ")
        ));
    }

    out.push_str("\nCURRENT WORKBOOK STATE:\n");
    out.push_str(&summarize_workbook(&state.workbook_context));
    out.push('\n');
    if let Some(sheet) = state.workbook_context.active_sheet() {
        out.push_str(&placement_guidance(sheet));
        out.push('\n');
    }

    let errors = recent_errors(state);
    if !errors.is_empty() {
        out.push_str("\nPREVIOUS ERRORS TO AVOID:\n");
        for err in &errors {
            out.push_str(&format!("- {}\n", err));
        }
    }

    out.push_str(&format!(
        "\nGenerate the next single chunk that advances stage {}: {}",
        stage, stage_goal
    ));
    out
}

/// Most recent distinct error strings, oldest first.
pub fn recent_errors(state: &ModelBuildState) -> Vec<String> {
    let unique = state.unique_error_patterns();
    let skip = unique.len().saturating_sub(RECENT_ERRORS);
    unique.into_iter().skip(skip).collect()
}

/// Final user-turn content sent to the provider.
pub fn chunk_request(request: &GenerateRequest) -> String {
    let mut out = request.build_context.clone();
    if !request.previous_errors.is_empty() {
        out.push_str(
            "\n\nThe errors listed above came from code you generated earlier in this \
             session. Produce a chunk that cannot fail the same way.",
        );
    }
    out.push_str("\n\nReturn only the JavaScript for the next chunk.");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::analyze::WorkbookSnapshot;
    use crate::builder::chunk::{ChunkComplexity, ChunkType, CodeChunk, MAX_CHUNK_RETRIES};
    use chrono::Utc;

    fn state_with_chunks(statuses: &[(ExecutionStatus, &str)]) -> ModelBuildState {
        let mut state = ModelBuildState::new(
            "s1".to_string(),
            "dcf".to_string(),
            "build a dcf model".to_string(),
            WorkbookSnapshot::default(),
        );
        for (status, desc) in statuses {
            let id = state.next_chunk_id();
            state.chunks.insert(
                id.clone(),
                CodeChunk {
                    id,
                    chunk_type: ChunkType::Data,
                    complexity: ChunkComplexity::Simple,
                    code: String::new(),
                    description: desc.to_string(),
                    stage: 0,
                    estimated_operations: 1,
                    status: *status,
                    execution_attempts: 0,
                    max_retries: MAX_CHUNK_RETRIES,
                    error_history: Vec::new(),
                    execution_time: None,
                    token_usage: None,
                    created_at: Utc::now(),
                },
            );
        }
        state
    }

    #[test]
    fn test_context_names_stage_and_progress() {
        let state = state_with_chunks(&[
            (ExecutionStatus::Completed, "setup sheet"),
            (ExecutionStatus::Completed, "add headers"),
            (ExecutionStatus::Completed, "revenue inputs"),
        ]);
        let ctx = build_chunk_context(&state);
        assert!(ctx.contains("Build stage 2 of 9"));
        assert!(ctx.contains("Progress: 3 of 3 chunks"));
        assert!(ctx.contains("- revenue inputs"));
    }

    #[test]
    fn test_context_limits_recent_completions() {
        let state = state_with_chunks(&[
            (ExecutionStatus::Completed, "first"),
            (ExecutionStatus::Completed, "second"),
            (ExecutionStatus::Completed, "third"),
            (ExecutionStatus::Completed, "fourth"),
        ]);
        let ctx = build_chunk_context(&state);
        assert!(!ctx.contains("- first"));
        assert!(ctx.contains("- second"));
        assert!(ctx.contains("- fourth"));
    }

    #[test]
    fn test_context_carries_recent_errors() {
        let mut state = state_with_chunks(&[(ExecutionStatus::Failed, "broken chunk")]);
        state.error_patterns = vec![
            "oldest error".to_string(),
            "range shape mismatch".to_string(),
            "sync missing".to_string(),
        ];
        let ctx = build_chunk_context(&state);
        assert!(!ctx.contains("oldest error"));
        assert!(ctx.contains("range shape mismatch"));
        assert!(ctx.contains("sync missing"));
    }

    #[test]
    fn test_chunk_request_warns_on_prior_errors() {
        let req = GenerateRequest {
            session_id: "s1".to_string(),
            model_kind: "generic".to_string(),
            build_context: "context".to_string(),
            previous_errors: vec!["bad range".to_string()],
        };
        assert!(chunk_request(&req).contains("cannot fail the same way"));

        let clean = GenerateRequest {
            previous_errors: Vec::new(),
            ..req
        };
        assert!(!chunk_request(&clean).contains("cannot fail the same way"));
    }
}
