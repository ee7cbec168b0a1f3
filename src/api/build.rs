//! Build endpoints: the request/report loop driving incremental generation.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::api::ApiResponse;
use crate::builder::analyze::WorkbookSnapshot;
use crate::builder::{CodeChunk, ProgressReport, SessionSummary};
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartBuildRequest {
    /// Minted server-side when absent, so callers may be stateless.
    pub session_id: Option<String>,
    pub model_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub workbook_context: WorkbookSnapshot,
}

/// Outcome of executing a previously issued chunk, folded into the next
/// chunk request so the common path is a single round trip.
#[derive(Debug, Deserialize)]
pub struct ExecutionResult {
    pub chunk_id: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub execution_time: Option<f64>,
    pub new_context: Option<WorkbookSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct NextChunkRequest {
    pub session_id: String,
    pub current_context: Option<WorkbookSnapshot>,
    pub last_execution_result: Option<ExecutionResult>,
    /// Re-issue a failed chunk instead of generating a new one.
    pub retry_chunk_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NextChunkResponse {
    pub complete: bool,
    /// "execute", "retry", or "done".
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<CodeChunk>,
    pub progress: ProgressReport,
}

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub session_id: String,
    pub chunk_id: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub execution_time: Option<f64>,
    pub new_context: Option<WorkbookSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    /// False when the report was ignored (chunk already completed).
    pub recorded: bool,
    /// "continue", "retry", or "skip".
    pub action: &'static str,
    pub progress: ProgressReport,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub removed: bool,
}

pub async fn start_build(
    State(state): State<AppState>,
    Json(req): Json<StartBuildRequest>,
) -> Result<Json<ApiResponse<ProgressReport>>, AppError> {
    if req.model_type.trim().is_empty() {
        return Err(AppError::InvalidRequest(
            "model_type must not be empty".to_string(),
        ));
    }
    let session_id = match req.session_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => Uuid::new_v4().to_string(),
    };
    let report = state
        .builder
        .start_build(
            &session_id,
            &req.model_type,
            &req.description,
            req.workbook_context,
        )
        .await;
    Ok(Json(ApiResponse::ok(report)))
}

pub async fn next_chunk(
    State(state): State<AppState>,
    Json(req): Json<NextChunkRequest>,
) -> Result<Json<ApiResponse<NextChunkResponse>>, AppError> {
    let session_id = req.session_id.as_str();

    if let Some(result) = &req.last_execution_result {
        state
            .builder
            .record_chunk_execution(
                session_id,
                &result.chunk_id,
                result.success,
                result.error_message.as_deref(),
                result.execution_time,
                result.new_context.clone(),
            )
            .await;
    }

    if let Some(retry_id) = &req.retry_chunk_id {
        if let Some(chunk) = state.builder.take_retry_chunk(session_id, retry_id).await {
            let progress = state
                .builder
                .get_build_progress(session_id)
                .await
                .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
            return Ok(Json(ApiResponse::ok(NextChunkResponse {
                complete: false,
                action: "retry",
                chunk: Some(chunk),
                progress,
            })));
        }
        // Retry budget spent or chunk unknown; fall through to generation.
    }

    if state.builder.is_build_complete(session_id).await {
        let progress = state
            .builder
            .get_build_progress(session_id)
            .await
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        info!(session_id, "build reported complete");
        return Ok(Json(ApiResponse::ok(NextChunkResponse {
            complete: true,
            action: "done",
            chunk: None,
            progress,
        })));
    }

    let chunk = state
        .builder
        .generate_next_chunk(session_id, state.generator.as_ref(), req.current_context)
        .await?;
    let progress = state
        .builder
        .get_build_progress(session_id)
        .await
        .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
    Ok(Json(ApiResponse::ok(NextChunkResponse {
        complete: false,
        action: "execute",
        chunk: Some(chunk),
        progress,
    })))
}

pub async fn report_execution(
    State(state): State<AppState>,
    Json(req): Json<ReportRequest>,
) -> Result<Json<ApiResponse<ReportResponse>>, AppError> {
    let session_id = req.session_id.as_str();
    if state
        .builder
        .chunk_status(session_id, &req.chunk_id)
        .await
        .is_none()
    {
        if state.builder.get_build_progress(session_id).await.is_none() {
            return Err(AppError::SessionNotFound(session_id.to_string()));
        }
        return Err(AppError::ChunkNotFound(req.chunk_id));
    }

    let recorded = state
        .builder
        .record_chunk_execution(
            session_id,
            &req.chunk_id,
            req.success,
            req.error_message.as_deref(),
            req.execution_time,
            req.new_context,
        )
        .await;

    let action = if req.success {
        "continue"
    } else if state.builder.prepare_retry(session_id, &req.chunk_id).await {
        "retry"
    } else {
        "skip"
    };

    let progress = state
        .builder
        .get_build_progress(session_id)
        .await
        .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
    let body = ReportResponse {
        recorded,
        action,
        progress,
    };
    if !recorded {
        return Ok(Json(ApiResponse::fail(
            body,
            "execution result ignored; chunk already completed",
        )));
    }
    Ok(Json(ApiResponse::ok(body)))
}

pub async fn build_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<ProgressReport>>, AppError> {
    let progress = state
        .builder
        .get_build_progress(&session_id)
        .await
        .ok_or(AppError::SessionNotFound(session_id))?;
    Ok(Json(ApiResponse::ok(progress)))
}

pub async fn cancel_build(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<CancelResponse>>, AppError> {
    if !state.builder.cleanup_session(&session_id).await {
        return Err(AppError::SessionNotFound(session_id));
    }
    Ok(Json(ApiResponse::ok(CancelResponse { removed: true })))
}

pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<SessionSummary>>>, AppError> {
    Ok(Json(ApiResponse::ok(state.builder.list_sessions().await)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::generator::{ChunkGenerator, GenerateRequest, GeneratedChunk};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FixedGenerator;

    #[async_trait]
    impl ChunkGenerator for FixedGenerator {
        async fn generate(&self, _req: &GenerateRequest) -> Result<GeneratedChunk, AppError> {
            Ok(GeneratedChunk {
                code: "await Excel.run(async (context) => {\n    const sheet = context.workbook.worksheets.getActiveWorksheet();\n    sheet.getRange(\"A1\").values = [[\"x\"]];\n    await context.sync();\n});".to_string(),
                token_usage: None,
            })
        }
    }

    fn app_state() -> AppState {
        AppState::with_generator(Arc::new(FixedGenerator))
    }

    async fn start(state: &AppState, session_id: &str) {
        start_build(
            State(state.clone()),
            Json(StartBuildRequest {
                session_id: Some(session_id.to_string()),
                model_type: "npv".to_string(),
                description: "npv model".to_string(),
                workbook_context: WorkbookSnapshot::default(),
            }),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_start_mints_session_id() {
        let state = app_state();
        let resp = start_build(
            State(state),
            Json(StartBuildRequest {
                session_id: None,
                model_type: "dcf".to_string(),
                description: String::new(),
                workbook_context: WorkbookSnapshot::default(),
            }),
        )
        .await
        .unwrap();
        let report = resp.0.data.unwrap();
        assert!(!report.session_id.is_empty());
        assert_eq!(report.model_kind, "dcf");
    }

    #[tokio::test]
    async fn test_start_rejects_empty_model_type() {
        let state = app_state();
        let err = start_build(
            State(state),
            Json(StartBuildRequest {
                session_id: None,
                model_type: "  ".to_string(),
                description: String::new(),
                workbook_context: WorkbookSnapshot::default(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_next_chunk_generates_and_folds_in_result() {
        let state = app_state();
        start(&state, "s1").await;

        let resp = next_chunk(
            State(state.clone()),
            Json(NextChunkRequest {
                session_id: "s1".to_string(),
                current_context: None,
                last_execution_result: None,
                retry_chunk_id: None,
            }),
        )
        .await
        .unwrap();
        let body = resp.0.data.unwrap();
        assert_eq!(body.action, "execute");
        let chunk = body.chunk.unwrap();
        assert_eq!(chunk.id, "chunk_1");

        // Report the result inline with the next request.
        let resp = next_chunk(
            State(state.clone()),
            Json(NextChunkRequest {
                session_id: "s1".to_string(),
                current_context: None,
                last_execution_result: Some(ExecutionResult {
                    chunk_id: "chunk_1".to_string(),
                    success: true,
                    error_message: None,
                    execution_time: Some(0.2),
                    new_context: None,
                }),
                retry_chunk_id: None,
            }),
        )
        .await
        .unwrap();
        let body = resp.0.data.unwrap();
        assert_eq!(body.progress.completed_chunks, 1);
        assert_eq!(body.chunk.unwrap().id, "chunk_2");
    }

    #[tokio::test]
    async fn test_next_chunk_unknown_session_is_not_found() {
        let state = app_state();
        let err = next_chunk(
            State(state),
            Json(NextChunkRequest {
                session_id: "nope".to_string(),
                current_context: None,
                last_execution_result: None,
                retry_chunk_id: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_report_then_retry_round_trip() {
        let state = app_state();
        start(&state, "s1").await;
        next_chunk(
            State(state.clone()),
            Json(NextChunkRequest {
                session_id: "s1".to_string(),
                current_context: None,
                last_execution_result: None,
                retry_chunk_id: None,
            }),
        )
        .await
        .unwrap();

        let resp = report_execution(
            State(state.clone()),
            Json(ReportRequest {
                session_id: "s1".to_string(),
                chunk_id: "chunk_1".to_string(),
                success: false,
                error_message: Some("shape mismatch".to_string()),
                execution_time: None,
                new_context: None,
            }),
        )
        .await
        .unwrap();
        let body = resp.0.data.unwrap();
        assert!(body.recorded);
        assert_eq!(body.action, "retry");

        let resp = next_chunk(
            State(state.clone()),
            Json(NextChunkRequest {
                session_id: "s1".to_string(),
                current_context: None,
                last_execution_result: None,
                retry_chunk_id: Some("chunk_1".to_string()),
            }),
        )
        .await
        .unwrap();
        let body = resp.0.data.unwrap();
        assert_eq!(body.action, "retry");
        assert_eq!(body.chunk.unwrap().id, "chunk_1");
    }

    #[tokio::test]
    async fn test_report_unknown_chunk_is_not_found() {
        let state = app_state();
        start(&state, "s1").await;
        let err = report_execution(
            State(state),
            Json(ReportRequest {
                session_id: "s1".to_string(),
                chunk_id: "chunk_99".to_string(),
                success: true,
                error_message: None,
                execution_time: None,
                new_context: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::ChunkNotFound(_)));
    }

    #[tokio::test]
    async fn test_status_cancel_and_listing() {
        let state = app_state();
        start(&state, "s1").await;

        let resp = build_status(State(state.clone()), Path("s1".to_string()))
            .await
            .unwrap();
        assert_eq!(resp.0.data.unwrap().session_id, "s1");

        let sessions = list_sessions(State(state.clone())).await.unwrap();
        assert_eq!(sessions.0.data.unwrap().len(), 1);

        let resp = cancel_build(State(state.clone()), Path("s1".to_string()))
            .await
            .unwrap();
        assert!(resp.0.data.unwrap().removed);

        let err = cancel_build(State(state.clone()), Path("s1".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound(_)));

        let err = build_status(State(state), Path("s1".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound(_)));
    }
}
