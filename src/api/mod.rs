//! HTTP surface for the incremental build service.

pub mod build;

use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Uniform response envelope for every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Recoverable domain condition: HTTP 200, `success: false`.
    pub fn fail(data: T, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(error.into()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/build/start", post(build::start_build))
        .route("/api/build/next-chunk", post(build::next_chunk))
        .route("/api/build/report", post(build::report_execution))
        .route("/api/build/status/:session_id", get(build::build_status))
        .route("/api/build/cancel/:session_id", post(build::cancel_build))
        .route("/api/build/sessions", get(build::list_sessions))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
