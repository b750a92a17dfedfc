//! Read-only REST endpoints for wizard health, sessions, and completions.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::store::CompletionStore;

use super::service::WizardService;

/// Shared state for wizard routes.
#[derive(Clone)]
pub struct WizardRouteState {
    pub service: Arc<WizardService>,
    pub completions: Arc<dyn CompletionStore>,
}

/// GET /api/wizard/health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET /api/wizard/sessions/{user_id}
///
/// Returns the user's session summary, or 404 if there is none.
async fn get_session(
    State(state): State<WizardRouteState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match state.service.session_status(&user_id).await {
        Some(status) => Json(serde_json::to_value(status).unwrap_or_default()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "No active session"})),
        )
            .into_response(),
    }
}

/// GET /api/wizard/users/{user_id}/completions
async fn list_completions(
    State(state): State<WizardRouteState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match state.completions.list_completions(&user_id).await {
        Ok(records) => Json(serde_json::to_value(records).unwrap_or_default()).into_response(),
        Err(e) => {
            tracing::error!(user_id = %user_id, "Failed to list completions: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Failed to list completions"})),
            )
                .into_response()
        }
    }
}

/// Build the wizard REST routes.
pub fn wizard_routes(state: WizardRouteState) -> Router {
    Router::new()
        .route("/api/wizard/health", get(health))
        .route("/api/wizard/sessions/{user_id}", get(get_session))
        .route("/api/wizard/users/{user_id}/completions", get(list_completions))
        .with_state(state)
}
