//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use purchases::TransactionSource;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub app_user_id: String,
    pub transaction_source: TransactionSource,
    pub observer_mode: bool,
    pub pending_purchases: usize,
}

/// GET /health — returns orchestrator status.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let orchestrator = &state.orchestrator;
    Json(HealthResponse {
        status: "ok",
        app_user_id: orchestrator.app_user_id().to_string(),
        transaction_source: orchestrator.transaction_source(),
        observer_mode: orchestrator.config().observer_mode,
        pending_purchases: orchestrator.pending_purchase_count(),
    })
}
