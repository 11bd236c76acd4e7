//! Entitlement and refund endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use purchases::{EntitlementSnapshot, RefundScope, RefundStatus};

use crate::AppState;
use crate::error::ApiError;

/// GET /entitlements — the cached snapshot for the sandbox subscriber.
pub async fn get(State(state): State<Arc<AppState>>) -> Result<Json<EntitlementSnapshot>, ApiError> {
    let app_user_id = state.orchestrator.app_user_id();
    state
        .cache
        .snapshot(app_user_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No cached entitlements for {app_user_id}")))
}

/// POST /refunds — request a refund for a product or entitlement.
#[tracing::instrument(skip(state))]
pub async fn refund(
    State(state): State<Arc<AppState>>,
    Json(scope): Json<RefundScope>,
) -> Result<Json<RefundStatus>, ApiError> {
    let status = state.orchestrator.begin_refund_request(scope).await?;
    Ok(Json(status))
}
