//! Prometheus metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::AppState;

/// GET /metrics — returns Prometheus-formatted metrics.
///
/// Ledger sizes are sampled into gauges right before rendering.
pub async fn get(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    metrics::gauge!("purchases_pending").set(state.orchestrator.pending_purchase_count() as f64);
    metrics::gauge!("transactions_submitted").set(state.orchestrator.submitted_count() as f64);

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.render(),
    )
}
