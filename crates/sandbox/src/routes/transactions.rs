//! Transaction ingress, standing in for the native sources.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::TransactionId;
use purchases::ObservedTransaction;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct LegacyDeliveryResponse {
    pub processed: usize,
}

#[derive(Serialize)]
pub struct TransactionStatusResponse {
    pub transaction_id: TransactionId,
    pub submitted: bool,
}

/// POST /transactions/legacy — deliver a legacy queue callback batch.
///
/// Responds once every transaction in the batch has been handled.
#[tracing::instrument(skip(state, transactions), fields(count = transactions.len()))]
pub async fn deliver_legacy(
    State(state): State<Arc<AppState>>,
    Json(transactions): Json<Vec<ObservedTransaction>>,
) -> Json<LegacyDeliveryResponse> {
    let processed = transactions.len();
    state
        .orchestrator
        .handle_legacy_transactions(transactions)
        .await;
    Json(LegacyDeliveryResponse { processed })
}

/// POST /transactions/stream — push a transaction onto the update sequence.
///
/// Processing happens on the listener task.
#[tracing::instrument(skip(state, transaction), fields(transaction_id = %transaction.transaction_id))]
pub async fn push_stream_update(
    State(state): State<Arc<AppState>>,
    Json(transaction): Json<ObservedTransaction>,
) -> StatusCode {
    state.stream.push_update(transaction);
    StatusCode::ACCEPTED
}

/// GET /transactions/{id} — whether the backend has accepted a transaction.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<TransactionStatusResponse> {
    let transaction_id = TransactionId::new(id);
    let submitted = state.orchestrator.is_submitted(&transaction_id);
    Json(TransactionStatusResponse {
        transaction_id,
        submitted,
    })
}
