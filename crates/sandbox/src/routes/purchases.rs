//! Purchase, offer signing and offer code endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use common::{OfferId, ProductId};
use purchases::{OfferAuthorization, PurchaseOutcome, PurchaseRequest, RedemptionSheet};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct SignOfferRequest {
    pub product_id: ProductId,
    pub offer_id: OfferId,
}

#[derive(Serialize)]
pub struct RedemptionResponse {
    pub sheet: RedemptionSheet,
}

/// POST /purchases — purchase a product and wait for its outcome.
#[tracing::instrument(skip(state, request), fields(product_id = %request.product_id))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PurchaseRequest>,
) -> Result<Json<PurchaseOutcome>, ApiError> {
    let outcome = state.orchestrator.purchase(request).await?;
    Ok(Json(outcome))
}

/// POST /offers/sign — obtain a promotional offer authorization.
#[tracing::instrument(skip(state, request))]
pub async fn sign_offer(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignOfferRequest>,
) -> Result<Json<OfferAuthorization>, ApiError> {
    let authorization = state
        .orchestrator
        .sign_offer(&request.product_id, &request.offer_id)
        .await?;
    Ok(Json(authorization))
}

/// POST /offer-codes/redeem — show the offer code redemption sheet.
#[tracing::instrument(skip(state))]
pub async fn redeem_code(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RedemptionResponse>, ApiError> {
    let sheet = state
        .code_redemption
        .present_code_redemption_sheet()
        .await?;
    Ok(Json(RedemptionResponse { sheet }))
}
