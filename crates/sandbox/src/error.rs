//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use purchases::{OfferSignError, PurchaseError, RefundError, StoreError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Purchase flow error.
    Purchase(PurchaseError),
    /// Refund request error.
    Refund(RefundError),
    /// Offer signing error.
    Offer(OfferSignError),
    /// Native store error outside a purchase.
    Store(StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Purchase(err) => purchase_error_to_response(err),
            ApiError::Refund(err) => refund_error_to_response(err),
            ApiError::Offer(err) => (offer_error_status(&err), err.to_string()),
            ApiError::Store(err) => (StatusCode::BAD_GATEWAY, err.to_string()),
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn purchase_error_to_response(err: PurchaseError) -> (StatusCode, String) {
    let status = match &err {
        PurchaseError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        PurchaseError::AlreadyInProgress(_) => StatusCode::CONFLICT,
        PurchaseError::DiscountAuthorization(offer_err) => offer_error_status(offer_err),
        PurchaseError::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
        PurchaseError::InvalidReceipt(_) | PurchaseError::VerificationFailed(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PurchaseError::PlatformUnsupported(_) => StatusCode::NOT_IMPLEMENTED,
        PurchaseError::Native(_) => StatusCode::BAD_GATEWAY,
        PurchaseError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn refund_error_to_response(err: RefundError) -> (StatusCode, String) {
    let status = match &err {
        RefundError::NoTransactionForProduct(_)
        | RefundError::NoActiveTransaction(_)
        | RefundError::NoActiveEntitlement => StatusCode::NOT_FOUND,
        RefundError::MultipleActiveEntitlements | RefundError::AlreadyInProgress => {
            StatusCode::CONFLICT
        }
        RefundError::PlatformUnsupported => StatusCode::NOT_IMPLEMENTED,
    };
    (status, err.to_string())
}

fn offer_error_status(err: &OfferSignError) -> StatusCode {
    match err {
        OfferSignError::Ineligible { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        OfferSignError::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
        OfferSignError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
    }
}

impl From<PurchaseError> for ApiError {
    fn from(err: PurchaseError) -> Self {
        ApiError::Purchase(err)
    }
}

impl From<RefundError> for ApiError {
    fn from(err: RefundError) -> Self {
        ApiError::Refund(err)
    }
}

impl From<OfferSignError> for ApiError {
    fn from(err: OfferSignError) -> Self {
        ApiError::Offer(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}
