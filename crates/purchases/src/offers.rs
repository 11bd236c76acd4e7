//! Promotional offer signing.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use common::{AppUserId, OfferId, ProductId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BackendError, OfferSignError};
use crate::services::backend::{Backend, OfferSignatureRequest, OfferSignatureResponse, with_deadline};

/// A single-use signed discount authorization.
///
/// The native source rejects stale authorizations, so one is obtained right
/// before each discounted purchase and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferAuthorization {
    pub offer_id: OfferId,
    pub key_identifier: String,
    pub nonce: Uuid,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

/// Obtains offer authorizations from the backend.
pub struct OfferSigner<B: Backend> {
    backend: B,
    timeout: Option<Duration>,
}

impl<B: Backend> OfferSigner<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            timeout: None,
        }
    }

    /// Bounds each signing request by `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Requests a signed authorization for `offer_id` on `product_id`.
    #[tracing::instrument(skip(self))]
    pub async fn sign(
        &self,
        product_id: &ProductId,
        offer_id: &OfferId,
        app_user_id: &AppUserId,
    ) -> Result<OfferAuthorization, OfferSignError> {
        metrics::counter!("offer_signatures_total").increment(1);

        let request = OfferSignatureRequest {
            app_user_id: app_user_id.clone(),
            product_id: product_id.clone(),
            offer_id: offer_id.clone(),
        };
        let response = with_deadline(self.timeout, self.backend.post_offer(request))
            .await
            .map_err(|err| match err {
                BackendError::InvalidReceipt(reason) => OfferSignError::Ineligible {
                    product_id: product_id.clone(),
                    offer_id: offer_id.clone(),
                    reason,
                },
                other => OfferSignError::Network(other.to_string()),
            })?;

        let authorization = validate(product_id, offer_id, response)?;
        tracing::debug!(key_identifier = %authorization.key_identifier, "offer signed");
        Ok(authorization)
    }
}

fn validate(
    product_id: &ProductId,
    offer_id: &OfferId,
    response: OfferSignatureResponse,
) -> Result<OfferAuthorization, OfferSignError> {
    if let Some(reason) = response.ineligible_reason {
        return Err(OfferSignError::Ineligible {
            product_id: product_id.clone(),
            offer_id: offer_id.clone(),
            reason,
        });
    }
    if response.signature.is_empty() {
        return Err(OfferSignError::MalformedResponse("empty signature".to_string()));
    }
    if response.key_identifier.is_empty() {
        return Err(OfferSignError::MalformedResponse(
            "empty key identifier".to_string(),
        ));
    }
    let nonce = response
        .nonce
        .ok_or_else(|| OfferSignError::MalformedResponse("missing nonce".to_string()))?;
    let timestamp = response
        .timestamp_ms
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .ok_or_else(|| OfferSignError::MalformedResponse("missing timestamp".to_string()))?;

    Ok(OfferAuthorization {
        offer_id: offer_id.clone(),
        key_identifier: response.key_identifier,
        nonce,
        signature: response.signature,
        timestamp,
    })
}
