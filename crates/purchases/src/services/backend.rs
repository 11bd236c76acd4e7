//! Entitlement backend trait and in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{AppUserId, EntitlementId, OfferId, ProductId, TransactionId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entitlements::{EntitlementInfo, EntitlementSnapshot};
use crate::error::BackendError;
use crate::offers::OfferAuthorization;
use crate::transaction::Price;

/// A completed transaction reported to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub app_user_id: AppUserId,
    pub transaction_id: TransactionId,
    pub product_id: ProductId,
    pub price: Option<Price>,
    pub is_restore: bool,
    pub offering_id: Option<String>,
    pub offer: Option<OfferAuthorization>,
}

/// Request for a promotional offer signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferSignatureRequest {
    pub app_user_id: AppUserId,
    pub product_id: ProductId,
    pub offer_id: OfferId,
}

/// Raw signing response; the signer validates it before use.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OfferSignatureResponse {
    pub signature: String,
    pub key_identifier: String,
    pub nonce: Option<Uuid>,
    pub timestamp_ms: Option<i64>,
    /// Set when the subscriber may not redeem the offer.
    pub ineligible_reason: Option<String>,
}

/// Remote entitlement backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Submits a completed transaction and returns the subscriber's new state.
    async fn post_transaction(
        &self,
        request: SubmissionRequest,
    ) -> Result<EntitlementSnapshot, BackendError>;

    /// Requests a signature for a promotional offer.
    async fn post_offer(
        &self,
        request: OfferSignatureRequest,
    ) -> Result<OfferSignatureResponse, BackendError>;
}

/// Runs a backend call under an optional deadline; expiry is a network failure.
pub async fn with_deadline<T, F>(deadline: Option<Duration>, call: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
            Err(BackendError::Network(format!(
                "request timed out after {}ms",
                limit.as_millis()
            )))
        }),
        None => call.await,
    }
}

#[derive(Debug, Default)]
struct InMemoryBackendState {
    submissions: Vec<SubmissionRequest>,
    offer_requests: Vec<OfferSignatureRequest>,
    entitlement_for_product: HashMap<ProductId, EntitlementId>,
    granted: HashMap<AppUserId, BTreeMap<EntitlementId, EntitlementInfo>>,
    stubbed_snapshot: Option<EntitlementSnapshot>,
    submission_failure: Option<BackendError>,
    offer_response: Option<OfferSignatureResponse>,
    offer_failure: Option<BackendError>,
    latency: Option<Duration>,
}

/// In-memory backend for tests and the sandbox.
///
/// Without stubs it behaves like a tiny entitlement server: products mapped
/// with [`InMemoryBackend::map_product`] grant their entitlement to the
/// submitting user, and offers are signed with a fixed key.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<RwLock<InMemoryBackendState>>,
}

impl InMemoryBackend {
    /// Creates a new in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryBackendState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryBackendState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes purchases of `product_id` grant `entitlement_id`.
    pub fn map_product(
        &self,
        product_id: impl Into<ProductId>,
        entitlement_id: impl Into<EntitlementId>,
    ) {
        self.write()
            .entitlement_for_product
            .insert(product_id.into(), entitlement_id.into());
    }

    /// Returns `snapshot` for every successful submission.
    pub fn stub_snapshot(&self, snapshot: EntitlementSnapshot) {
        self.write().stubbed_snapshot = Some(snapshot);
    }

    /// Fails every submission with `error` until cleared with `None`.
    pub fn set_submission_failure(&self, error: Option<BackendError>) {
        self.write().submission_failure = error;
    }

    /// Returns `response` for every offer signing request.
    pub fn stub_offer_response(&self, response: OfferSignatureResponse) {
        self.write().offer_response = Some(response);
    }

    /// Fails every offer signing request with `error` until cleared with `None`.
    pub fn set_offer_failure(&self, error: Option<BackendError>) {
        self.write().offer_failure = error;
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.write().latency = latency;
    }

    /// Returns the number of transaction submissions received.
    pub fn submission_count(&self) -> usize {
        self.read().submissions.len()
    }

    /// Returns how many submissions referenced `transaction_id`.
    pub fn submissions_for(&self, transaction_id: &TransactionId) -> usize {
        self.read()
            .submissions
            .iter()
            .filter(|s| &s.transaction_id == transaction_id)
            .count()
    }

    /// Returns the most recent submission.
    pub fn last_submission(&self) -> Option<SubmissionRequest> {
        self.read().submissions.last().cloned()
    }

    /// Returns the number of offer signing requests received.
    pub fn offer_request_count(&self) -> usize {
        self.read().offer_requests.len()
    }

    async fn simulate_latency(&self) {
        let latency = self.read().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn post_transaction(
        &self,
        request: SubmissionRequest,
    ) -> Result<EntitlementSnapshot, BackendError> {
        self.simulate_latency().await;

        let mut state = self.write();
        state.submissions.push(request.clone());

        if let Some(error) = state.submission_failure.clone() {
            return Err(error);
        }
        if let Some(snapshot) = state.stubbed_snapshot.clone() {
            return Ok(snapshot);
        }

        let granted_entitlement = state
            .entitlement_for_product
            .get(&request.product_id)
            .cloned();
        let granted = state.granted.entry(request.app_user_id.clone()).or_default();
        if let Some(entitlement_id) = granted_entitlement {
            granted.insert(
                entitlement_id,
                EntitlementInfo::active(request.product_id.clone())
                    .with_transaction(request.transaction_id.clone()),
            );
        }

        Ok(EntitlementSnapshot {
            app_user_id: request.app_user_id,
            request_date: Utc::now(),
            entitlements: granted.clone(),
        })
    }

    async fn post_offer(
        &self,
        request: OfferSignatureRequest,
    ) -> Result<OfferSignatureResponse, BackendError> {
        self.simulate_latency().await;

        let mut state = self.write();
        state.offer_requests.push(request.clone());

        if let Some(error) = state.offer_failure.clone() {
            return Err(error);
        }
        if let Some(response) = state.offer_response.clone() {
            return Ok(response);
        }

        Ok(OfferSignatureResponse {
            signature: format!("sig:{}:{}", request.product_id, request.offer_id),
            key_identifier: "in-memory-key".to_string(),
            nonce: Some(Uuid::new_v4()),
            timestamp_ms: Some(Utc::now().timestamp_millis()),
            ineligible_reason: None,
        })
    }
}
