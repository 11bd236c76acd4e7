//! Integration tests for purchase orchestration across both transaction sources.

use std::sync::Arc;
use std::time::Duration;

use common::{AppUserId, CallerId, EntitlementId, OfferId, ProductId, TransactionId};
use purchases::{
    BackendError, DuplicatePurchasePolicy, EntitlementInfo, EntitlementSnapshot, InMemoryBackend,
    InMemoryEntitlementCache, InMemoryPaymentQueue, InMemoryRefundSheet,
    InMemoryTransactionStream, ObservedTransaction, OfferSignError, OfferSignatureResponse,
    PurchaseError, PurchaseOutcome, PurchaseRequest, PurchaseResult, PurchasesConfig,
    PurchasesOrchestrator, RefundError, RefundScope, RefundStatus, StoreError,
    StreamPurchaseResult, TransactionState,
};
use tokio::task::JoinHandle;

type TestOrchestrator = PurchasesOrchestrator<
    InMemoryBackend,
    InMemoryEntitlementCache,
    InMemoryPaymentQueue,
    InMemoryTransactionStream,
    InMemoryRefundSheet,
>;

const USER: &str = "user-1";
const MONTHLY: &str = "sub.monthly";

struct TestHarness {
    orchestrator: Arc<TestOrchestrator>,
    backend: InMemoryBackend,
    cache: InMemoryEntitlementCache,
    queue: InMemoryPaymentQueue,
    stream: InMemoryTransactionStream,
    refund_sheet: InMemoryRefundSheet,
}

impl TestHarness {
    /// Harness whose purchases go through the stream source.
    fn stream() -> Self {
        Self::build(PurchasesConfig::default(), InMemoryTransactionStream::new())
    }

    /// Harness whose purchases go through the legacy queue.
    fn legacy() -> Self {
        Self::build(
            PurchasesConfig::default(),
            InMemoryTransactionStream::unavailable(),
        )
    }

    fn build(config: PurchasesConfig, stream: InMemoryTransactionStream) -> Self {
        let backend = InMemoryBackend::new();
        backend.map_product(MONTHLY, "premium");
        let cache = InMemoryEntitlementCache::new();
        let queue = InMemoryPaymentQueue::new();
        let refund_sheet = InMemoryRefundSheet::new();

        let orchestrator = Arc::new(PurchasesOrchestrator::new(
            USER,
            config,
            backend.clone(),
            cache.clone(),
            queue.clone(),
            stream.clone(),
            refund_sheet.clone(),
        ));

        Self {
            orchestrator,
            backend,
            cache,
            queue,
            stream,
            refund_sheet,
        }
    }

    fn spawn_purchase(&self, request: PurchaseRequest) -> JoinHandle<PurchaseResult> {
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move { orchestrator.purchase(request).await })
    }

    /// Runs a legacy purchase, answering the queued payment with `delivered`.
    async fn legacy_purchase(
        &self,
        request: PurchaseRequest,
        delivered: ObservedTransaction,
    ) -> PurchaseResult {
        let mut added = self.queue.subscribe();
        let purchase = self.spawn_purchase(request);
        added.recv().await.unwrap();

        self.orchestrator
            .handle_legacy_transactions(vec![delivered])
            .await;
        purchase.await.unwrap()
    }

    fn cached(&self) -> Option<EntitlementSnapshot> {
        self.cache.snapshot(&AppUserId::new(USER))
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition was not reached in time");
}

fn txn(id: &str) -> TransactionId {
    TransactionId::new(id)
}

// ============================================================================
// Stream source
// ============================================================================

#[tokio::test]
async fn test_stream_purchase_happy_path() {
    let h = TestHarness::stream();

    let outcome = h
        .orchestrator
        .purchase(PurchaseRequest::new(MONTHLY))
        .await
        .unwrap();

    let t = txn("stream-txn-0001");
    assert_eq!(outcome.transaction_id(), Some(&t));
    assert!(!outcome.is_user_cancelled());

    let snapshot = outcome.entitlements().unwrap();
    assert!(snapshot.is_entitled_to(&EntitlementId::new("premium")));
    assert_eq!(h.cached().as_ref(), Some(snapshot));

    assert!(h.orchestrator.is_submitted(&t));
    assert!(h.stream.is_finished(&t));
    assert_eq!(h.backend.submissions_for(&t), 1);
    assert_eq!(h.orchestrator.pending_purchase_count(), 0);

    let submission = h.backend.last_submission().unwrap();
    assert!(!submission.is_restore);
    assert_eq!(submission.app_user_id, AppUserId::new(USER));
}

#[tokio::test]
async fn test_stream_user_cancellation_is_not_an_error() {
    let h = TestHarness::stream();
    h.stream
        .stub_purchase_result(Some(Ok(StreamPurchaseResult::UserCancelled)));

    let outcome = h
        .orchestrator
        .purchase(PurchaseRequest::new(MONTHLY))
        .await
        .unwrap();

    assert!(outcome.is_user_cancelled());
    assert_eq!(h.backend.submission_count(), 0);
    assert_eq!(h.orchestrator.pending_purchase_count(), 0);
}

#[tokio::test]
async fn test_stream_pending_approval_is_deferred() {
    let h = TestHarness::stream();
    h.stream
        .stub_purchase_result(Some(Ok(StreamPurchaseResult::Pending)));

    let outcome = h
        .orchestrator
        .purchase(PurchaseRequest::new(MONTHLY))
        .await
        .unwrap();

    assert!(outcome.is_deferred());
    assert_eq!(h.backend.submission_count(), 0);
}

#[tokio::test]
async fn test_unverified_stream_purchase_is_not_submitted() {
    let h = TestHarness::stream();
    let unverified = ObservedTransaction::purchased("T-bad", MONTHLY).unverified("bad signature");
    h.stream
        .stub_purchase_result(Some(Ok(StreamPurchaseResult::Success(unverified))));

    let result = h.orchestrator.purchase(PurchaseRequest::new(MONTHLY)).await;

    assert_eq!(
        result,
        Err(PurchaseError::VerificationFailed("bad signature".to_string()))
    );
    assert_eq!(h.backend.submission_count(), 0);
    assert!(!h.stream.is_finished(&txn("T-bad")));
}

#[tokio::test]
async fn test_native_failure_is_mapped_and_clears_pending() {
    let h = TestHarness::stream();
    h.stream
        .stub_purchase_result(Some(Err(StoreError::PaymentNotAllowed)));

    let result = h.orchestrator.purchase(PurchaseRequest::new(MONTHLY)).await;

    assert!(matches!(result, Err(PurchaseError::Native(_))));
    assert_eq!(h.orchestrator.pending_purchase_count(), 0);

    // The entry is gone, so a retry issues a fresh native call.
    h.stream.stub_purchase_result(None);
    let retried = h.orchestrator.purchase(PurchaseRequest::new(MONTHLY)).await;
    assert!(retried.is_ok());
    assert_eq!(h.stream.purchase_count(), 2);
}

#[tokio::test]
async fn test_invalid_receipt_leaves_transaction_unfinished() {
    let h = TestHarness::stream();
    h.backend
        .set_submission_failure(Some(BackendError::InvalidReceipt("empty receipt".to_string())));

    let result = h.orchestrator.purchase(PurchaseRequest::new(MONTHLY)).await;

    let t = txn("stream-txn-0001");
    assert_eq!(
        result,
        Err(PurchaseError::InvalidReceipt("empty receipt".to_string()))
    );
    assert!(!h.stream.is_finished(&t));
    assert!(!h.orchestrator.is_submitted(&t));
    assert!(h.cached().is_none());

    // Natural redelivery retries the submission.
    h.backend.set_submission_failure(None);
    h.orchestrator
        .handle_stream_update(ObservedTransaction::purchased("stream-txn-0001", MONTHLY))
        .await;
    assert!(h.orchestrator.is_submitted(&t));
    assert!(h.stream.is_finished(&t));
    assert_eq!(h.backend.submissions_for(&t), 2);
}

#[tokio::test]
async fn test_network_failure_is_retryable() {
    let h = TestHarness::stream();
    h.backend
        .set_submission_failure(Some(BackendError::Network("connection reset".to_string())));

    let err = h
        .orchestrator
        .purchase(PurchaseRequest::new(MONTHLY))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(!h.stream.is_finished(&txn("stream-txn-0001")));
    assert_eq!(h.orchestrator.submitted_count(), 0);
}

#[tokio::test]
async fn test_backend_timeout_is_network_failure() {
    let h = TestHarness::build(
        PurchasesConfig::default().with_backend_timeout(Duration::from_millis(20)),
        InMemoryTransactionStream::new(),
    );
    h.backend.set_latency(Some(Duration::from_millis(500)));

    let result = h.orchestrator.purchase(PurchaseRequest::new(MONTHLY)).await;

    assert!(matches!(result, Err(PurchaseError::Network(_))));
    assert_eq!(h.orchestrator.submitted_count(), 0);
}

#[tokio::test]
async fn test_finish_failure_still_completes_purchase() {
    let h = TestHarness::stream();
    h.stream
        .set_finish_failure(Some(StoreError::Unknown("finish refused".to_string())));

    let outcome = h
        .orchestrator
        .purchase(PurchaseRequest::new(MONTHLY))
        .await
        .unwrap();

    assert!(outcome.entitlements().is_some());
    assert!(h.orchestrator.is_submitted(&txn("stream-txn-0001")));
    assert_eq!(h.stream.finished_count(), 0);
}

#[tokio::test]
async fn test_purchase_result_and_update_race_submits_once() {
    let h = TestHarness::stream();
    let t = ObservedTransaction::purchased("T-race", MONTHLY);
    h.stream
        .stub_purchase_result(Some(Ok(StreamPurchaseResult::Success(t.clone()))));
    h.stream.set_purchase_latency(Some(Duration::from_millis(10)));
    h.backend.set_latency(Some(Duration::from_millis(50)));

    let _listener = h.orchestrator.start_transaction_listener();
    h.stream.push_update(t.clone());

    let outcome = h
        .orchestrator
        .purchase(PurchaseRequest::new(MONTHLY))
        .await
        .unwrap();

    assert_eq!(outcome.transaction_id(), Some(&t.transaction_id));
    assert!(outcome.entitlements().is_some());
    assert_eq!(h.backend.submissions_for(&t.transaction_id), 1);
    assert!(h.orchestrator.is_submitted(&t.transaction_id));
}

#[tokio::test]
async fn test_both_sources_delivering_same_transaction_submit_once() {
    let h = TestHarness::stream();
    h.backend.set_latency(Some(Duration::from_millis(30)));
    let t = ObservedTransaction::purchased("T-both", MONTHLY);

    tokio::join!(
        h.orchestrator.handle_stream_update(t.clone()),
        h.orchestrator.handle_legacy_transactions(vec![t.clone()]),
    );

    assert_eq!(h.backend.submissions_for(&t.transaction_id), 1);
    // Each source acknowledges its own delivery.
    assert!(h.queue.is_finished(&t.transaction_id));
    assert!(h.stream.is_finished(&t.transaction_id));
}

#[tokio::test]
async fn test_dropped_update_handler_does_not_strand_submission() {
    let h = TestHarness::stream();
    h.backend.set_latency(Some(Duration::from_millis(200)));
    let t = ObservedTransaction::purchased("T-dropped", MONTHLY);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        h.orchestrator.handle_stream_update(t.clone()),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::timeout(
        Duration::from_secs(2),
        h.orchestrator.handle_stream_update(t.clone()),
    )
    .await
    .expect("redelivery waited on an abandoned submission");
    assert!(h.orchestrator.is_submitted(&t.transaction_id));
    assert_eq!(h.backend.submissions_for(&t.transaction_id), 1);

    h.stream
        .stub_purchase_result(Some(Ok(StreamPurchaseResult::Success(t.clone()))));
    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        h.orchestrator.purchase(PurchaseRequest::new(MONTHLY)),
    )
    .await
    .expect("purchase waited on an abandoned submission")
    .unwrap();
    assert_eq!(outcome.transaction_id(), Some(&t.transaction_id));
}

#[tokio::test]
async fn test_update_claiming_purchase_transaction_carries_offer() {
    let h = TestHarness::stream();
    let t = ObservedTransaction::purchased("T-offer-race", MONTHLY);
    h.stream
        .stub_purchase_result(Some(Ok(StreamPurchaseResult::Success(t.clone()))));
    h.stream.set_purchase_latency(Some(Duration::from_millis(100)));

    let purchase = h.spawn_purchase(PurchaseRequest::new(MONTHLY).with_offer("winback"));
    eventually(|| h.backend.offer_request_count() == 1).await;

    h.orchestrator.handle_stream_update(t.clone()).await;
    let submission = h.backend.last_submission().unwrap();
    assert_eq!(submission.transaction_id, t.transaction_id);
    assert_eq!(
        submission.offer.map(|offer| offer.offer_id),
        Some(OfferId::new("winback"))
    );

    let outcome = purchase.await.unwrap().unwrap();
    assert_eq!(outcome.transaction_id(), Some(&t.transaction_id));
    assert_eq!(h.backend.submissions_for(&t.transaction_id), 1);
}

#[tokio::test]
async fn test_unsuccessful_purchase_result_is_not_submitted() {
    let h = TestHarness::stream();
    let deferred =
        ObservedTransaction::purchased("T-ask", MONTHLY).with_state(TransactionState::Deferred);
    h.stream
        .stub_purchase_result(Some(Ok(StreamPurchaseResult::Success(deferred))));

    let outcome = h
        .orchestrator
        .purchase(PurchaseRequest::new(MONTHLY))
        .await
        .unwrap();
    assert!(outcome.is_deferred());
    assert!(!h.stream.is_finished(&txn("T-ask")));

    let failed = ObservedTransaction::failed("T-declined", MONTHLY, StoreError::PaymentNotAllowed);
    h.stream
        .stub_purchase_result(Some(Ok(StreamPurchaseResult::Success(failed))));

    let result = h.orchestrator.purchase(PurchaseRequest::new(MONTHLY)).await;
    assert!(matches!(result, Err(PurchaseError::Native(_))));
    assert!(h.stream.is_finished(&txn("T-declined")));
    assert_eq!(h.backend.submission_count(), 0);
}

#[tokio::test]
async fn test_stream_updates_outside_purchases() {
    let h = TestHarness::stream();

    h.orchestrator
        .handle_stream_update(ObservedTransaction::purchased("T-renewal", MONTHLY))
        .await;
    h.orchestrator
        .handle_stream_update(
            ObservedTransaction::purchased("T-unverified", MONTHLY).unverified("bad jws"),
        )
        .await;
    h.orchestrator
        .handle_stream_update(
            ObservedTransaction::purchased("T-pending", MONTHLY)
                .with_state(TransactionState::Deferred),
        )
        .await;

    assert!(h.orchestrator.is_submitted(&txn("T-renewal")));
    assert!(h.stream.is_finished(&txn("T-renewal")));
    assert!(!h.backend.last_submission().unwrap().is_restore);
    assert_eq!(h.backend.submission_count(), 1);
    assert!(!h.stream.is_finished(&txn("T-unverified")));
}

#[tokio::test]
async fn test_listener_drains_update_sequence() {
    let h = TestHarness::stream();
    let _listener = h.orchestrator.start_transaction_listener();

    h.stream
        .push_update(ObservedTransaction::purchased("T-u1", MONTHLY));
    h.stream
        .push_update(ObservedTransaction::purchased("T-u2", MONTHLY));

    let orchestrator = Arc::clone(&h.orchestrator);
    eventually(move || orchestrator.submitted_count() == 2).await;
    assert_eq!(h.backend.submission_count(), 2);
}

#[tokio::test]
async fn test_dropped_caller_does_not_cancel_purchase() {
    let h = TestHarness::stream();
    h.stream.set_purchase_latency(Some(Duration::from_millis(50)));

    let waited = tokio::time::timeout(
        Duration::from_millis(5),
        h.orchestrator.purchase(PurchaseRequest::new(MONTHLY)),
    )
    .await;
    assert!(waited.is_err());

    let orchestrator = Arc::clone(&h.orchestrator);
    eventually(move || orchestrator.is_submitted(&txn("stream-txn-0001"))).await;
    assert_eq!(h.stream.purchase_count(), 1);
    assert!(h.cached().is_some());

    let orchestrator = Arc::clone(&h.orchestrator);
    eventually(move || orchestrator.pending_purchase_count() == 0).await;
}

// ============================================================================
// Duplicate purchase requests
// ============================================================================

#[tokio::test]
async fn test_same_caller_duplicates_share_one_native_call() {
    let h = TestHarness::stream();
    h.stream.set_purchase_latency(Some(Duration::from_millis(30)));
    let caller = CallerId::new();

    let first = h.spawn_purchase(PurchaseRequest::new(MONTHLY).from_caller(caller));
    let orchestrator = Arc::clone(&h.orchestrator);
    eventually(move || orchestrator.pending_purchase_count() == 1).await;
    let second = h.spawn_purchase(PurchaseRequest::new(MONTHLY).from_caller(caller));

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(h.stream.purchase_count(), 1);
    assert_eq!(h.backend.submission_count(), 1);
}

#[tokio::test]
async fn test_different_caller_is_rejected_without_native_call() {
    let h = TestHarness::stream();
    h.stream.set_purchase_latency(Some(Duration::from_millis(30)));

    let first = h.spawn_purchase(PurchaseRequest::new(MONTHLY).from_caller(CallerId::new()));
    let orchestrator = Arc::clone(&h.orchestrator);
    eventually(move || orchestrator.pending_purchase_count() == 1).await;

    let second = h
        .orchestrator
        .purchase(PurchaseRequest::new(MONTHLY).from_caller(CallerId::new()))
        .await;
    assert_eq!(
        second,
        Err(PurchaseError::AlreadyInProgress(ProductId::new(MONTHLY)))
    );

    assert!(first.await.unwrap().is_ok());
    assert_eq!(h.stream.purchase_count(), 1);
}

#[tokio::test]
async fn test_reject_policy_and_coalesce_policy() {
    let reject = TestHarness::build(
        PurchasesConfig::default().with_duplicate_policy(DuplicatePurchasePolicy::Reject),
        InMemoryTransactionStream::new(),
    );
    reject
        .stream
        .set_purchase_latency(Some(Duration::from_millis(30)));
    let caller = CallerId::new();
    let first = reject.spawn_purchase(PurchaseRequest::new(MONTHLY).from_caller(caller));
    let orchestrator = Arc::clone(&reject.orchestrator);
    eventually(move || orchestrator.pending_purchase_count() == 1).await;
    let second = reject
        .orchestrator
        .purchase(PurchaseRequest::new(MONTHLY).from_caller(caller))
        .await;
    assert!(matches!(second, Err(PurchaseError::AlreadyInProgress(_))));
    assert!(first.await.unwrap().is_ok());

    let coalesce = TestHarness::build(
        PurchasesConfig::default().with_duplicate_policy(DuplicatePurchasePolicy::Coalesce),
        InMemoryTransactionStream::new(),
    );
    coalesce
        .stream
        .set_purchase_latency(Some(Duration::from_millis(30)));
    let first = coalesce.spawn_purchase(PurchaseRequest::new(MONTHLY).from_caller(CallerId::new()));
    let orchestrator = Arc::clone(&coalesce.orchestrator);
    eventually(move || orchestrator.pending_purchase_count() == 1).await;
    let second =
        coalesce.spawn_purchase(PurchaseRequest::new(MONTHLY).from_caller(CallerId::new()));

    assert_eq!(first.await.unwrap(), second.await.unwrap());
    assert_eq!(coalesce.stream.purchase_count(), 1);
}

// ============================================================================
// Legacy queue source
// ============================================================================

#[tokio::test]
async fn test_legacy_purchase_completes_through_callback() {
    let h = TestHarness::legacy();

    let outcome = h
        .legacy_purchase(
            PurchaseRequest::new(MONTHLY).with_package("$rc_monthly", "default"),
            ObservedTransaction::purchased("T-L1", MONTHLY),
        )
        .await
        .unwrap();

    assert_eq!(outcome.transaction_id(), Some(&txn("T-L1")));
    assert!(h.queue.is_finished(&txn("T-L1")));
    assert_eq!(h.stream.purchase_count(), 0);
    assert_eq!(h.queue.payment_count(), 1);

    let submission = h.backend.last_submission().unwrap();
    assert_eq!(submission.offering_id.as_deref(), Some("default"));
    assert!(!submission.is_restore);
}

#[tokio::test]
async fn test_legacy_failed_transactions_are_always_finished() {
    let h = TestHarness::legacy();

    let cancelled = h
        .legacy_purchase(
            PurchaseRequest::new(MONTHLY),
            ObservedTransaction::failed("T-F1", MONTHLY, StoreError::UserCancelled),
        )
        .await
        .unwrap();
    assert!(cancelled.is_user_cancelled());
    assert!(h.queue.is_finished(&txn("T-F1")));

    let failed = h
        .legacy_purchase(
            PurchaseRequest::new(MONTHLY),
            ObservedTransaction::failed("T-F2", MONTHLY, StoreError::PaymentNotAllowed),
        )
        .await;
    assert!(matches!(failed, Err(PurchaseError::Native(_))));
    assert!(h.queue.is_finished(&txn("T-F2")));

    // No purchase waiting at all.
    h.orchestrator
        .handle_legacy_transactions(vec![ObservedTransaction::failed(
            "T-F3",
            "sub.yearly",
            StoreError::Unknown("declined".to_string()),
        )])
        .await;
    assert!(h.queue.is_finished(&txn("T-F3")));
    assert_eq!(h.backend.submission_count(), 0);
}

#[tokio::test]
async fn test_legacy_deferred_is_never_finished() {
    let h = TestHarness::legacy();

    let outcome = h
        .legacy_purchase(
            PurchaseRequest::new(MONTHLY),
            ObservedTransaction::purchased("T-D1", MONTHLY).with_state(TransactionState::Deferred),
        )
        .await
        .unwrap();
    assert!(outcome.is_deferred());
    assert!(!h.queue.is_finished(&txn("T-D1")));
    assert_eq!(h.orchestrator.pending_purchase_count(), 0);

    // Approval redelivers the transaction as purchased.
    h.orchestrator
        .handle_legacy_transactions(vec![ObservedTransaction::purchased("T-D1", MONTHLY)])
        .await;
    assert!(h.orchestrator.is_submitted(&txn("T-D1")));
    assert!(h.queue.is_finished(&txn("T-D1")));
}

#[tokio::test]
async fn test_legacy_replay_and_restore_are_submitted() {
    let h = TestHarness::legacy();

    h.orchestrator
        .handle_legacy_transactions(vec![
            ObservedTransaction::purchased("T-old", MONTHLY),
            ObservedTransaction::purchased("T-restored", "lifetime")
                .with_state(TransactionState::Restored),
        ])
        .await;

    assert!(h.orchestrator.is_submitted(&txn("T-old")));
    assert!(h.orchestrator.is_submitted(&txn("T-restored")));
    assert!(h.queue.is_finished(&txn("T-old")));
    assert!(h.queue.is_finished(&txn("T-restored")));
    assert_eq!(h.orchestrator.pending_purchase_count(), 0);
}

#[tokio::test]
async fn test_restored_transaction_is_flagged_as_restore() {
    let h = TestHarness::legacy();

    h.orchestrator
        .handle_legacy_transactions(vec![
            ObservedTransaction::purchased("T-R1", MONTHLY).with_state(TransactionState::Restored),
        ])
        .await;

    assert!(h.backend.last_submission().unwrap().is_restore);
}

#[tokio::test]
async fn test_redelivered_submitted_transaction_uses_cached_snapshot() {
    let h = TestHarness::legacy();
    h.orchestrator
        .handle_legacy_transactions(vec![ObservedTransaction::purchased("T-dup", MONTHLY)])
        .await;
    let cached = h.cached().unwrap();

    let outcome = h
        .legacy_purchase(
            PurchaseRequest::new(MONTHLY),
            ObservedTransaction::purchased("T-dup", MONTHLY),
        )
        .await
        .unwrap();

    assert_eq!(outcome.entitlements(), Some(&cached));
    assert_eq!(h.backend.submissions_for(&txn("T-dup")), 1);
}

#[tokio::test]
async fn test_queue_rejection_resolves_purchase() {
    let h = TestHarness::legacy();
    h.queue.set_add_failure(Some(StoreError::PaymentNotAllowed));

    let result = h.orchestrator.purchase(PurchaseRequest::new(MONTHLY)).await;

    assert!(matches!(result, Err(PurchaseError::Native(_))));
    assert_eq!(h.orchestrator.pending_purchase_count(), 0);
}

// ============================================================================
// Observer mode
// ============================================================================

#[tokio::test]
async fn test_observer_mode_never_finishes() {
    let h = TestHarness::build(
        PurchasesConfig::default().with_observer_mode(true),
        InMemoryTransactionStream::unavailable(),
    );

    h.orchestrator
        .handle_legacy_transactions(vec![
            ObservedTransaction::purchased("T-O1", MONTHLY),
            ObservedTransaction::failed("T-O2", MONTHLY, StoreError::UserCancelled),
        ])
        .await;

    assert!(h.orchestrator.is_submitted(&txn("T-O1")));
    assert!(h.cached().is_some());
    assert_eq!(h.queue.finished_count(), 0);
}

#[tokio::test]
async fn test_observer_mode_stream_updates_are_restores() {
    let h = TestHarness::build(
        PurchasesConfig::default().with_observer_mode(true),
        InMemoryTransactionStream::new(),
    );

    h.orchestrator
        .handle_stream_update(ObservedTransaction::purchased("T-O3", MONTHLY))
        .await;

    assert!(h.backend.last_submission().unwrap().is_restore);
    assert!(!h.stream.is_finished(&txn("T-O3")));
}

// ============================================================================
// Promotional offers
// ============================================================================

#[tokio::test]
async fn test_discounted_purchase_carries_authorization() {
    let h = TestHarness::stream();

    h.orchestrator
        .purchase(PurchaseRequest::new(MONTHLY).with_offer("winback"))
        .await
        .unwrap();

    let payment = h.stream.purchases().pop().unwrap();
    let discount = payment.discount.unwrap();
    assert_eq!(discount.offer_id, OfferId::new("winback"));

    let submission = h.backend.last_submission().unwrap();
    assert_eq!(submission.offer, Some(discount));
    assert_eq!(h.backend.offer_request_count(), 1);
}

#[tokio::test]
async fn test_ineligible_offer_aborts_before_native_call() {
    let h = TestHarness::stream();
    h.backend.stub_offer_response(OfferSignatureResponse {
        ineligible_reason: Some("introductory offer already used".to_string()),
        ..Default::default()
    });

    let err = h
        .orchestrator
        .purchase(PurchaseRequest::new(MONTHLY).with_offer("intro"))
        .await
        .unwrap_err();

    assert!(err.is_offer_ineligible());
    assert_eq!(h.stream.purchase_count(), 0);
    assert_eq!(h.orchestrator.pending_purchase_count(), 0);
}

#[tokio::test]
async fn test_sign_offer_network_failure() {
    let h = TestHarness::stream();
    h.backend
        .set_offer_failure(Some(BackendError::Network("offline".to_string())));

    let result = h
        .orchestrator
        .sign_offer(&ProductId::new(MONTHLY), &OfferId::new("winback"))
        .await;

    assert!(matches!(result, Err(OfferSignError::Network(_))));
}

// ============================================================================
// Refunds
// ============================================================================

#[tokio::test]
async fn test_refund_without_cached_entitlement_skips_platform() {
    let h = TestHarness::stream();

    let result = h
        .orchestrator
        .begin_refund_request(RefundScope::Entitlement(EntitlementId::new("premium")))
        .await;

    assert_eq!(
        result,
        Err(RefundError::NoActiveTransaction(EntitlementId::new("premium")))
    );
    assert_eq!(h.refund_sheet.request_count(), 0);
}

#[tokio::test]
async fn test_refund_after_purchase_targets_backing_transaction() {
    let h = TestHarness::stream();
    h.orchestrator
        .purchase(PurchaseRequest::new(MONTHLY))
        .await
        .unwrap();

    let status = h
        .orchestrator
        .begin_refund_request(RefundScope::Entitlement(EntitlementId::new("premium")))
        .await;

    assert_eq!(status, Ok(RefundStatus::Success));
    assert_eq!(h.refund_sheet.last_request(), Some(txn("stream-txn-0001")));
}

#[tokio::test]
async fn test_refund_for_active_entitlement() {
    let h = TestHarness::stream();
    h.cache.seed(EntitlementSnapshot::empty(USER).with_entitlement(
        "premium",
        EntitlementInfo::active(MONTHLY).with_transaction("T-active"),
    ));

    let status = h
        .orchestrator
        .begin_refund_request(RefundScope::ActiveEntitlement)
        .await;

    assert_eq!(status, Ok(RefundStatus::Success));
    assert_eq!(h.refund_sheet.last_request(), Some(txn("T-active")));
}

#[tokio::test]
async fn test_outcome_serializes_with_status_tag() {
    let outcome = PurchaseOutcome::Cancelled;
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["status"], "cancelled");
}
