//! Purchase orchestrator coordinating both native transaction sources.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use common::{AppUserId, OfferId, ProductId, TransactionId};
use futures_util::StreamExt;
use futures_util::future::join_all;
use tokio::task::JoinHandle;

use crate::config::PurchasesConfig;
use crate::error::{OfferSignError, PurchaseError, RefundError, store_failure_outcome};
use crate::ledger::{
    Ledger, PurchaseResult, Registration, SubmissionClaim, wait_for_submission,
};
use crate::offers::{OfferAuthorization, OfferSigner};
use crate::refunds::{RefundCoordinator, RefundScope, RefundStatus};
use crate::services::backend::{Backend, SubmissionRequest, with_deadline};
use crate::services::cache::EntitlementCache;
use crate::services::payment_queue::PaymentQueue;
use crate::services::refund_sheet::RefundSheet;
use crate::services::transaction_stream::TransactionStream;
use crate::state::TransactionState;
use crate::transaction::{
    Observation, ObservedTransaction, Payment, PurchaseOutcome, PurchaseRequest, StreamOrigin,
    StreamPurchaseResult, TransactionSource, Verification,
};

/// Mediates between the native transaction sources and the entitlement backend.
///
/// Every successful transaction, whichever source delivered it, goes through
/// one submission path that posts it to the backend at most once, stores the
/// returned snapshot, acknowledges the transaction and completes the waiting
/// purchase. Methods that start background work take `self: &Arc<Self>`.
pub struct PurchasesOrchestrator<B, C, Q, T, R>
where
    B: Backend,
    C: EntitlementCache,
    Q: PaymentQueue,
    T: TransactionStream,
    R: RefundSheet,
{
    config: PurchasesConfig,
    app_user_id: AppUserId,
    backend: B,
    cache: C,
    queue: Q,
    stream: T,
    offer_signer: OfferSigner<B>,
    refunds: RefundCoordinator<C, R>,
    ledger: Mutex<Ledger>,
}

impl<B, C, Q, T, R> PurchasesOrchestrator<B, C, Q, T, R>
where
    B: Backend + Clone + 'static,
    C: EntitlementCache + Clone + 'static,
    Q: PaymentQueue + 'static,
    T: TransactionStream + 'static,
    R: RefundSheet + 'static,
{
    /// Creates an orchestrator for one subscriber.
    pub fn new(
        app_user_id: impl Into<AppUserId>,
        config: PurchasesConfig,
        backend: B,
        cache: C,
        queue: Q,
        stream: T,
        refund_sheet: R,
    ) -> Self {
        let offer_signer = OfferSigner::new(backend.clone()).with_timeout(config.backend_timeout);
        let refunds = RefundCoordinator::new(cache.clone(), refund_sheet);
        Self {
            config,
            app_user_id: app_user_id.into(),
            backend,
            cache,
            queue,
            stream,
            offer_signer,
            refunds,
            ledger: Mutex::new(Ledger::new()),
        }
    }

    pub fn app_user_id(&self) -> &AppUserId {
        &self.app_user_id
    }

    pub fn config(&self) -> &PurchasesConfig {
        &self.config
    }

    /// Returns the source new purchases are issued on.
    pub fn transaction_source(&self) -> TransactionSource {
        if self.stream.is_available() {
            TransactionSource::Stream
        } else {
            TransactionSource::LegacyQueue
        }
    }

    /// Returns the number of purchases still waiting for a terminal outcome.
    pub fn pending_purchase_count(&self) -> usize {
        self.ledger().pending_count()
    }

    /// Returns true if the backend accepted `transaction_id` in this process.
    pub fn is_submitted(&self, transaction_id: &TransactionId) -> bool {
        self.ledger().is_submitted(transaction_id)
    }

    pub fn submitted_count(&self) -> usize {
        self.ledger().submitted_count()
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Purchases a product and waits for its terminal outcome.
    ///
    /// A second request for a product that is already being purchased never
    /// issues another native call: depending on the configured
    /// [`DuplicatePurchasePolicy`](crate::config::DuplicatePurchasePolicy) it
    /// shares the first request's outcome or fails immediately with
    /// [`PurchaseError::AlreadyInProgress`].
    ///
    /// The purchase runs on its own task. Dropping the returned future stops
    /// waiting but leaves the native purchase and its bookkeeping running.
    #[tracing::instrument(skip(self, request), fields(product_id = %request.product_id))]
    pub async fn purchase(self: &Arc<Self>, request: PurchaseRequest) -> PurchaseResult {
        if request.product_id.is_empty() {
            return Err(PurchaseError::InvalidRequest(
                "product identifier is empty".to_string(),
            ));
        }
        if request.quantity == 0 {
            return Err(PurchaseError::InvalidRequest(
                "quantity must be at least 1".to_string(),
            ));
        }

        let source = self.transaction_source();
        let registration =
            self.ledger()
                .register(&request, source, self.config.duplicate_policy);

        let waiter = match registration {
            Ok(Registration::New(waiter)) => {
                metrics::counter!("purchases_initiated_total", "source" => source.as_str())
                    .increment(1);
                tracing::info!(%source, "purchase started");
                let orchestrator = Arc::clone(self);
                tokio::spawn(async move { orchestrator.drive_purchase(request, source).await });
                waiter
            }
            Ok(Registration::Coalesced(waiter)) => {
                tracing::debug!("attached to purchase already in progress");
                waiter
            }
            Err(err) => {
                tracing::warn!(error = %err, "duplicate purchase rejected");
                metrics::counter!("purchases_failed_total").increment(1);
                return Err(err);
            }
        };

        let started = Instant::now();
        let result = waiter.await.unwrap_or_else(|_| {
            Err(PurchaseError::Internal(
                "purchase finished without delivering an outcome".to_string(),
            ))
        });

        metrics::counter!(outcome_metric(&result)).increment(1);
        metrics::histogram!("purchase_duration_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    async fn drive_purchase(self: Arc<Self>, request: PurchaseRequest, source: TransactionSource) {
        let product_id = request.product_id.clone();

        let discount = match &request.offer_id {
            Some(offer_id) => match self.sign_offer(&product_id, offer_id).await {
                Ok(authorization) => {
                    self.ledger()
                        .set_authorization(&product_id, authorization.clone());
                    Some(authorization)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "offer authorization failed, purchase not issued");
                    self.resolve_pending(
                        &product_id,
                        source,
                        Err(PurchaseError::DiscountAuthorization(err)),
                    );
                    return;
                }
            },
            None => None,
        };

        let payment = Payment {
            product_id: product_id.clone(),
            quantity: request.quantity,
            app_user_id: self.app_user_id.clone(),
            discount,
        };

        match source {
            // The outcome arrives through `handle_legacy_transactions`.
            TransactionSource::LegacyQueue => {
                if let Err(err) = self.queue.add(payment) {
                    tracing::warn!(error = %err, "payment queue rejected purchase");
                    self.resolve_pending(&product_id, source, store_failure_outcome(err));
                }
            }
            TransactionSource::Stream => {
                let result = self.stream.purchase(payment).await;
                match result {
                    Ok(StreamPurchaseResult::Success(ObservedTransaction {
                        transaction_id,
                        verification: Verification::Unverified(reason),
                        ..
                    })) => {
                        tracing::warn!(%transaction_id, %reason, "purchased transaction failed verification");
                        self.resolve_pending(
                            &product_id,
                            source,
                            Err(PurchaseError::VerificationFailed(reason)),
                        );
                    }
                    Ok(StreamPurchaseResult::Success(transaction))
                        if !transaction.state.is_success() =>
                    {
                        tracing::info!(
                            transaction_id = %transaction.transaction_id,
                            state = %transaction.state,
                            "purchase call returned an unsuccessful transaction"
                        );
                        self.settle_unsuccessful(source, transaction).await;
                    }
                    Ok(StreamPurchaseResult::Success(transaction)) => {
                        self.process_observation(Observation::Stream {
                            transaction,
                            origin: StreamOrigin::Purchase,
                        })
                        .await;
                    }
                    Ok(StreamPurchaseResult::UserCancelled) => {
                        self.resolve_pending(&product_id, source, Ok(PurchaseOutcome::Cancelled));
                    }
                    Ok(StreamPurchaseResult::Pending) => {
                        tracing::info!("purchase awaiting external approval");
                        self.resolve_pending(&product_id, source, Ok(PurchaseOutcome::Deferred));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "stream purchase failed");
                        self.resolve_pending(&product_id, source, store_failure_outcome(err));
                    }
                }
            }
        }
    }

    /// Entry point for the legacy queue's delegate callback.
    ///
    /// Each transaction is handled on its own task; the call returns once
    /// all of them have been processed.
    #[tracing::instrument(skip(self, transactions), fields(count = transactions.len()))]
    pub async fn handle_legacy_transactions(self: &Arc<Self>, transactions: Vec<ObservedTransaction>) {
        let handlers = transactions.into_iter().map(|transaction| {
            let orchestrator = Arc::clone(self);
            tokio::spawn(async move { orchestrator.handle_legacy_transaction(transaction).await })
        });

        for joined in join_all(handlers).await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "legacy transaction handler panicked");
            }
        }
    }

    async fn handle_legacy_transaction(&self, transaction: ObservedTransaction) {
        let source = TransactionSource::LegacyQueue;
        match transaction.state {
            TransactionState::Purchased | TransactionState::Restored => {
                self.process_observation(Observation::Legacy(transaction))
                    .await;
            }
            TransactionState::Failed
            | TransactionState::Cancelled
            | TransactionState::Deferred => {
                tracing::info!(
                    transaction_id = %transaction.transaction_id,
                    state = %transaction.state,
                    "legacy transaction did not complete"
                );
                self.settle_unsuccessful(source, transaction).await;
            }
        }
    }

    /// Resolves the purchase waiting on a transaction that did not succeed.
    ///
    /// Failed and cancelled transactions are finished so they are not
    /// redelivered. Deferred ones are redelivered once approved, so they
    /// stay unfinished.
    async fn settle_unsuccessful(&self, source: TransactionSource, transaction: ObservedTransaction) {
        let result = match (transaction.state, transaction.error.clone()) {
            (TransactionState::Deferred, _) => Ok(PurchaseOutcome::Deferred),
            (_, Some(err)) => store_failure_outcome(err),
            (TransactionState::Cancelled, None) => Ok(PurchaseOutcome::Cancelled),
            (_, None) => Err(PurchaseError::Native(
                "transaction failed without a native error".to_string(),
            )),
        };
        self.resolve_pending(&transaction.product_id, source, result);

        if transaction.state != TransactionState::Deferred {
            self.acknowledge(source, &transaction).await;
        }
    }

    /// Handles one transaction from the stream's update sequence.
    ///
    /// Updates never complete a waiting purchase; the purchase call's own
    /// result does that. The submission runs on its own task, so dropping
    /// the returned future never abandons a submission other observers are
    /// waiting on.
    #[tracing::instrument(skip(self, transaction), fields(transaction_id = %transaction.transaction_id))]
    pub async fn handle_stream_update(self: &Arc<Self>, transaction: ObservedTransaction) {
        if let Verification::Unverified(reason) = &transaction.verification {
            tracing::warn!(%reason, "skipping unverified transaction update");
            return;
        }
        if !transaction.state.is_success() {
            tracing::debug!(state = %transaction.state, "ignoring non-success transaction update");
            return;
        }

        let orchestrator = Arc::clone(self);
        let handler = tokio::spawn(async move {
            orchestrator
                .process_observation(Observation::Stream {
                    transaction,
                    origin: StreamOrigin::Updates,
                })
                .await
        });
        if let Err(err) = handler.await {
            tracing::error!(error = %err, "transaction update handler panicked");
        }
    }

    /// Spawns the task that drains the stream's update sequence.
    pub fn start_transaction_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut updates = self.stream.transaction_updates();
        let orchestrator = Arc::clone(self);

        tokio::spawn(async move {
            tracing::info!("transaction listener started");
            while let Some(transaction) = updates.next().await {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move { orchestrator.handle_stream_update(transaction).await });
            }
            tracing::info!("transaction update sequence ended");
        })
    }

    /// Obtains a signed authorization for a promotional offer.
    pub async fn sign_offer(
        &self,
        product_id: &ProductId,
        offer_id: &OfferId,
    ) -> Result<OfferAuthorization, OfferSignError> {
        self.offer_signer
            .sign(product_id, offer_id, &self.app_user_id)
            .await
    }

    /// Presents the platform's refund sheet for the transaction `scope` names.
    pub async fn begin_refund_request(&self, scope: RefundScope) -> Result<RefundStatus, RefundError> {
        self.refunds
            .begin_refund_request(&scope, &self.app_user_id)
            .await
    }

    #[tracing::instrument(
        skip(self, observation),
        fields(
            transaction_id = %observation.transaction().transaction_id,
            source = %observation.source(),
        )
    )]
    async fn process_observation(&self, observation: Observation) {
        let source = observation.source();
        let transaction = observation.transaction().clone();
        let claim = self
            .ledger()
            .claim_submission(&transaction.transaction_id, source);

        match claim {
            SubmissionClaim::Claimed => self.submit(&observation, &transaction).await,

            SubmissionClaim::AlreadySubmitted => {
                metrics::counter!("transaction_submissions_deduplicated_total").increment(1);
                tracing::debug!("transaction already submitted, skipping backend");
                self.acknowledge(source, &transaction).await;

                if observation.resolves_pending() {
                    let cached = self.cache.cached(&self.app_user_id).await;
                    self.resolve_pending(
                        &transaction.product_id,
                        source,
                        Ok(PurchaseOutcome::completed(
                            transaction.transaction_id.clone(),
                            cached,
                        )),
                    );
                }
            }

            SubmissionClaim::InFlight {
                source: submitting_source,
                outcome,
            } => {
                metrics::counter!("transaction_submissions_deduplicated_total").increment(1);
                tracing::debug!(%submitting_source, "waiting for in-flight submission");
                let outcome = wait_for_submission(outcome).await;

                // The submitting observer already finished it on its own source.
                if outcome.is_ok() && submitting_source != source {
                    self.acknowledge(source, &transaction).await;
                }
                if observation.resolves_pending() {
                    let transaction_id = transaction.transaction_id.clone();
                    self.resolve_pending(
                        &transaction.product_id,
                        source,
                        outcome.map(|snapshot| {
                            PurchaseOutcome::completed(transaction_id, Some(snapshot))
                        }),
                    );
                }
            }
        }
    }

    /// Posts a claimed transaction and settles everything waiting on it.
    async fn submit(&self, observation: &Observation, transaction: &ObservedTransaction) {
        let source = observation.source();
        let resolves_pending = observation.resolves_pending();
        // An update can claim a purchase's transaction before the purchase
        // call returns; it still carries that purchase's offer.
        let (offering_id, offer) = self.submission_context(&transaction.product_id, source);

        let request = SubmissionRequest {
            app_user_id: self.app_user_id.clone(),
            transaction_id: transaction.transaction_id.clone(),
            product_id: transaction.product_id.clone(),
            price: transaction.price.clone(),
            is_restore: observation.is_restore(self.config.observer_mode),
            offering_id,
            offer,
        };

        metrics::counter!("transaction_submissions_total", "source" => source.as_str())
            .increment(1);
        let response = with_deadline(
            self.config.backend_timeout,
            self.backend.post_transaction(request),
        )
        .await;

        match response {
            Ok(snapshot) => {
                self.cache.store(&self.app_user_id, snapshot.clone()).await;
                self.ledger()
                    .complete_submission(&transaction.transaction_id, Ok(snapshot.clone()));
                tracing::info!("transaction submitted");
                self.acknowledge(source, transaction).await;

                if resolves_pending {
                    self.resolve_pending(
                        &transaction.product_id,
                        source,
                        Ok(PurchaseOutcome::completed(
                            transaction.transaction_id.clone(),
                            Some(snapshot),
                        )),
                    );
                }
            }
            Err(err) => {
                metrics::counter!("transaction_submission_failures_total").increment(1);
                tracing::warn!(error = %err, "backend submission failed, leaving transaction for redelivery");
                let error = PurchaseError::from(err);
                self.ledger()
                    .complete_submission(&transaction.transaction_id, Err(error.clone()));

                if resolves_pending {
                    self.resolve_pending(&transaction.product_id, source, Err(error));
                }
            }
        }
    }

    /// Offering and offer authorization of the purchase waiting on `product_id`.
    fn submission_context(
        &self,
        product_id: &ProductId,
        source: TransactionSource,
    ) -> (Option<String>, Option<OfferAuthorization>) {
        let ledger = self.ledger();
        ledger
            .pending(product_id)
            .filter(|pending| pending.source == source)
            .map(|pending| {
                (
                    pending
                        .request
                        .package
                        .as_ref()
                        .map(|package| package.offering_id.clone()),
                    pending.authorization.clone(),
                )
            })
            .unwrap_or_default()
    }

    /// Marks a transaction as processed with the source that delivered it.
    ///
    /// In observer mode another system owns acknowledgment and nothing is
    /// finished. A failed finish is logged; the source will redeliver.
    async fn acknowledge(&self, source: TransactionSource, transaction: &ObservedTransaction) {
        if !self.config.finishes_transactions() {
            tracing::debug!(
                transaction_id = %transaction.transaction_id,
                "observer mode, leaving transaction unfinished"
            );
            return;
        }

        let finished = match source {
            TransactionSource::LegacyQueue => self.queue.finish(transaction),
            TransactionSource::Stream => self.stream.finish(transaction).await,
        };

        match finished {
            Ok(()) => {
                metrics::counter!("transactions_finished_total", "source" => source.as_str())
                    .increment(1);
                tracing::info!(transaction_id = %transaction.transaction_id, %source, "transaction finished");
            }
            Err(err) => {
                tracing::warn!(
                    transaction_id = %transaction.transaction_id,
                    %source,
                    error = %err,
                    "could not finish transaction"
                );
            }
        }
    }

    /// Completes the purchase waiting on `product_id`, if it was issued on `source`.
    fn resolve_pending(
        &self,
        product_id: &ProductId,
        source: TransactionSource,
        result: PurchaseResult,
    ) {
        let pending = self.ledger().take_pending(product_id, source);
        if let Some(pending) = pending {
            let delivered = pending.resolve(result);
            tracing::debug!(%product_id, delivered, "purchase resolved");
        }
    }
}

fn outcome_metric(result: &PurchaseResult) -> &'static str {
    match result {
        Ok(PurchaseOutcome::Completed { .. }) => "purchases_completed_total",
        Ok(PurchaseOutcome::Cancelled) => "purchases_cancelled_total",
        Ok(PurchaseOutcome::Deferred) => "purchases_deferred_total",
        Err(_) => "purchases_failed_total",
    }
}
