//! In-flight purchase and submission bookkeeping.
//!
//! The ledger holds the two tables written from independent event sources
//! (caller purchases, the legacy queue callback, the stream listener):
//!
//! - pending purchases, keyed by product, each with the completions of every
//!   caller waiting on it
//! - the submission record: transaction IDs already accepted by the backend
//!   in this process, plus submissions currently in flight
//!
//! The orchestrator keeps one `Ledger` behind one lock and never holds that
//! lock across a collaborator call.

use std::collections::{HashMap, HashSet};

use common::{ProductId, TransactionId};
use tokio::sync::{oneshot, watch};

use crate::config::DuplicatePurchasePolicy;
use crate::entitlements::EntitlementSnapshot;
use crate::error::PurchaseError;
use crate::offers::OfferAuthorization;
use crate::transaction::{PurchaseOutcome, PurchaseRequest, TransactionSource};

/// The result a purchase caller eventually receives.
pub type PurchaseResult = Result<PurchaseOutcome, PurchaseError>;

/// Receiving half of a purchase completion.
pub type PurchaseWaiter = oneshot::Receiver<PurchaseResult>;

/// The result of one backend submission, shared with concurrent observers.
pub type SubmissionOutcome = Result<EntitlementSnapshot, PurchaseError>;

/// Receiving half of an in-flight submission.
pub type SubmissionWatch = watch::Receiver<Option<SubmissionOutcome>>;

/// A purchase-initiated transaction waiting for its terminal outcome.
#[derive(Debug)]
pub struct PendingTransaction {
    pub request: PurchaseRequest,
    pub source: TransactionSource,
    pub authorization: Option<OfferAuthorization>,
    completions: Vec<oneshot::Sender<PurchaseResult>>,
}

impl PendingTransaction {
    pub fn product_id(&self) -> &ProductId {
        &self.request.product_id
    }

    pub fn waiter_count(&self) -> usize {
        self.completions.len()
    }

    /// Delivers the outcome to every attached caller, consuming the entry.
    ///
    /// Returns how many callers were still listening.
    pub fn resolve(self, result: PurchaseResult) -> usize {
        self.completions
            .into_iter()
            .map(|completion| completion.send(result.clone()).is_ok())
            .filter(|sent| *sent)
            .count()
    }
}

/// Outcome of registering a purchase request.
#[derive(Debug)]
pub enum Registration {
    /// First request for the product: the caller must issue the native purchase.
    New(PurchaseWaiter),
    /// Attached to a purchase already in flight: no native call may be issued.
    Coalesced(PurchaseWaiter),
}

/// Outcome of claiming a transaction ID for submission.
#[derive(Debug)]
pub enum SubmissionClaim {
    /// The caller owns the submission and must report it via
    /// [`Ledger::complete_submission`].
    Claimed,
    /// The backend already accepted this transaction.
    AlreadySubmitted,
    /// Another observer is submitting it; wait for its outcome.
    InFlight {
        source: TransactionSource,
        outcome: SubmissionWatch,
    },
}

#[derive(Debug)]
struct InFlightSubmission {
    source: TransactionSource,
    outcome: watch::Sender<Option<SubmissionOutcome>>,
}

/// Pending purchases and the submission record.
#[derive(Debug, Default)]
pub struct Ledger {
    pending: HashMap<ProductId, PendingTransaction>,
    submitted: HashSet<TransactionId>,
    in_flight: HashMap<TransactionId, InFlightSubmission>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a purchase request, applying `policy` to duplicates.
    pub fn register(
        &mut self,
        request: &PurchaseRequest,
        source: TransactionSource,
        policy: DuplicatePurchasePolicy,
    ) -> Result<Registration, PurchaseError> {
        let (tx, rx) = oneshot::channel();

        if let Some(existing) = self.pending.get_mut(&request.product_id) {
            let attach = match policy {
                DuplicatePurchasePolicy::Reject => false,
                DuplicatePurchasePolicy::Coalesce => true,
                DuplicatePurchasePolicy::CoalesceSameCaller => {
                    existing.request.caller == request.caller
                }
            };
            if !attach {
                return Err(PurchaseError::AlreadyInProgress(request.product_id.clone()));
            }
            existing.completions.push(tx);
            return Ok(Registration::Coalesced(rx));
        }

        self.pending.insert(
            request.product_id.clone(),
            PendingTransaction {
                request: request.clone(),
                source,
                authorization: None,
                completions: vec![tx],
            },
        );
        Ok(Registration::New(rx))
    }

    /// Records the offer authorization used for a pending purchase.
    pub fn set_authorization(&mut self, product_id: &ProductId, authorization: OfferAuthorization) {
        if let Some(pending) = self.pending.get_mut(product_id) {
            pending.authorization = Some(authorization);
        }
    }

    pub fn pending(&self, product_id: &ProductId) -> Option<&PendingTransaction> {
        self.pending.get(product_id)
    }

    /// Removes the pending purchase for a product if it was issued on `source`.
    pub fn take_pending(
        &mut self,
        product_id: &ProductId,
        source: TransactionSource,
    ) -> Option<PendingTransaction> {
        match self.pending.get(product_id) {
            Some(pending) if pending.source == source => self.pending.remove(product_id),
            _ => None,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Claims a transaction for submission, or reports why it must not be
    /// submitted again.
    pub fn claim_submission(
        &mut self,
        transaction_id: &TransactionId,
        source: TransactionSource,
    ) -> SubmissionClaim {
        if self.submitted.contains(transaction_id) {
            return SubmissionClaim::AlreadySubmitted;
        }
        if let Some(in_flight) = self.in_flight.get(transaction_id) {
            return SubmissionClaim::InFlight {
                source: in_flight.source,
                outcome: in_flight.outcome.subscribe(),
            };
        }

        let (outcome, _) = watch::channel(None);
        self.in_flight
            .insert(transaction_id.clone(), InFlightSubmission { source, outcome });
        SubmissionClaim::Claimed
    }

    /// Ends a claimed submission and wakes everyone waiting on it.
    ///
    /// Only accepted submissions enter the record; failures stay eligible
    /// for a later redelivery.
    pub fn complete_submission(&mut self, transaction_id: &TransactionId, outcome: SubmissionOutcome) {
        if outcome.is_ok() {
            self.submitted.insert(transaction_id.clone());
        }
        if let Some(in_flight) = self.in_flight.remove(transaction_id) {
            in_flight.outcome.send_replace(Some(outcome));
        }
    }

    pub fn is_submitted(&self, transaction_id: &TransactionId) -> bool {
        self.submitted.contains(transaction_id)
    }

    pub fn is_in_flight(&self, transaction_id: &TransactionId) -> bool {
        self.in_flight.contains_key(transaction_id)
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.len()
    }
}

/// Waits for another observer's submission to finish.
pub async fn wait_for_submission(mut outcome: SubmissionWatch) -> SubmissionOutcome {
    let settled = outcome
        .wait_for(Option::is_some)
        .await
        .map(|value| Option::clone(&value));

    match settled {
        Ok(Some(result)) => result,
        Ok(None) => Err(PurchaseError::Internal(
            "submission finished without an outcome".to_string(),
        )),
        Err(_) => Err(PurchaseError::Internal(
            "submission abandoned before completing".to_string(),
        )),
    }
}
