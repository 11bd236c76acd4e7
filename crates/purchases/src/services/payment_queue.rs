//! Legacy payment queue trait and in-memory implementation.
//!
//! The queue reports results through a platform delegate callback; an
//! adapter forwards those callbacks to
//! `PurchasesOrchestrator::handle_legacy_transactions`.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use common::TransactionId;
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::transaction::{ObservedTransaction, Payment};

/// Callback-driven native payment queue.
pub trait PaymentQueue: Send + Sync {
    /// Enqueues a payment. The outcome arrives later through the delegate.
    fn add(&self, payment: Payment) -> Result<(), StoreError>;

    /// Acknowledges a transaction so the queue stops redelivering it.
    fn finish(&self, transaction: &ObservedTransaction) -> Result<(), StoreError>;

    /// Shows the platform's offer code redemption sheet.
    fn present_code_redemption_sheet(&self);
}

#[derive(Debug, Default)]
struct InMemoryQueueState {
    payments: Vec<Payment>,
    finished: Vec<TransactionId>,
    redemption_sheets: usize,
    add_failure: Option<StoreError>,
    finish_failure: Option<StoreError>,
    listeners: Vec<mpsc::UnboundedSender<Payment>>,
}

/// In-memory payment queue for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentQueue {
    state: Arc<RwLock<InMemoryQueueState>>,
}

impl InMemoryPaymentQueue {
    /// Creates a new in-memory payment queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryQueueState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryQueueState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a channel that receives every payment added from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Payment> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.write().listeners.push(tx);
        rx
    }

    /// Fails every `add` with `error` until cleared with `None`.
    pub fn set_add_failure(&self, error: Option<StoreError>) {
        self.write().add_failure = error;
    }

    /// Fails every `finish` with `error` until cleared with `None`.
    pub fn set_finish_failure(&self, error: Option<StoreError>) {
        self.write().finish_failure = error;
    }

    /// Returns the number of payments added.
    pub fn payment_count(&self) -> usize {
        self.read().payments.len()
    }

    /// Returns the payments added so far.
    pub fn payments(&self) -> Vec<Payment> {
        self.read().payments.clone()
    }

    /// Returns true if `transaction_id` was finished at least once.
    pub fn is_finished(&self, transaction_id: &TransactionId) -> bool {
        self.read().finished.contains(transaction_id)
    }

    /// Returns the number of finish calls that succeeded.
    pub fn finished_count(&self) -> usize {
        self.read().finished.len()
    }

    /// Returns how many times the redemption sheet was shown.
    pub fn redemption_sheet_count(&self) -> usize {
        self.read().redemption_sheets
    }
}

impl PaymentQueue for InMemoryPaymentQueue {
    fn add(&self, payment: Payment) -> Result<(), StoreError> {
        let mut state = self.write();
        if let Some(error) = state.add_failure.clone() {
            return Err(error);
        }
        state.payments.push(payment.clone());
        state
            .listeners
            .retain(|listener| listener.send(payment.clone()).is_ok());
        Ok(())
    }

    fn finish(&self, transaction: &ObservedTransaction) -> Result<(), StoreError> {
        let mut state = self.write();
        if let Some(error) = state.finish_failure.clone() {
            return Err(error);
        }
        state.finished.push(transaction.transaction_id.clone());
        Ok(())
    }

    fn present_code_redemption_sheet(&self) {
        self.write().redemption_sheets += 1;
    }
}
