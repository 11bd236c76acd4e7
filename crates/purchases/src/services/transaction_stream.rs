//! Stream transaction source trait and in-memory implementation.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use common::TransactionId;
use futures_core::Stream;
use futures_util::stream;
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::transaction::{ObservedTransaction, Payment, StreamPurchaseResult};

/// Unbounded sequence of transaction updates, alive for the process lifetime.
pub type TransactionUpdates = Pin<Box<dyn Stream<Item = ObservedTransaction> + Send>>;

/// Async native transaction source.
#[async_trait]
pub trait TransactionStream: Send + Sync {
    /// Returns true if the running platform provides this source.
    fn is_available(&self) -> bool;

    /// Purchases a product, suspending until the platform has a verdict.
    async fn purchase(&self, payment: Payment) -> Result<StreamPurchaseResult, StoreError>;

    /// Returns the update sequence. Only the first call yields updates.
    fn transaction_updates(&self) -> TransactionUpdates;

    /// Marks a transaction as processed.
    async fn finish(&self, transaction: &ObservedTransaction) -> Result<(), StoreError>;
}

#[derive(Debug)]
struct InMemoryStreamState {
    available: bool,
    purchases: Vec<Payment>,
    purchase_result: Option<Result<StreamPurchaseResult, StoreError>>,
    purchase_latency: Option<Duration>,
    next_transaction: u32,
    finished: Vec<TransactionId>,
    finish_failure: Option<StoreError>,
}

/// In-memory stream source for testing.
///
/// Purchases succeed with a fresh transaction unless a result is stubbed;
/// updates are injected with [`InMemoryTransactionStream::push_update`].
#[derive(Debug, Clone)]
pub struct InMemoryTransactionStream {
    state: Arc<RwLock<InMemoryStreamState>>,
    updates_tx: mpsc::UnboundedSender<ObservedTransaction>,
    updates_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ObservedTransaction>>>>,
}

impl Default for InMemoryTransactionStream {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransactionStream {
    /// Creates an available stream source.
    pub fn new() -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(RwLock::new(InMemoryStreamState {
                available: true,
                purchases: Vec::new(),
                purchase_result: None,
                purchase_latency: None,
                next_transaction: 0,
                finished: Vec::new(),
                finish_failure: None,
            })),
            updates_tx,
            updates_rx: Arc::new(Mutex::new(Some(updates_rx))),
        }
    }

    /// Creates a source that reports itself as unavailable.
    pub fn unavailable() -> Self {
        let stream = Self::new();
        stream.set_available(false);
        stream
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryStreamState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryStreamState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_available(&self, available: bool) {
        self.write().available = available;
    }

    /// Returns `result` from every purchase call until cleared with `None`.
    pub fn stub_purchase_result(&self, result: Option<Result<StreamPurchaseResult, StoreError>>) {
        self.write().purchase_result = result;
    }

    /// Delays every purchase call by `latency`.
    pub fn set_purchase_latency(&self, latency: Option<Duration>) {
        self.write().purchase_latency = latency;
    }

    /// Fails every `finish` with `error` until cleared with `None`.
    pub fn set_finish_failure(&self, error: Option<StoreError>) {
        self.write().finish_failure = error;
    }

    /// Delivers a transaction on the update sequence.
    pub fn push_update(&self, transaction: ObservedTransaction) {
        // The receiver only goes away once the listener has shut down.
        let _ = self.updates_tx.send(transaction);
    }

    /// Returns the number of purchase calls issued.
    pub fn purchase_count(&self) -> usize {
        self.read().purchases.len()
    }

    /// Returns the payments passed to purchase calls.
    pub fn purchases(&self) -> Vec<Payment> {
        self.read().purchases.clone()
    }

    /// Returns true if `transaction_id` was finished at least once.
    pub fn is_finished(&self, transaction_id: &TransactionId) -> bool {
        self.read().finished.contains(transaction_id)
    }

    /// Returns the number of finish calls that succeeded.
    pub fn finished_count(&self) -> usize {
        self.read().finished.len()
    }
}

#[async_trait]
impl TransactionStream for InMemoryTransactionStream {
    fn is_available(&self) -> bool {
        self.read().available
    }

    async fn purchase(&self, payment: Payment) -> Result<StreamPurchaseResult, StoreError> {
        let latency = self.read().purchase_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.write();
        state.purchases.push(payment.clone());
        if let Some(result) = state.purchase_result.clone() {
            return result;
        }

        state.next_transaction += 1;
        let transaction_id = format!("stream-txn-{:04}", state.next_transaction);
        Ok(StreamPurchaseResult::Success(ObservedTransaction::purchased(
            transaction_id,
            payment.product_id,
        )))
    }

    fn transaction_updates(&self) -> TransactionUpdates {
        let receiver = self
            .updates_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match receiver {
            Some(receiver) => Box::pin(stream::unfold(receiver, |mut receiver| async move {
                receiver.recv().await.map(|update| (update, receiver))
            })),
            None => Box::pin(stream::empty()),
        }
    }

    async fn finish(&self, transaction: &ObservedTransaction) -> Result<(), StoreError> {
        let mut state = self.write();
        if let Some(error) = state.finish_failure.clone() {
            return Err(error);
        }
        state.finished.push(transaction.transaction_id.clone());
        Ok(())
    }
}
