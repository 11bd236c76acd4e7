//! Stand-in for the platform's legacy queue delegate.
//!
//! A real device reports queued payments through a delegate callback once
//! the user confirms them. The sandbox approves every queued payment and
//! feeds the resulting transaction to the orchestrator's legacy ingress.

use std::sync::Arc;

use purchases::{ObservedTransaction, Payment};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::SandboxOrchestrator;

/// Spawns the task that answers queued payments as purchased transactions.
pub fn spawn_legacy_bridge(
    orchestrator: Arc<SandboxOrchestrator>,
    mut payments: mpsc::UnboundedReceiver<Payment>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(payment) = payments.recv().await {
            let transaction = approve(&payment);
            tracing::info!(
                transaction_id = %transaction.transaction_id,
                product_id = %payment.product_id,
                "approving queued payment"
            );
            metrics::counter!("sandbox_legacy_callbacks_total").increment(1);
            orchestrator
                .handle_legacy_transactions(vec![transaction])
                .await;
        }
        tracing::info!("payment queue closed, legacy bridge stopping");
    })
}

fn approve(payment: &Payment) -> ObservedTransaction {
    ObservedTransaction::purchased(
        format!("sandbox-{}", Uuid::new_v4().simple()),
        payment.product_id.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{AppUserId, ProductId};
    use purchases::TransactionState;

    #[test]
    fn test_approved_transaction_matches_payment() {
        let payment = Payment {
            product_id: ProductId::new("sub.monthly"),
            quantity: 1,
            app_user_id: AppUserId::new("user-1"),
            discount: None,
        };

        let transaction = approve(&payment);
        assert_eq!(transaction.product_id, payment.product_id);
        assert_eq!(transaction.state, TransactionState::Purchased);
        assert!(transaction.transaction_id.as_str().starts_with("sandbox-"));
    }
}
