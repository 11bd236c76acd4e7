//! HTTP sandbox for the purchase orchestrator.
//!
//! Wires [`PurchasesOrchestrator`] to the in-memory collaborators and
//! exposes the caller-facing surface over REST, with structured logging
//! (tracing) and Prometheus metrics. Transactions can be injected as if
//! delivered by either native source.

pub mod bridge;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use purchases::{
    CodeRedemptionRouter, InMemoryBackend, InMemoryCodeRedemptionPresenter,
    InMemoryEntitlementCache, InMemoryPaymentQueue, InMemoryRefundSheet,
    InMemoryTransactionStream, PurchasesOrchestrator,
};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// The orchestrator wired to in-memory collaborators.
pub type SandboxOrchestrator = PurchasesOrchestrator<
    InMemoryBackend,
    InMemoryEntitlementCache,
    InMemoryPaymentQueue,
    InMemoryTransactionStream,
    InMemoryRefundSheet,
>;

/// Shared application state accessible from all handlers.
///
/// The collaborator handles are clones of the ones inside the orchestrator,
/// so handlers and tests can stub and inspect them.
pub struct AppState {
    pub orchestrator: Arc<SandboxOrchestrator>,
    pub code_redemption: CodeRedemptionRouter<InMemoryPaymentQueue, InMemoryCodeRedemptionPresenter>,
    pub backend: InMemoryBackend,
    pub cache: InMemoryEntitlementCache,
    pub queue: InMemoryPaymentQueue,
    pub stream: InMemoryTransactionStream,
    pub refund_sheet: InMemoryRefundSheet,
    pub presenter: InMemoryCodeRedemptionPresenter,
    pub metrics: PrometheusHandle,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::check))
        .route("/metrics", get(routes::metrics::get))
        .route("/purchases", post(routes::purchases::create))
        .route("/offers/sign", post(routes::purchases::sign_offer))
        .route("/offer-codes/redeem", post(routes::purchases::redeem_code))
        .route(
            "/transactions/legacy",
            post(routes::transactions::deliver_legacy),
        )
        .route(
            "/transactions/stream",
            post(routes::transactions::push_stream_update),
        )
        .route("/transactions/{id}", get(routes::transactions::status))
        .route("/entitlements", get(routes::entitlements::get))
        .route("/refunds", post(routes::entitlements::refund))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state with fresh in-memory collaborators.
pub fn create_default_state(config: &Config, metrics: PrometheusHandle) -> Arc<AppState> {
    let backend = InMemoryBackend::new();
    let cache = InMemoryEntitlementCache::new();
    let queue = InMemoryPaymentQueue::new();
    let stream = InMemoryTransactionStream::new();
    stream.set_available(config.stream_available);
    let refund_sheet = InMemoryRefundSheet::new();
    let presenter = InMemoryCodeRedemptionPresenter::new();

    let orchestrator = Arc::new(PurchasesOrchestrator::new(
        config.app_user_id.as_str(),
        config.purchases.clone(),
        backend.clone(),
        cache.clone(),
        queue.clone(),
        stream.clone(),
        refund_sheet.clone(),
    ));
    let code_redemption =
        CodeRedemptionRouter::new(config.platform, queue.clone(), presenter.clone());

    Arc::new(AppState {
        orchestrator,
        code_redemption,
        backend,
        cache,
        queue,
        stream,
        refund_sheet,
        presenter,
        metrics,
    })
}

/// Starts the stream listener and, when enabled, the legacy auto-approval bridge.
pub fn spawn_background_tasks(state: &AppState, config: &Config) -> Vec<JoinHandle<()>> {
    let mut tasks = vec![state.orchestrator.start_transaction_listener()];
    if config.auto_approve {
        tasks.push(bridge::spawn_legacy_bridge(
            Arc::clone(&state.orchestrator),
            state.queue.subscribe(),
        ));
    }
    tasks
}
