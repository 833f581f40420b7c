//! HTTP API server with observability for the order fulfillment core.
//!
//! Provides REST endpoints for order placement, payment callbacks and
//! cancellation, with structured logging (tracing) and Prometheus metrics.
//! The rollback worker runs inside the same process, consuming the delayed
//! messages the saga schedules.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use common::IdGenerator;
use coordination::{
    InMemoryDelayedBus, InMemoryDistributedLock, InMemoryReconciliationCache, LockConfig,
};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use saga::{InMemoryInventoryClient, OrderSaga, RollbackWorker, SagaConfig, SagaError};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OrderStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/payments/notify", post(routes::payments::notify::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state over the given store, wiring the
/// in-memory coordination backends and starting the rollback worker.
pub async fn create_default_state<S: OrderStore + 'static>(
    store: S,
    machine_id: u16,
    saga_config: SagaConfig,
) -> Result<Arc<AppState<S>>, SagaError> {
    let store = Arc::new(store);
    let inventory = Arc::new(InMemoryInventoryClient::new());
    let cache = Arc::new(InMemoryReconciliationCache::new());
    let lock = Arc::new(InMemoryDistributedLock::new(LockConfig::default()));
    let bus = Arc::new(InMemoryDelayedBus::default());

    let saga = OrderSaga::new(
        Arc::clone(&store),
        Arc::clone(&inventory),
        Arc::clone(&cache),
        Arc::clone(&lock),
        Arc::clone(&bus),
        Arc::new(IdGenerator::new(machine_id)),
        saga_config,
    );

    let worker = RollbackWorker::new(store, Arc::clone(&inventory), cache, lock, bus, saga_config);
    worker.start().await?;

    Ok(Arc::new(AppState { saga, inventory }))
}
