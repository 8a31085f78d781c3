//! HTTP API server for the checkout pipeline.
//!
//! Provides the synchronous checkout endpoint, cart and order reads, order
//! polling by checkout attempt and operator tooling for dead letters and
//! reconciliation, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use checkout::{
    InMemoryNotificationDispatcher, InMemoryPaymentGateway, NotificationSender, OrderMaterializer,
    ReconciliationLog, WorkflowOrchestrator,
};
use domain::OrderMessage;
use metrics_exporter_prometheus::PrometheusHandle;
use queue::{ConsumerPool, InMemoryMessageQueue};
use store::CheckoutStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// The order message queue used by the server.
pub type OrderQueue = InMemoryMessageQueue<OrderMessage>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: CheckoutStore> {
    pub store: S,
    pub orchestrator: WorkflowOrchestrator<S, InMemoryPaymentGateway, OrderQueue>,
    pub gateway: InMemoryPaymentGateway,
    pub queue: OrderQueue,
    pub notifications: InMemoryNotificationDispatcher,
    pub reconciliation: ReconciliationLog<S>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: CheckoutStore>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkout", post(routes::checkout::create::<S>))
        .route(
            "/carts/{user_id}",
            get(routes::carts::get::<S>).put(routes::carts::put::<S>),
        )
        .route(
            "/checkouts/{checkout_attempt_id}/order",
            get(routes::orders::by_checkout_attempt::<S>),
        )
        .route("/orders", get(routes::orders::list::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/status", post(routes::orders::update_status::<S>))
        .route(
            "/operator/dead-letters",
            get(routes::operator::dead_letters::<S>),
        )
        .route(
            "/operator/dead-letters/{message_id}/redrive",
            post(routes::operator::redrive::<S>),
        )
        .route(
            "/operator/reconciliation",
            get(routes::operator::reconciliation::<S>),
        )
        .route(
            "/operator/reconciliation/{item_id}/resolve",
            post(routes::operator::resolve::<S>),
        )
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

/// Creates the application state over `store` with the in-memory gateway,
/// queue and notification dispatcher.
///
/// Returns the materializer that consumes the state's queue; hand it to
/// [`spawn_consumers`]. Must be called inside a Tokio runtime.
pub fn create_default_state<S: CheckoutStore>(
    store: S,
    config: &Config,
) -> (Arc<AppState<S>>, OrderMaterializer<S>) {
    let gateway = InMemoryPaymentGateway::new();
    let queue = OrderQueue::new(config.queue);
    let notifications = InMemoryNotificationDispatcher::new();
    let reconciliation = ReconciliationLog::new(store.clone());

    let (sender, _dispatch_task) =
        NotificationSender::spawn(notifications.clone(), config.checkout.notification_retry);
    let materializer = OrderMaterializer::new(store.clone(), sender);

    let orchestrator = WorkflowOrchestrator::new(
        store.clone(),
        gateway.clone(),
        queue.clone(),
        config.checkout.clone(),
    );

    let state = Arc::new(AppState {
        store,
        orchestrator,
        gateway,
        queue,
        notifications,
        reconciliation,
    });

    (state, materializer)
}

/// Starts the order materialization workers on the state's queue.
pub fn spawn_consumers<S: CheckoutStore>(
    state: &AppState<S>,
    materializer: OrderMaterializer<S>,
    config: &Config,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    tracing::info!(workers = config.consumer.workers, "starting order consumers");
    ConsumerPool::new(state.queue.clone(), materializer, config.consumer).spawn(shutdown)
}
