//! HTTP API server for the order-commit system.
//!
//! Provides REST endpoints for checkout settlement, order commit and
//! listing, and order line reviews, with structured logging (tracing) and
//! Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use domain::{OrderPolicy, OrderService, ReviewService};
use metrics_exporter_prometheus::PrometheusHandle;
use store::{CartStore, Database, InMemoryCartStore, InMemoryDatabase};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<D: Database + Clone, C: CartStore> {
    pub orders: OrderService<D, C>,
    pub reviews: ReviewService<D>,
}

impl<D: Database + Clone, C: CartStore> AppState<D, C> {
    /// Builds the services over one relational store and one cart cache.
    pub fn new(db: D, cart: C, policy: OrderPolicy) -> Self {
        Self {
            reviews: ReviewService::new(db.clone()),
            orders: OrderService::new(db, cart, policy),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<D: Database + Clone, C: CartStore>(
    state: Arc<AppState<D, C>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders/settlement", get(routes::orders::settlement::<D, C>))
        .route(
            "/orders",
            get(routes::orders::list::<D, C>).post(routes::orders::commit::<D, C>),
        )
        .route(
            "/orders/{id}/uncommentgoods",
            get(routes::reviews::pending::<D, C>),
        )
        .route(
            "/orders/{id}/comments",
            axum::routing::post(routes::reviews::submit::<D, C>),
        )
        .route("/skus/{id}/comments", get(routes::reviews::for_sku::<D, C>))
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

/// Creates application state over in-memory stores, returning the stores
/// so callers can seed them.
pub fn create_default_state(
    policy: OrderPolicy,
) -> (
    Arc<AppState<InMemoryDatabase, InMemoryCartStore>>,
    InMemoryDatabase,
    InMemoryCartStore,
) {
    let db = InMemoryDatabase::new();
    let cart = InMemoryCartStore::new();
    let state = Arc::new(AppState::new(db.clone(), cart.clone(), policy));
    (state, db, cart)
}
