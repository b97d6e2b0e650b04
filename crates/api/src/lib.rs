//! HTTP API server for the chat backend's friend-acceptance saga.
//!
//! Exposes the inbound saga trigger plus health and Prometheus metrics,
//! with structured logging (tracing). Everything behind the trigger —
//! orchestration, compensation, outbox staging — lives in the `saga` and
//! `storage` crates.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{SagaOrchestrator, TracingAlerter};
use storage::SocialStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::friends::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: SocialStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/friend-requests", post(routes::friends::create_request::<S>))
        .route(
            "/friend-requests/accept",
            post(routes::friends::accept_request::<S>),
        )
        .route("/friends/{user_id}", get(routes::friends::list_friends::<S>))
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

/// Creates the shared application state over the given store.
pub fn create_state<S: SocialStore + 'static>(store: Arc<S>) -> Arc<AppState<S>> {
    let orchestrator = SagaOrchestrator::new(store.clone(), Arc::new(TracingAlerter::new()));
    Arc::new(AppState {
        orchestrator,
        store,
    })
}
