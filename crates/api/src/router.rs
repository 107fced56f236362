//! Gateway assembly: request/response routes, progress relays, and the
//! shutdown hook that ties relays to the server's lifetime.
//!
//! [`build_app_router`] is shared by `main.rs` and the integration tests so
//! both run the same layers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, Method, StatusCode};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::ServerConfig;
use crate::routes;
use crate::state::AppState;
use crate::ws::RelayManager;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Assemble the gateway.
///
/// Request/response routes (`/health`, `/api/v1/jobs...`) are bounded by
/// `REQUEST_TIMEOUT_SECS`. The relay route is mounted beside them without a
/// timeout: its lifetime is the job's, and it ends through the relay's own
/// terminal frame or [`RelayManager::shutdown_all`].
///
/// Every route shares request ids, tracing, CORS, and panic recovery.
pub fn build_app_router(state: AppState, config: &ServerConfig) -> Router {
    let timeout = TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(config.request_timeout_secs),
    );

    let bounded = Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(timeout);
    let relays = Router::new().nest("/api/v1", routes::relay_routes());

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    bounded
        .merge(relays)
        .layer(CatchPanicLayer::new())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(build_cors_layer(config))
        .with_state(state)
}

/// CORS for browser clients: reads and submissions, JSON bodies only.
///
/// Panics at startup if any configured origin is invalid.
pub fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(3600))
}

/// Graceful-shutdown future for `axum::serve`: waits for `signal`, then
/// closes every open relay.
///
/// Relays never finish on their own while a job runs, so the server would
/// otherwise wait on them indefinitely.
pub fn close_relays_on(
    relays: Arc<RelayManager>,
    signal: impl Future<Output = ()> + Send + 'static,
) -> impl Future<Output = ()> + Send + 'static {
    async move {
        signal.await;
        tracing::info!(
            relay_count = relays.connection_count(),
            "Closing progress relays",
        );
        relays.shutdown_all();
    }
}
