pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Request/response routes under `/api/v1`.
///
/// ```text
/// /jobs                                            list, submit
/// /jobs/{id}                                       get
/// /jobs/{id}/cancel                                cancel
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/jobs", jobs::router())
}

/// Long-lived progress relays under `/api/v1`.
///
/// ```text
/// /jobs/{id}/events                                progress relay (WebSocket)
/// ```
pub fn relay_routes() -> Router<AppState> {
    Router::new().nest("/jobs", jobs::relay_router())
}
