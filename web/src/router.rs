//! Router configuration.

use crate::handlers::{events, health_check, readiness_check, registrations};
use crate::middleware::correlation_id_layer;
use crate::state::AppState;
use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// ```text
/// GET    /health
/// GET    /ready
/// POST   /api/v1/events
/// GET    /api/v1/events
/// GET    /api/v1/events/:id
/// POST   /api/v1/events/:id/register
/// DELETE /api/v1/events/:id/unregister
/// GET    /api/v1/events/:id/registrations/:user_id
/// ```
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route(
            "/events",
            post(events::create_event).get(events::list_events),
        )
        .route("/events/:id", get(events::get_event))
        .route("/events/:id/register", post(registrations::register))
        .route("/events/:id/unregister", delete(registrations::unregister))
        .route(
            "/events/:id/registrations/:user_id",
            get(registrations::get_status),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
