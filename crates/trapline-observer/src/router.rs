//! Axum router construction for the observer API.
//!
//! Assembles every route into a single [`Router`] with CORS enabled so the
//! overlay can be served from another origin.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{handlers, operator};

/// Build the complete Axum router for the observer server.
///
/// The router includes:
/// - `GET /api/status` -- loop status and counters
/// - `GET /api/entities` -- tracked records
/// - `GET /api/priority` -- next record to service
/// - `POST /api/operator/{confirm,drain,resume,speed,stop}` -- controls
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/entities", get(handlers::list_entities))
        .route("/api/priority", get(handlers::get_priority))
        .route("/api/operator/confirm", post(operator::confirm))
        .route("/api/operator/drain", post(operator::drain))
        .route("/api/operator/resume", post(operator::resume))
        .route("/api/operator/speed", post(operator::set_speed))
        .route("/api/operator/stop", post(operator::stop))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
