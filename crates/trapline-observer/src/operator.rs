//! Operator REST API handlers for runtime loop control.
//!
//! Every command only flips an atomic on [`OperatorState`] or hands the
//! settings to the waiting loop; the loop picks it up at its next tick.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/operator/confirm` | Deliver the session settings (once) |
//! | `POST` | `/api/operator/drain` | Stop laying and run the count down |
//! | `POST` | `/api/operator/resume` | Withdraw a drain request |
//! | `POST` | `/api/operator/speed` | Set tick interval (ms) |
//! | `POST` | `/api/operator/stop` | Trigger clean shutdown |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use tracing::info;
use trapline_core::config::SessionConfig;
use trapline_core::operator::{MIN_TICK_INTERVAL_MS, OperatorState};

use crate::error::ObserverError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /api/operator/speed`.
#[derive(Debug, serde::Deserialize)]
pub struct SetSpeedRequest {
    /// New tick interval in milliseconds.
    pub tick_interval_ms: u64,
}

/// Generic success response.
#[derive(Debug, serde::Serialize)]
struct OperatorResponse {
    ok: bool,
    message: String,
}

fn operator(state: &AppState) -> Result<&Arc<OperatorState>, ObserverError> {
    state
        .operator_state
        .as_ref()
        .ok_or_else(|| ObserverError::Unavailable("operator state not available".to_owned()))
}

fn ok(message: impl Into<String>) -> Json<OperatorResponse> {
    Json(OperatorResponse {
        ok: true,
        message: message.into(),
    })
}

// ---------------------------------------------------------------------------
// POST /api/operator/confirm
// ---------------------------------------------------------------------------

/// Validate the posted session settings and deliver them to the loop.
///
/// Settings can be confirmed once per session; later calls get `409`.
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<SessionConfig>,
) -> Result<impl IntoResponse, ObserverError> {
    let operator = operator(&state)?;
    settings
        .validate()
        .map_err(|e| ObserverError::InvalidRequest(e.to_string()))?;

    let max_entities = settings.max_entities;
    operator.confirm_settings(settings)?;
    info!(max_entities, "session settings confirmed by operator");

    Ok(ok(format!("Settings confirmed, capacity {max_entities}")))
}

// ---------------------------------------------------------------------------
// POST /api/operator/drain
// ---------------------------------------------------------------------------

/// Ask the loop to stop laying and service traps until none remain.
pub async fn drain(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ObserverError> {
    operator(&state)?.request_drain();
    info!("drain requested by operator");
    Ok(ok("Drain requested"))
}

// ---------------------------------------------------------------------------
// POST /api/operator/resume
// ---------------------------------------------------------------------------

/// Withdraw a drain request. The loop resumes laying once the drain has
/// completed.
pub async fn resume(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ObserverError> {
    operator(&state)?.withdraw_drain();
    info!("drain withdrawn by operator");
    Ok(ok("Drain withdrawn"))
}

// ---------------------------------------------------------------------------
// POST /api/operator/speed
// ---------------------------------------------------------------------------

/// Change the tick interval at runtime.
pub async fn set_speed(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetSpeedRequest>,
) -> Result<impl IntoResponse, ObserverError> {
    let operator = operator(&state)?;
    let previous = operator
        .set_tick_interval_ms(body.tick_interval_ms)
        .ok_or_else(|| {
            ObserverError::InvalidRequest(format!(
                "tick_interval_ms must be at least {MIN_TICK_INTERVAL_MS}"
            ))
        })?;

    Ok(Json(serde_json::json!({
        "ok": true,
        "message": format!("Tick interval changed from {previous}ms to {}ms", body.tick_interval_ms),
        "previous_interval_ms": previous,
        "new_interval_ms": body.tick_interval_ms,
    })))
}

// ---------------------------------------------------------------------------
// POST /api/operator/stop
// ---------------------------------------------------------------------------

/// Trigger a clean shutdown. The loop finishes its current tick and
/// stops; the HTTP server keeps serving the final snapshot.
pub async fn stop(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ObserverError> {
    operator(&state)?.request_stop();
    info!("stop requested by operator");
    Ok(ok("Stop requested, the loop will end after the current tick"))
}
