//! Read-only endpoint handlers for the debug overlay.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/status` | Loop phase, counts, operator state, counters |
//! | `GET` | `/api/entities` | Tracked records (`?state=armed`, `?flag=...`) |
//! | `GET` | `/api/priority` | The record the scheduler would service next |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use trapline_core::operator::SessionEndReason;
use trapline_core::scheduler::{LoopPhase, RunMode, SessionStats};
use trapline_types::{EntityRecord, LifeState, Outcome, PriorityFlag, Timestamp};

use crate::error::ObserverError;
use crate::state::AppState;

const LIFE_STATES: [LifeState; 8] = [
    LifeState::Placing,
    LifeState::Armed,
    LifeState::Resolved(Outcome::Success),
    LifeState::Resolved(Outcome::Failure),
    LifeState::Resolved(Outcome::Unknown),
    LifeState::Collapsed,
    LifeState::Resetting,
    LifeState::Unknown,
];

// ---------------------------------------------------------------------------
// Query / response types
// ---------------------------------------------------------------------------

/// Query parameters for `GET /api/entities`.
#[derive(Debug, serde::Deserialize)]
pub struct EntitiesQuery {
    /// Only records in this life state (e.g. `armed`, `resolved_success`).
    pub state: Option<String>,
    /// Only records carrying this flag (e.g. `needs-interaction`).
    pub flag: Option<String>,
}

/// Body of `GET /api/status`.
#[derive(Debug, serde::Serialize)]
pub struct LoopStatus {
    /// Tick number of the latest snapshot.
    pub tick: u64,
    /// Session time of the latest snapshot.
    pub at: Timestamp,
    /// Scheduler phase.
    pub phase: LoopPhase,
    /// Whether the loop is running in drain mode.
    pub draining: bool,
    /// Active placement strategy.
    pub strategy: Option<String>,
    /// Traps tracked.
    pub tracked: usize,
    /// Grace periods running.
    pub grace_pending: usize,
    /// Whether the placement latch is held.
    pub placement_in_flight: bool,
    /// Whether the host may pause.
    pub may_pause: bool,
    /// Whether the session settings were confirmed.
    pub confirmed: Option<bool>,
    /// Whether a drain was requested.
    pub drain_requested: Option<bool>,
    /// Whether a stop was requested.
    pub stop_requested: Option<bool>,
    /// Current tick interval.
    pub tick_interval_ms: Option<u64>,
    /// Tick limit (0 = unlimited).
    pub max_ticks: Option<u64>,
    /// Wall-clock seconds since the process started the session.
    pub elapsed_seconds: Option<u64>,
    /// RFC 3339 wall-clock start time.
    pub started_at: Option<String>,
    /// Why the session ended, if it has.
    pub end_reason: Option<SessionEndReason>,
    /// Session counters.
    pub stats: SessionStats,
}

// ---------------------------------------------------------------------------
// GET /api/status
// ---------------------------------------------------------------------------

/// Return the loop status merged with the operator state.
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.snapshot.read().await.clone();
    let operator = state.operator_state.as_ref();
    let end_reason = match operator {
        Some(operator) => operator.end_reason().await,
        None => None,
    };

    Json(LoopStatus {
        tick: snapshot.tick,
        at: snapshot.at,
        phase: snapshot.phase,
        draining: snapshot.phase == LoopPhase::Running(RunMode::Draining),
        strategy: snapshot.strategy,
        tracked: snapshot.tracked,
        grace_pending: snapshot.grace_pending,
        placement_in_flight: snapshot.placement_in_flight,
        may_pause: snapshot.may_pause,
        confirmed: operator.map(|o| o.is_confirmed()),
        drain_requested: operator.map(|o| o.is_drain_requested()),
        stop_requested: operator.map(|o| o.is_stop_requested()),
        tick_interval_ms: operator.map(|o| o.tick_interval_ms()),
        max_ticks: operator.map(|o| o.max_ticks()),
        elapsed_seconds: operator.map(|o| o.elapsed_seconds()),
        started_at: operator.map(|o| o.started_at().to_rfc3339()),
        end_reason,
        stats: snapshot.stats,
    })
}

// ---------------------------------------------------------------------------
// GET /api/entities
// ---------------------------------------------------------------------------

/// List tracked records, optionally filtered by life state or flag.
///
/// Reads the live registry when attached, otherwise the last snapshot.
pub async fn list_entities(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EntitiesQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let wanted_state = query.state.as_deref().map(parse_state).transpose()?;
    let wanted_flag = query.flag.as_deref().map(parse_flag).transpose()?;

    let records = match &state.registry {
        Some(registry) => registry.snapshot(),
        None => state.snapshot.read().await.entities.clone(),
    };
    let entities: Vec<EntityRecord> = records
        .into_iter()
        .filter(|record| wanted_state.is_none_or(|s| record.life_state == s))
        .filter(|record| wanted_flag.is_none_or(|f| record.flags.contains(f)))
        .collect();

    Ok(Json(serde_json::json!({
        "count": entities.len(),
        "entities": entities,
    })))
}

fn parse_state(label: &str) -> Result<LifeState, ObserverError> {
    LIFE_STATES
        .into_iter()
        .find(|state| state.label() == label)
        .ok_or_else(|| ObserverError::InvalidRequest(format!("unknown life state '{label}'")))
}

fn parse_flag(label: &str) -> Result<PriorityFlag, ObserverError> {
    PriorityFlag::ALL
        .into_iter()
        .find(|flag| flag.to_string() == label)
        .ok_or_else(|| ObserverError::InvalidRequest(format!("unknown flag '{label}'")))
}

// ---------------------------------------------------------------------------
// GET /api/priority
// ---------------------------------------------------------------------------

/// Return the highest-priority actionable record, or `null`.
pub async fn get_priority(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let entity = match &state.registry {
        Some(registry) => registry.highest_priority_actionable(),
        None => state.snapshot.read().await.priority.clone(),
    };
    let flag = entity.as_ref().and_then(EntityRecord::actionable_flag);
    Json(serde_json::json!({
        "entity": entity,
        "flag": flag,
    }))
}
