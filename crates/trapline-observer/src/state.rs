//! Shared application state for the observer API.
//!
//! [`AppState`] holds the latest [`LoopSnapshot`] and, when the loop is
//! running, handles to the live registry and the operator controls.

use std::sync::Arc;

use tokio::sync::RwLock;
use trapline_core::operator::OperatorState;
use trapline_core::registry::EntityRegistry;
use trapline_core::scheduler::{Incident, LoopPhase, SessionStats, TickAction, TickSummary};
use trapline_types::{EntityRecord, Timestamp};

/// What the loop looked like at the end of its most recent tick.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LoopSnapshot {
    /// Tick number (0 before the first tick).
    pub tick: u64,
    /// Session time of the tick.
    pub at: Timestamp,
    /// Scheduler phase.
    pub phase: LoopPhase,
    /// Active placement strategy, once configured.
    pub strategy: Option<String>,
    /// Traps tracked.
    pub tracked: usize,
    /// Grace periods running.
    pub grace_pending: usize,
    /// Whether the placement latch is held.
    pub placement_in_flight: bool,
    /// Whether the host may pause.
    pub may_pause: bool,
    /// Every tracked record.
    pub entities: Vec<EntityRecord>,
    /// The record the scheduler would service next.
    pub priority: Option<EntityRecord>,
    /// Actions taken during the tick.
    pub last_actions: Vec<TickAction>,
    /// Incidents recorded during the tick.
    pub last_incidents: Vec<Incident>,
    /// Session counters.
    pub stats: SessionStats,
}

impl Default for LoopSnapshot {
    fn default() -> Self {
        Self {
            tick: 0,
            at: Timestamp::ZERO,
            phase: LoopPhase::AwaitingConfiguration,
            strategy: None,
            tracked: 0,
            grace_pending: 0,
            placement_in_flight: false,
            may_pause: true,
            entities: Vec::new(),
            priority: None,
            last_actions: Vec::new(),
            last_incidents: Vec::new(),
            stats: SessionStats::default(),
        }
    }
}

impl LoopSnapshot {
    /// Build a snapshot from a completed tick and the registry it ran
    /// against.
    pub fn from_tick(summary: &TickSummary, registry: &EntityRegistry, strategy: Option<&str>) -> Self {
        Self {
            tick: summary.tick,
            at: summary.at,
            phase: summary.phase,
            strategy: strategy.map(str::to_owned),
            tracked: summary.tracked,
            grace_pending: summary.grace_pending,
            placement_in_flight: summary.placement_in_flight,
            may_pause: summary.may_pause,
            entities: registry.snapshot(),
            priority: registry.highest_priority_actionable(),
            last_actions: summary.actions.clone(),
            last_incidents: summary.incidents.clone(),
            stats: summary.stats.clone(),
        }
    }
}

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// The latest loop snapshot (replaced each tick).
    pub snapshot: Arc<RwLock<LoopSnapshot>>,
    /// Operator control state (present while a session is running).
    pub operator_state: Option<Arc<OperatorState>>,
    /// The live registry (present while a session is running).
    pub registry: Option<Arc<EntityRegistry>>,
}

impl AppState {
    /// Create application state with an empty snapshot and no live
    /// handles.
    pub fn new() -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(LoopSnapshot::default())),
            operator_state: None,
            registry: None,
        }
    }

    /// Create application state attached to a running session.
    pub fn with_session(operator: Arc<OperatorState>, registry: Arc<EntityRegistry>) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(LoopSnapshot::default())),
            operator_state: Some(operator),
            registry: Some(registry),
        }
    }

    /// Replace the snapshot without waiting.
    ///
    /// Returns `false` if a reader held the lock; the next tick will catch
    /// up.
    pub fn try_publish(&self, snapshot: LoopSnapshot) -> bool {
        self.snapshot.try_write().is_ok_and(|mut guard| {
            *guard = snapshot;
            true
        })
    }

    /// Record the final phase once the loop has stopped.
    pub async fn mark_phase(&self, phase: LoopPhase) {
        self.snapshot.write().await.phase = phase;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
