//! Tick callback that feeds the observer API and the dry-run drain
//! trigger.
//!
//! After each tick this callback publishes a fresh [`LoopSnapshot`]. When
//! a drain trigger is configured it requests the drain at the configured
//! tick, and once the drain has emptied the field it requests a stop, the
//! way a host pausing the game would.

use std::sync::Arc;

use tracing::{debug, info};
use trapline_core::operator::OperatorState;
use trapline_core::runner::TickCallback;
use trapline_core::scheduler::{LoopPhase, RunMode, Scheduler, TickSummary};
use trapline_observer::state::{AppState, LoopSnapshot};

/// Callback that bridges the loop to the observer and operator state.
pub struct ObserverCallback {
    state: Arc<AppState>,
    operator: Arc<OperatorState>,
    drain_after_ticks: Option<u64>,
    stop_when_drained: bool,
}

impl ObserverCallback {
    /// Create a callback publishing into `state`.
    pub const fn new(
        state: Arc<AppState>,
        operator: Arc<OperatorState>,
        drain_after_ticks: Option<u64>,
        stop_when_drained: bool,
    ) -> Self {
        Self {
            state,
            operator,
            drain_after_ticks,
            stop_when_drained,
        }
    }
}

impl TickCallback for ObserverCallback {
    fn on_tick(&mut self, summary: &TickSummary, scheduler: &Scheduler) {
        let snapshot = LoopSnapshot::from_tick(summary, scheduler.registry(), scheduler.strategy_name());
        // A REST handler holding the read lock skips this update; the next
        // tick catches up.
        if !self.state.try_publish(snapshot) {
            debug!(tick = summary.tick, "snapshot busy, publish skipped");
        }

        if self
            .drain_after_ticks
            .is_some_and(|after| summary.tick >= after)
            && !self.operator.is_drain_requested()
        {
            self.operator.request_drain();
            info!(tick = summary.tick, tracked = summary.tracked, "drain triggered");
        }

        let drained = summary.phase == LoopPhase::Running(RunMode::Draining) && summary.may_pause;
        if self.stop_when_drained && drained && !self.operator.is_stop_requested() {
            info!(tick = summary.tick, "field drained, host may pause");
            self.operator.request_stop();
        }
    }
}
