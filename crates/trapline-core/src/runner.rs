//! Session runner with operator controls.
//!
//! [`run_session`] drives a [`Scheduler`] from start to finish:
//!
//! - **Awaiting configuration**: polls the one-shot settings channel until
//!   the operator confirms, or a stop is requested first
//! - **Running**: steps the scheduler once per tick interval, passing the
//!   operator's drain request through
//! - **Bounded**: stops after `max_ticks` when configured
//! - **Clean shutdown**: an operator stop or resource exhaustion ends the
//!   loop with a recorded [`SessionEndReason`]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::operator::{OperatorState, SessionEndReason};
use crate::scheduler::{LoopError, Scheduler, SessionStats, TickSummary};

/// How often the configuration wait re-checks for a stop request.
const CONFIG_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Errors that end a session abnormally.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The scheduler failed with a fatal error other than exhaustion.
    #[error("loop error: {source}")]
    Loop {
        /// The underlying loop error.
        #[from]
        source: LoopError,
    },

    /// The settings channel closed before settings were confirmed.
    #[error("settings channel closed before configuration was confirmed")]
    SettingsChannelClosed,
}

/// Result of a session run.
#[derive(Debug)]
pub struct SessionResult {
    /// Why the session ended.
    pub end_reason: SessionEndReason,
    /// Ticks stepped.
    pub total_ticks: u64,
    /// Counters at the end.
    pub stats: SessionStats,
    /// The last tick summary, if any tick completed.
    pub final_summary: Option<TickSummary>,
}

/// Callback invoked after each tick completes.
///
/// Implementations use this to publish observer snapshots.
pub trait TickCallback: Send {
    /// Called after a tick completes successfully.
    fn on_tick(&mut self, summary: &TickSummary, scheduler: &Scheduler);
}

/// A no-op tick callback.
pub struct NoOpCallback;

impl TickCallback for NoOpCallback {
    fn on_tick(&mut self, _summary: &TickSummary, _scheduler: &Scheduler) {}
}

/// Wait for confirmed settings, polling so a stop request is honoured.
///
/// Returns `None` if a stop was requested first.
async fn await_settings(
    operator: &OperatorState,
    settings_rx: &mut oneshot::Receiver<SessionConfig>,
) -> Result<Option<SessionConfig>, RunnerError> {
    info!("awaiting session configuration");
    loop {
        if operator.is_stop_requested() {
            return Ok(None);
        }
        match tokio::time::timeout(CONFIG_POLL_INTERVAL, &mut *settings_rx).await {
            Ok(Ok(settings)) => return Ok(Some(settings)),
            Ok(Err(_closed)) => return Err(RunnerError::SettingsChannelClosed),
            Err(_elapsed) => {}
        }
    }
}

/// Run a session until a termination condition is met.
///
/// # Errors
///
/// Returns [`RunnerError`] if the settings are invalid, the settings
/// channel closes unconfirmed, or the scheduler fails unrecoverably.
pub async fn run_session(
    scheduler: &mut Scheduler,
    operator: &Arc<OperatorState>,
    mut settings_rx: oneshot::Receiver<SessionConfig>,
    clock: &dyn Clock,
    callback: &mut dyn TickCallback,
) -> Result<SessionResult, RunnerError> {
    let mut last_summary: Option<TickSummary> = None;
    let mut total_ticks: u64 = 0;

    let Some(settings) = await_settings(operator, &mut settings_rx).await? else {
        return Ok(finish(scheduler, operator, SessionEndReason::OperatorStop, 0, None).await);
    };
    scheduler.configure(settings, clock.now())?;

    info!(
        max_ticks = operator.max_ticks(),
        tick_interval_ms = operator.tick_interval_ms(),
        "session starting"
    );

    loop {
        if operator.is_stop_requested() {
            info!("operator stop requested");
            return Ok(finish(scheduler, operator, SessionEndReason::OperatorStop, total_ticks, last_summary).await);
        }

        let summary = match scheduler.step(clock.now(), operator.is_drain_requested()) {
            Ok(summary) => summary,
            Err(LoopError::ResourceExhausted) => {
                warn!(tick = total_ticks, "resources exhausted");
                return Ok(finish(
                    scheduler,
                    operator,
                    SessionEndReason::ResourceExhausted,
                    total_ticks,
                    last_summary,
                )
                .await);
            }
            Err(other) => return Err(other.into()),
        };
        total_ticks = total_ticks.saturating_add(1);

        callback.on_tick(&summary, scheduler);

        if operator.tick_limit_reached(summary.tick) {
            info!(tick = summary.tick, max_ticks = operator.max_ticks(), "tick limit reached");
            return Ok(finish(
                scheduler,
                operator,
                SessionEndReason::MaxTicksReached,
                total_ticks,
                Some(summary),
            )
            .await);
        }
        last_summary = Some(summary);

        let interval_ms = operator.tick_interval_ms();
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
            () = operator.stopped() => {}
        }
    }
}

async fn finish(
    scheduler: &mut Scheduler,
    operator: &OperatorState,
    end_reason: SessionEndReason,
    total_ticks: u64,
    final_summary: Option<TickSummary>,
) -> SessionResult {
    scheduler.stop();
    operator.set_end_reason(end_reason).await;
    SessionResult {
        end_reason,
        total_ticks,
        stats: scheduler.stats().clone(),
        final_summary,
    }
}

/// Log the session end.
pub fn log_session_end(result: &SessionResult) {
    info!(
        reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        collected = result.stats.collected,
        reset = result.stats.reset,
        placements = result.stats.placements_confirmed,
        phantoms = result.stats.phantoms_removed,
        tracked_at_end = result.final_summary.as_ref().map(|s| s.tracked),
        "session ended"
    );
}
