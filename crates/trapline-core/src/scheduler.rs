//! Priority scheduler: the per-tick action loop.
//!
//! The scheduler moves through these phases:
//!
//! ```text
//! AwaitingConfiguration -> Initializing -> Running(Normal | Draining) -> Stopped
//! ```
//!
//! Each [`Scheduler::step`] in `Running` performs at most one physical
//! action, in this order of precedence:
//!
//! 1. **Reconcile** the perception snapshot into the registry.
//! 2. **Settle.** After a confirmed placement the loop idles until a
//!    randomized settle delay has passed, then releases the latch.
//! 3. **In-flight placement.** Wait for perception to confirm it, falling
//!    back to the movement heuristic on timeout.
//! 4. **Pending movement.** Wait for arrival or timeout.
//! 5. **Service** the highest-priority actionable trap, reposition to see
//!    it, or defer it in favour of laying while it is still fresh.
//! 6. **Lay** a new trap while below capacity and not draining.
//!
//! While draining, no new trap is laid and a phantom sweep runs
//! periodically so ghost entities cannot stall the drain.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use trapline_types::{EntityRecord, LifeState, Outcome, Position, PriorityFlag, Timestamp};

use crate::config::{ConfigError, DispatchConfig, SessionConfig, TimingConfig};
use crate::dispatch::{Action, Actuator, DispatchResult, InteractionDispatcher, InteractionOutcome, ServiceKind};
use crate::placement::PlacementStrategy;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::registry::EntityRegistry;
use crate::sensor::PerceptionSensor;
use crate::transition::LifeEvent;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Operating mode while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Laying and servicing.
    Normal,
    /// Servicing only, running the trap count down to zero.
    Draining,
}

/// Lifecycle phase of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "mode")]
pub enum LoopPhase {
    /// Waiting for the session settings to be confirmed.
    AwaitingConfiguration,
    /// Building the session from confirmed settings.
    Initializing,
    /// Stepping every tick.
    Running(RunMode),
    /// Finished; no further steps are taken.
    Stopped,
}

/// Fatal scheduler errors. Each one stops the loop.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// No supplies remain and nothing is left to service.
    #[error("resources exhausted: no supplies left and nothing to service")]
    ResourceExhausted,

    /// The confirmed session settings are unusable.
    #[error("invalid session settings: {source}")]
    InvalidSettings {
        /// The validation failure.
        #[from]
        source: ConfigError,
    },

    /// `step` was called outside the `Running` phase.
    #[error("scheduler is not running (phase {phase:?})")]
    NotRunning {
        /// The phase the scheduler was in.
        phase: LoopPhase,
    },
}

/// A non-fatal problem recorded in the tick summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Incident {
    /// An expected signal was absent; a grace period covers it.
    PerceptionGap {
        /// The trap whose signal vanished.
        position: Position,
    },
    /// A placement was attempted while another was in flight.
    PlacementConflict {
        /// The tile that could not be claimed.
        position: Position,
    },
    /// The dispatcher could not confidently match an action.
    InteractionAmbiguous {
        /// The trap that was targeted.
        position: Position,
        /// What the dispatcher reported.
        outcome: InteractionOutcome,
    },
    /// A tracked trap left no trace and was removed.
    PhantomEntity {
        /// The removed trap.
        position: Position,
    },
}

impl Incident {
    /// The tile the incident concerns.
    pub const fn position(&self) -> Position {
        match self {
            Self::PerceptionGap { position }
            | Self::PlacementConflict { position }
            | Self::InteractionAmbiguous { position, .. }
            | Self::PhantomEntity { position } => *position,
        }
    }
}

/// Why the player is walking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MovePurpose {
    /// To get a better view of hidden traps.
    Reposition,
    /// To get within reach of a trap.
    Service,
    /// To stand on a placement site.
    Place,
}

/// How an in-flight placement was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    /// Perception saw the trap.
    Perception,
    /// Perception timed out but the player was moved off the tile.
    Movement,
}

/// One thing the scheduler did during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TickAction {
    /// Nothing to do.
    Idle,
    /// Waiting out the post-placement settle delay.
    Settling {
        /// When the latch will be released.
        until: Timestamp,
    },
    /// Waiting for a placement to be confirmed.
    AwaitingPlacement {
        /// The tile being laid on.
        position: Position,
    },
    /// A lay action was performed.
    PlacementStarted {
        /// The tile laid on.
        position: Position,
    },
    /// A placement was confirmed.
    PlacementConfirmed {
        /// The tile laid on.
        position: Position,
        /// What confirmed it.
        via: Confirmation,
    },
    /// A placement failed and its record was dropped.
    PlacementFailed {
        /// The tile.
        position: Position,
    },
    /// A walk was issued.
    MoveIssued {
        /// Destination.
        target: Position,
        /// Why.
        purpose: MovePurpose,
    },
    /// Still walking.
    Moving {
        /// Destination.
        target: Position,
    },
    /// Arrived.
    Arrived {
        /// Destination.
        target: Position,
        /// Why the walk was made.
        purpose: MovePurpose,
    },
    /// Gave up walking.
    MovementTimedOut {
        /// Destination.
        target: Position,
    },
    /// A fresh result was left alone in favour of laying.
    Deferred {
        /// The trap left alone.
        position: Position,
    },
    /// An interaction was dispatched.
    Dispatched {
        /// The tile acted upon.
        position: Position,
        /// The outcome.
        outcome: InteractionOutcome,
        /// The action performed, if any.
        action: Option<Action>,
    },
    /// A phantom sweep ran.
    Swept {
        /// Traps removed by the sweep.
        removed: Vec<Position>,
    },
}

/// Running counters for the whole session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Lay actions performed.
    pub placements_started: u64,
    /// Placements confirmed.
    pub placements_confirmed: u64,
    /// Placements aborted or timed out.
    pub placements_failed: u64,
    /// Traps picked up.
    pub collected: u64,
    /// Traps reset in place.
    pub reset: u64,
    /// Phantom traps removed.
    pub phantoms_removed: u64,
    /// Grace periods that ran out.
    pub graces_expired: u64,
    /// Escalation flags raised.
    pub escalations: u64,
    /// Traps flagged for immediate collection.
    pub expedited: u64,
    /// Non-fatal incidents recorded.
    pub incidents: u64,
}

/// What happened during one tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickSummary {
    /// The tick number (1-based).
    pub tick: u64,
    /// Session time of the tick.
    pub at: Timestamp,
    /// Phase after the tick.
    pub phase: LoopPhase,
    /// Perception changes applied.
    pub report: ReconcileReport,
    /// Actions taken.
    pub actions: Vec<TickAction>,
    /// Non-fatal problems.
    pub incidents: Vec<Incident>,
    /// Traps tracked after the tick.
    pub tracked: usize,
    /// Grace periods running after the tick.
    pub grace_pending: usize,
    /// Whether the placement latch is held.
    pub placement_in_flight: bool,
    /// Whether the host may pause now.
    pub may_pause: bool,
    /// Counters so far.
    pub stats: SessionStats,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Confirmed settings and the strategy built from them.
#[derive(Debug)]
struct Session {
    settings: SessionConfig,
    strategy: Box<dyn PlacementStrategy>,
}

#[derive(Debug, Clone, Copy)]
struct PendingPlacement {
    position: Position,
    player_at_start: Position,
    deadline: Timestamp,
}

#[derive(Debug, Clone, Copy)]
struct PendingMove {
    target: Position,
    purpose: MovePurpose,
    tolerance: u32,
    deadline: Timestamp,
}

/// Whether a step stage consumed the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Proceed,
    Yield,
}

#[derive(Debug, Default)]
struct TickLog {
    actions: Vec<TickAction>,
    incidents: Vec<Incident>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// The action loop state machine.
#[derive(Debug)]
pub struct Scheduler {
    registry: Arc<EntityRegistry>,
    reconciler: Reconciler,
    dispatcher: InteractionDispatcher,
    sensor: Box<dyn PerceptionSensor>,
    timing: TimingConfig,
    dispatch: DispatchConfig,
    session: Option<Session>,
    phase: LoopPhase,
    rng: StdRng,
    pending_placement: Option<PendingPlacement>,
    settle_until: Option<Timestamp>,
    movement: Option<PendingMove>,
    /// Per-trap freshness threshold, sampled once per life state.
    freshness: BTreeMap<Position, u64>,
    /// Traps whose last interaction was ambiguous, with their cool-off end.
    retry_after: BTreeMap<Position, Timestamp>,
    last_sweep: Option<Timestamp>,
    stats: SessionStats,
    tick: u64,
    started_at: Option<Timestamp>,
}

impl Scheduler {
    /// Create a scheduler awaiting configuration.
    pub fn new(
        registry: Arc<EntityRegistry>,
        sensor: Box<dyn PerceptionSensor>,
        actuator: Box<dyn Actuator>,
        timing: TimingConfig,
        dispatch: DispatchConfig,
    ) -> Self {
        let dispatcher = InteractionDispatcher::new(actuator, dispatch.max_attempts, dispatch.interaction_range);
        Self {
            registry,
            reconciler: Reconciler::new(timing.clone(), 0),
            dispatcher,
            sensor,
            timing,
            dispatch,
            session: None,
            phase: LoopPhase::AwaitingConfiguration,
            rng: StdRng::seed_from_u64(0),
            pending_placement: None,
            settle_until: None,
            movement: None,
            freshness: BTreeMap::new(),
            retry_after: BTreeMap::new(),
            last_sweep: None,
            stats: SessionStats::default(),
            tick: 0,
            started_at: None,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Current phase.
    pub const fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// Ticks stepped so far.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Counters so far.
    pub const fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// The shared registry.
    pub const fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// The confirmed settings, once configured.
    pub fn settings(&self) -> Option<&SessionConfig> {
        self.session.as_ref().map(|session| &session.settings)
    }

    /// Name of the active placement strategy, once configured.
    pub fn strategy_name(&self) -> Option<&'static str> {
        self.session.as_ref().map(|session| session.strategy.name())
    }

    /// Session time at which the scheduler started running.
    pub const fn started_at(&self) -> Option<Timestamp> {
        self.started_at
    }

    /// Whether the host may pause right now.
    pub fn may_pause(&self) -> bool {
        self.registry.may_pause()
    }

    const fn is_draining(&self) -> bool {
        matches!(self.phase, LoopPhase::Running(RunMode::Draining))
    }

    // -----------------------------------------------------------------------
    // Phase transitions
    // -----------------------------------------------------------------------

    /// Consume the confirmed session settings and start running.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::InvalidSettings`] if validation fails, and
    /// [`LoopError::NotRunning`] if the scheduler was already configured.
    pub fn configure(&mut self, settings: SessionConfig, now: Timestamp) -> Result<(), LoopError> {
        if self.phase != LoopPhase::AwaitingConfiguration {
            return Err(LoopError::NotRunning { phase: self.phase });
        }
        settings.validate()?;
        self.phase = LoopPhase::Initializing;

        let seed = settings.seed.unwrap_or_else(|| rand::rng().random());
        let strategy = settings.strategy.build();
        info!(
            strategy = strategy.name(),
            description = %strategy.describe(),
            max_entities = settings.max_entities,
            zones = settings.zones.len(),
            expedite_probability = settings.expedite_probability,
            seed,
            "session configured"
        );

        self.registry.clear_all();
        self.reconciler = Reconciler::new(self.timing.clone(), seed);
        self.rng = StdRng::seed_from_u64(seed.wrapping_add(1));
        self.pending_placement = None;
        self.settle_until = None;
        self.movement = None;
        self.freshness.clear();
        self.retry_after.clear();
        self.last_sweep = None;
        self.stats = SessionStats::default();
        self.tick = 0;
        self.started_at = Some(now);
        self.session = Some(Session { settings, strategy });

        self.phase = LoopPhase::Running(RunMode::Normal);
        info!(at = %now, "scheduler running");
        Ok(())
    }

    /// Stop the scheduler. Further steps return [`LoopError::NotRunning`].
    pub fn stop(&mut self) {
        if self.phase != LoopPhase::Stopped {
            info!(tick = self.tick, tracked = self.registry.len(), "scheduler stopped");
        }
        self.phase = LoopPhase::Stopped;
    }

    fn update_mode(&mut self, drain_requested: bool) {
        match self.phase {
            LoopPhase::Running(RunMode::Normal) if drain_requested => {
                self.phase = LoopPhase::Running(RunMode::Draining);
                self.last_sweep = None;
                info!(tracked = self.registry.len(), "draining: no new placements");
            }
            LoopPhase::Running(RunMode::Draining) if !drain_requested && self.registry.may_pause() => {
                self.phase = LoopPhase::Running(RunMode::Normal);
                info!("drain complete, resuming normal operation");
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Step
    // -----------------------------------------------------------------------

    /// Run one tick at session time `now`.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::NotRunning`] outside the `Running` phase and
    /// [`LoopError::ResourceExhausted`] (after stopping) when no supplies
    /// remain and nothing is left to service.
    pub fn step(&mut self, now: Timestamp, drain_requested: bool) -> Result<TickSummary, LoopError> {
        if !matches!(self.phase, LoopPhase::Running(_)) {
            return Err(LoopError::NotRunning { phase: self.phase });
        }
        self.tick = self.tick.saturating_add(1);
        let mut log = TickLog::default();

        let snapshot = self.sensor.snapshot();
        let report = self.reconciler.reconcile(&self.registry, &snapshot, now);
        self.absorb_report(&report, now, &mut log);
        self.update_mode(drain_requested);
        self.prune_bookkeeping();

        self.run_actions(now, &mut log)?;

        if log.actions.is_empty() {
            log.actions.push(TickAction::Idle);
        }
        self.stats.incidents = self
            .stats
            .incidents
            .saturating_add(u64::try_from(log.incidents.len()).unwrap_or(u64::MAX));

        Ok(TickSummary {
            tick: self.tick,
            at: now,
            phase: self.phase,
            report,
            actions: log.actions,
            incidents: log.incidents,
            tracked: self.registry.len(),
            grace_pending: self.registry.pending_grace_period_count(),
            placement_in_flight: self.registry.is_placement_in_flight(),
            may_pause: self.registry.may_pause(),
            stats: self.stats.clone(),
        })
    }

    fn run_actions(&mut self, now: Timestamp, log: &mut TickLog) -> Result<(), LoopError> {
        if self.settle(now, log) == Flow::Yield
            || self.resolve_pending_placement(now, log) == Flow::Yield
            || self.track_movement(now, log) == Flow::Yield
        {
            return Ok(());
        }

        let supplies = self.sensor.supplies_remaining();
        self.check_exhaustion(supplies)?;

        let draining = self.is_draining();
        if draining {
            self.maybe_sweep(now, log);
        }
        if self.service_priority(now, supplies, draining, log) == Flow::Yield {
            return Ok(());
        }
        if !draining {
            self.try_place(now, supplies, log);
        }
        Ok(())
    }

    /// Fold the reconcile report into counters and incidents.
    fn absorb_report(&mut self, report: &ReconcileReport, now: Timestamp, log: &mut TickLog) {
        for position in &report.grace_started {
            record_incident(log, Incident::PerceptionGap { position: *position });
        }
        self.stats.graces_expired = self
            .stats
            .graces_expired
            .saturating_add(count(report.grace_expired.len()));
        self.stats.escalations = self
            .stats
            .escalations
            .saturating_add(count(report.escalated.len()));

        for position in report
            .discovered
            .iter()
            .chain(report.transitioned.iter().map(|change| &change.position))
        {
            self.freshness.remove(position);
        }

        let probability = self
            .session
            .as_ref()
            .map_or(0.0, |session| session.settings.expedite_probability);
        for (position, outcome) in &report.newly_resolved {
            if *outcome != Outcome::Success || !self.rng.random_bool(probability) {
                continue;
            }
            if self
                .registry
                .add_flag(*position, PriorityFlag::ExpediteCollection, now)
            {
                self.stats.expedited = self.stats.expedited.saturating_add(1);
                info!(%position, "success flagged for immediate collection");
            }
        }
    }

    /// Drop bookkeeping for traps no longer tracked.
    fn prune_bookkeeping(&mut self) {
        let tracked = self.registry.positions();
        self.freshness.retain(|position, _| tracked.contains(position));
        self.retry_after.retain(|position, _| tracked.contains(position));
    }

    // -----------------------------------------------------------------------
    // Stage: settle
    // -----------------------------------------------------------------------

    fn settle(&mut self, now: Timestamp, log: &mut TickLog) -> Flow {
        let Some(until) = self.settle_until else {
            return Flow::Proceed;
        };
        if now.has_reached(until) {
            self.settle_until = None;
            self.registry.release_placement_latch();
            debug!(at = %now, "settle elapsed, placement latch released");
            return Flow::Proceed;
        }
        log.actions.push(TickAction::Settling { until });
        Flow::Yield
    }

    fn begin_settle(&mut self, now: Timestamp) {
        let delay = self.timing.settle.sample(&mut self.rng);
        self.settle_until = Some(now.plus_millis(delay));
    }

    // -----------------------------------------------------------------------
    // Stage: in-flight placement
    // -----------------------------------------------------------------------

    fn resolve_pending_placement(&mut self, now: Timestamp, log: &mut TickLog) -> Flow {
        let Some(pending) = self.pending_placement else {
            return Flow::Proceed;
        };
        let position = pending.position;

        match self.registry.get(position) {
            None => {
                // Cleared from under us; nothing left to confirm.
                self.pending_placement = None;
                self.registry.release_placement_latch();
                Flow::Proceed
            }
            Some(record) if !record.is_placing() => {
                self.registry.complete_placement(position, true, now);
                self.confirm_placement(position, Confirmation::Perception, now, log);
                Flow::Yield
            }
            Some(_) if now.has_reached(pending.deadline) => {
                let moved = self
                    .sensor
                    .player_position()
                    .is_some_and(|player| player != pending.player_at_start);
                if moved {
                    self.registry.complete_placement(position, true, now);
                    self.confirm_placement(position, Confirmation::Movement, now, log);
                } else {
                    self.registry.complete_placement(position, false, now);
                    self.registry.release_placement_latch();
                    self.pending_placement = None;
                    self.stats.placements_failed = self.stats.placements_failed.saturating_add(1);
                    log.actions.push(TickAction::PlacementFailed { position });
                    warn!(%position, "placement not confirmed before timeout");
                }
                Flow::Yield
            }
            Some(_) => {
                log.actions.push(TickAction::AwaitingPlacement { position });
                Flow::Yield
            }
        }
    }

    fn confirm_placement(&mut self, position: Position, via: Confirmation, now: Timestamp, log: &mut TickLog) {
        self.pending_placement = None;
        self.stats.placements_confirmed = self.stats.placements_confirmed.saturating_add(1);
        self.begin_settle(now);
        log.actions.push(TickAction::PlacementConfirmed { position, via });
        info!(%position, ?via, "placement confirmed");
    }

    // -----------------------------------------------------------------------
    // Stage: movement
    // -----------------------------------------------------------------------

    fn start_move(&mut self, target: Position, purpose: MovePurpose, tolerance: u32, now: Timestamp, log: &mut TickLog) {
        if !self.dispatcher.move_to(target) {
            warn!(%target, ?purpose, "move could not be issued");
            return;
        }
        self.movement = Some(PendingMove {
            target,
            purpose,
            tolerance,
            deadline: now.plus_millis(self.timing.movement_timeout_ms),
        });
        log.actions.push(TickAction::MoveIssued { target, purpose });
        debug!(%target, ?purpose, "move issued");
    }

    fn track_movement(&mut self, now: Timestamp, log: &mut TickLog) -> Flow {
        let Some(pending) = self.movement else {
            return Flow::Proceed;
        };
        let target = pending.target;
        let arrived = self
            .sensor
            .player_position()
            .is_some_and(|player| player.chebyshev_distance(target) <= pending.tolerance);

        if arrived {
            self.movement = None;
            if pending.purpose == MovePurpose::Reposition {
                let cleared = self.registry.clear_flag_everywhere(PriorityFlag::NeedsRepositioning);
                debug!(%target, cleared, "repositioned");
            }
            log.actions.push(TickAction::Arrived {
                target,
                purpose: pending.purpose,
            });
            return Flow::Proceed;
        }
        if now.has_reached(pending.deadline) {
            self.movement = None;
            log.actions.push(TickAction::MovementTimedOut { target });
            warn!(%target, purpose = ?pending.purpose, "movement timed out");
            return Flow::Proceed;
        }
        log.actions.push(TickAction::Moving { target });
        Flow::Yield
    }

    // -----------------------------------------------------------------------
    // Stage: exhaustion and sweep
    // -----------------------------------------------------------------------

    fn check_exhaustion(&mut self, supplies: Option<u32>) -> Result<(), LoopError> {
        let exhausted = supplies == Some(0)
            && self.registry.is_empty()
            && !self.registry.has_pending_grace_periods()
            && !self.registry.is_placement_in_flight()
            && self.pending_placement.is_none();
        if exhausted {
            error!(tick = self.tick, "no supplies left and nothing to service");
            self.stop();
            return Err(LoopError::ResourceExhausted);
        }
        Ok(())
    }

    fn maybe_sweep(&mut self, now: Timestamp, log: &mut TickLog) {
        let due = self.last_sweep.is_none_or(|last| {
            now.millis_since(last) >= self.timing.phantom_sweep_interval_ms
        });
        if !due {
            return;
        }
        self.last_sweep = Some(now);
        let removed = self
            .reconciler
            .sweep_phantoms(&self.registry, self.sensor.as_mut());
        if removed.is_empty() {
            return;
        }
        self.stats.phantoms_removed = self
            .stats
            .phantoms_removed
            .saturating_add(count(removed.len()));
        for position in &removed {
            record_incident(log, Incident::PhantomEntity { position: *position });
        }
        log.actions.push(TickAction::Swept { removed });
    }

    // -----------------------------------------------------------------------
    // Stage: service
    // -----------------------------------------------------------------------

    fn service_priority(&mut self, now: Timestamp, supplies: Option<u32>, draining: bool, log: &mut TickLog) -> Flow {
        let cooling: BTreeSet<Position> = self
            .retry_after
            .iter()
            .filter(|(_, until)| !now.has_reached(**until))
            .map(|(position, _)| *position)
            .collect();
        let Some(entity) = self.registry.highest_priority_actionable_excluding(&cooling) else {
            return Flow::Proceed;
        };

        if entity.actionable_flag() == Some(PriorityFlag::NeedsRepositioning) {
            self.start_move(
                entity.position,
                MovePurpose::Reposition,
                self.dispatch.vantage_tolerance,
                now,
                log,
            );
            return Flow::Yield;
        }

        if self.should_defer(&entity, now, supplies, draining) {
            log.actions.push(TickAction::Deferred {
                position: entity.position,
            });
            debug!(position = %entity.position, state = %entity.life_state, "fresh result deferred");
            return Flow::Proceed;
        }

        let player = self.sensor.player_position();
        let result = self.dispatcher.dispatch(&entity, player, draining);
        self.apply_dispatch(&entity, &result, now, log);
        Flow::Yield
    }

    /// Whether a young result should wait while a new trap is laid.
    fn should_defer(&mut self, entity: &EntityRecord, now: Timestamp, supplies: Option<u32>, draining: bool) -> bool {
        let young_result = matches!(entity.life_state, LifeState::Resolved(_) | LifeState::Collapsed);
        if !young_result
            || draining
            || entity.flags.has_escalation()
            || supplies == Some(0)
            || !self.below_capacity()
            || self.registry.is_placement_in_flight()
        {
            return false;
        }
        let timing = &self.timing;
        let rng = &mut self.rng;
        let threshold = *self
            .freshness
            .entry(entity.position)
            .or_insert_with(|| timing.freshness.sample(rng));
        entity.time_in_state(now) < threshold
    }

    fn apply_dispatch(&mut self, entity: &EntityRecord, result: &DispatchResult, now: Timestamp, log: &mut TickLog) {
        let position = result.position;
        if position != entity.position {
            warn!(expected = %entity.position, acted = %position, "action landed on a different tile");
        }
        match result.outcome {
            InteractionOutcome::Serviced(ServiceKind::Collected) => {
                self.registry.remove(position);
                self.stats.collected = self.stats.collected.saturating_add(1);
            }
            InteractionOutcome::Serviced(ServiceKind::Reset) => {
                self.registry.apply_event(position, LifeEvent::ServicedReset, now);
                self.stats.reset = self.stats.reset.saturating_add(1);
            }
            InteractionOutcome::MovementRequired => {
                self.start_move(
                    entity.position,
                    MovePurpose::Service,
                    self.dispatch.interaction_range,
                    now,
                    log,
                );
                return;
            }
            InteractionOutcome::VerificationNeeded | InteractionOutcome::Failed => {
                self.retry_after
                    .insert(entity.position, now.plus_millis(self.timing.retry_backoff_ms));
                record_incident(
                    log,
                    Incident::InteractionAmbiguous {
                        position: entity.position,
                        outcome: result.outcome,
                    },
                );
            }
        }
        log.actions.push(TickAction::Dispatched {
            position,
            outcome: result.outcome,
            action: result.action,
        });
    }

    // -----------------------------------------------------------------------
    // Stage: placement
    // -----------------------------------------------------------------------

    fn below_capacity(&self) -> bool {
        self.session.as_ref().is_some_and(|session| {
            let capacity = usize::try_from(session.settings.max_entities).unwrap_or(usize::MAX);
            self.registry.len() < capacity
        })
    }

    fn try_place(&mut self, now: Timestamp, supplies: Option<u32>, log: &mut TickLog) {
        if supplies == Some(0) || !self.below_capacity() || self.registry.is_placement_in_flight() {
            return;
        }
        let Some(player) = self.sensor.player_position() else {
            debug!("player position unknown, not placing");
            return;
        };
        let occupied = self.registry.positions();
        let Some(site) = self.session.as_ref().and_then(|session| {
            let zones = &session.settings.zones;
            session
                .strategy
                .propose_next(player, zones, &occupied)
                .filter(|site| session.strategy.is_valid(*site, zones, &occupied))
        }) else {
            debug!(%player, "no placement site available");
            return;
        };

        if player.chebyshev_distance(site) > self.dispatch.arrival_tolerance {
            self.start_move(site, MovePurpose::Place, self.dispatch.arrival_tolerance, now, log);
            return;
        }

        if !self.registry.start_placement(site, now) {
            record_incident(log, Incident::PlacementConflict { position: site });
            return;
        }
        self.stats.placements_started = self.stats.placements_started.saturating_add(1);

        if self.dispatcher.lay() {
            self.pending_placement = Some(PendingPlacement {
                position: site,
                player_at_start: player,
                deadline: now.plus_millis(self.timing.placement_timeout_ms),
            });
            log.actions.push(TickAction::PlacementStarted { position: site });
            info!(position = %site, tracked = self.registry.len(), "placement started");
        } else {
            self.registry.abort_placement(site);
            self.stats.placements_failed = self.stats.placements_failed.saturating_add(1);
            log.actions.push(TickAction::PlacementFailed { position: site });
            warn!(position = %site, "lay action not matched, placement aborted");
        }
    }
}

fn record_incident(log: &mut TickLog, incident: Incident) {
    match &incident {
        Incident::PerceptionGap { position } => debug!(%position, "perception gap"),
        other => warn!(position = %other.position(), incident = ?other, "incident"),
    }
    log.incidents.push(incident);
}

fn count(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}
