//! Simulated trap field for dry runs.
//!
//! [`SimulatedField`] implements both [`PerceptionSensor`] and
//! [`Actuator`] over one shared, seeded model, so the scheduler can run
//! end to end without a game client. Armed traps resolve after a random
//! arming time and resolved traps collapse if left alone. Signals drop out
//! or are hidden with configured probabilities.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::debug;
use trapline_core::clock::Clock;
use trapline_core::config::MillisRange;
use trapline_core::dispatch::{ActuationOutcome, Actuator, TargetArea};
use trapline_core::sensor::{PerceptionSensor, Snapshot};
use trapline_types::{Position, ProbeKind, SignalKind, Timestamp};

use crate::error::EngineError;

/// Furthest a trap can be handled from.
const REACH: u32 = 1;

/// The inventory entry that lays a trap.
const LAY: &str = "Lay";

// -----------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------

/// The `simulation` section of `trapline-config.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Where the player stands when the run starts.
    #[serde(default = "default_player_start")]
    pub player_start: Position,

    /// Traps in the inventory at the start.
    #[serde(default = "default_supplies")]
    pub supplies: u32,

    /// How long a trap stays armed before it resolves.
    #[serde(default = "default_arming")]
    pub arming: MillisRange,

    /// Probability that a trap resolves as a success.
    #[serde(default = "default_success_ratio")]
    pub success_ratio: f64,

    /// How long a resolved trap is left before it collapses.
    #[serde(default = "default_collapse_after")]
    pub collapse_after: MillisRange,

    /// Per-trap, per-snapshot probability that its marker is not seen.
    #[serde(default = "default_signal_dropout")]
    pub signal_dropout: f64,

    /// Per-trap, per-snapshot probability that its tile is hidden.
    #[serde(default = "default_occlusion")]
    pub occlusion: f64,

    /// Tiles the player covers per snapshot while walking.
    #[serde(default = "default_walk_tiles_per_tick")]
    pub walk_tiles_per_tick: u32,

    /// Stop after this many ticks (0 = unlimited).
    #[serde(default)]
    pub max_ticks: u64,

    /// Confirm the configured session settings without waiting for the
    /// operator.
    #[serde(default = "default_true")]
    pub auto_confirm: bool,

    /// Request a drain once this tick is reached.
    #[serde(default)]
    pub drain_after_ticks: Option<u64>,

    /// Stop the run once a drain has emptied the field.
    #[serde(default = "default_true")]
    pub stop_when_drained: bool,

    /// Seed for the field model. `None` draws from the OS.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            player_start: default_player_start(),
            supplies: default_supplies(),
            arming: default_arming(),
            success_ratio: default_success_ratio(),
            collapse_after: default_collapse_after(),
            signal_dropout: default_signal_dropout(),
            occlusion: default_occlusion(),
            walk_tiles_per_tick: default_walk_tiles_per_tick(),
            max_ticks: 0,
            auto_confirm: true,
            drain_after_ticks: None,
            stop_when_drained: true,
            seed: None,
        }
    }
}

const fn default_player_start() -> Position {
    Position::new(3202, 3202, 0)
}

const fn default_supplies() -> u32 {
    5
}

const fn default_arming() -> MillisRange {
    MillisRange::new(20_000, 60_000)
}

const fn default_success_ratio() -> f64 {
    0.6
}

const fn default_collapse_after() -> MillisRange {
    MillisRange::new(40_000, 90_000)
}

const fn default_signal_dropout() -> f64 {
    0.05
}

const fn default_occlusion() -> f64 {
    0.02
}

const fn default_walk_tiles_per_tick() -> u32 {
    2
}

const fn default_true() -> bool {
    true
}

fn invalid(reason: impl Into<String>) -> EngineError {
    EngineError::Simulation { reason: reason.into() }
}

impl SimulationConfig {
    /// Read the `simulation` section of the config file at `path`.
    ///
    /// A missing file or section yields defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("failed to read config file: {e}")))?;
        Self::parse(&contents)
    }

    /// Parse the `simulation` section out of a full config document.
    pub fn parse(yaml: &str) -> Result<Self, EngineError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: serde_yml::Value =
            serde_yml::from_str(yaml).map_err(|e| invalid(format!("failed to parse config YAML: {e}")))?;
        let config: Self = match raw.get("simulation") {
            Some(section) => serde_yml::from_value(section.clone())
                .map_err(|e| invalid(format!("failed to parse simulation config: {e}")))?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject probabilities outside `0.0..=1.0`, inverted ranges, and a
    /// player who cannot walk.
    pub fn validate(&self) -> Result<(), EngineError> {
        let probabilities = [
            ("success_ratio", self.success_ratio),
            ("signal_dropout", self.signal_dropout),
            ("occlusion", self.occlusion),
        ];
        for (name, p) in probabilities {
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid(format!("simulation.{name} must be within 0.0..=1.0")));
            }
        }
        for (name, range) in [("arming", self.arming), ("collapse_after", self.collapse_after)] {
            if range.min_ms > range.max_ms {
                return Err(invalid(format!("simulation.{name} has min_ms above max_ms")));
            }
        }
        if self.walk_tiles_per_tick == 0 {
            return Err(invalid("simulation.walk_tiles_per_tick must be at least 1"));
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------
// Field model
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Trap {
    signal: SignalKind,
    /// When the trap next changes on its own.
    changes_at: Option<Timestamp>,
}

#[derive(Debug)]
struct FieldInner {
    traps: BTreeMap<Position, Trap>,
    player: Position,
    destination: Option<Position>,
    supplies: u32,
    rng: StdRng,
}

impl FieldInner {
    fn evolve(&mut self, config: &SimulationConfig, now: Timestamp) {
        let Self { traps, rng, .. } = self;
        for (position, trap) in traps.iter_mut() {
            let Some(at) = trap.changes_at else { continue };
            if !now.has_reached(at) {
                continue;
            }
            match trap.signal {
                SignalKind::ArmedMarker => {
                    trap.signal = if rng.random_bool(config.success_ratio) {
                        SignalKind::SuccessMarker
                    } else {
                        SignalKind::FailureMarker
                    };
                    trap.changes_at = Some(now.plus_millis(config.collapse_after.sample(rng)));
                }
                SignalKind::SuccessMarker | SignalKind::FailureMarker => {
                    trap.signal = SignalKind::CollapsedMarker;
                    trap.changes_at = None;
                }
                SignalKind::CollapsedMarker => trap.changes_at = None,
            }
            debug!(%position, signal = ?trap.signal, "field trap changed");
        }
    }

    fn walk(&mut self, tiles: u32) {
        let Some(target) = self.destination else { return };
        self.player = step_toward(self.player, target, tiles);
        if self.player == target {
            self.destination = None;
        }
    }

    fn arm(&mut self, position: Position, config: &SimulationConfig, now: Timestamp) {
        let changes_at = now.plus_millis(config.arming.sample(&mut self.rng));
        self.traps.insert(
            position,
            Trap {
                signal: SignalKind::ArmedMarker,
                changes_at: Some(changes_at),
            },
        );
    }

    fn lay(&mut self, candidates: &[&str], config: &SimulationConfig, now: Timestamp) -> ActuationOutcome {
        if self.supplies == 0 {
            return ActuationOutcome::default();
        }
        let at = self.player;
        if !candidates.contains(&LAY) || self.traps.contains_key(&at) {
            return ActuationOutcome {
                matched: None,
                menu_entries: vec![LAY.to_owned()],
                acted_at: None,
            };
        }
        self.supplies = self.supplies.saturating_sub(1);
        self.arm(at, config, now);
        self.player = at.offset(-1, 0);
        self.destination = None;
        ActuationOutcome {
            matched: Some(LAY.to_owned()),
            menu_entries: vec![LAY.to_owned()],
            acted_at: Some(at),
        }
    }

    fn interact(
        &mut self,
        position: Position,
        candidates: &[&str],
        config: &SimulationConfig,
        now: Timestamp,
    ) -> ActuationOutcome {
        if self.player.chebyshev_distance(position) > REACH {
            return ActuationOutcome::default();
        }
        let Some(trap) = self.traps.get(&position).copied() else {
            return ActuationOutcome::default();
        };
        let menu = menu_for(trap.signal);
        let menu_entries = menu.iter().map(|entry| (*entry).to_owned()).collect();
        let Some(choice) = menu.iter().copied().find(|entry| candidates.contains(entry)) else {
            return ActuationOutcome {
                matched: None,
                menu_entries,
                acted_at: Some(position),
            };
        };

        if choice.starts_with("Reset") || choice.starts_with(LAY) {
            self.arm(position, config, now);
        } else {
            self.traps.remove(&position);
            self.supplies = self.supplies.saturating_add(1);
        }
        debug!(%position, choice, "field interaction");
        ActuationOutcome {
            matched: Some(choice.to_owned()),
            menu_entries,
            acted_at: Some(position),
        }
    }
}

/// Right-click menu shown for a trap. Entries carry the object name, so
/// bare verbs only match by prefix.
const fn menu_for(signal: SignalKind) -> &'static [&'static str] {
    match signal {
        SignalKind::ArmedMarker => &["Dismantle trap", "Investigate"],
        SignalKind::SuccessMarker => &["Check trap", "Reset trap", "Dismantle trap"],
        SignalKind::FailureMarker => &["Reset trap", "Dismantle trap"],
        SignalKind::CollapsedMarker => &["Take trap", "Lay trap"],
    }
}

fn step_toward(from: Position, to: Position, tiles: u32) -> Position {
    let reach = i32::try_from(tiles).unwrap_or(i32::MAX);
    let dx = to.x.saturating_sub(from.x).clamp(reach.saturating_neg(), reach);
    let dy = to.y.saturating_sub(from.y).clamp(reach.saturating_neg(), reach);
    Position::new(from.x.saturating_add(dx), from.y.saturating_add(dy), to.plane)
}

/// A seeded trap field that is both the loop's sensor and its hands.
///
/// Clones share one model: hand one clone to the scheduler as its sensor
/// and another as its actuator.
#[derive(Clone)]
pub struct SimulatedField {
    inner: Arc<Mutex<FieldInner>>,
    config: Arc<SimulationConfig>,
    clock: Arc<dyn Clock>,
}

impl SimulatedField {
    /// Create a field with the player at `config.player_start` and an
    /// empty ground.
    pub fn new(config: SimulationConfig, clock: Arc<dyn Clock>) -> Self {
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let inner = FieldInner {
            traps: BTreeMap::new(),
            player: config.player_start,
            destination: None,
            supplies: config.supplies,
            rng: StdRng::seed_from_u64(seed),
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            config: Arc::new(config),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FieldInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Where the player stands.
    pub fn player(&self) -> Position {
        self.lock().player
    }

    /// Traps left in the inventory.
    pub fn supplies(&self) -> u32 {
        self.lock().supplies
    }

    /// Traps on the ground.
    pub fn trap_count(&self) -> usize {
        self.lock().traps.len()
    }

    /// The true marker at `position`, ignoring dropout and occlusion.
    #[cfg(test)]
    pub fn marker_at(&self, position: Position) -> Option<SignalKind> {
        self.lock().traps.get(&position).map(|trap| trap.signal)
    }
}

impl PerceptionSensor for SimulatedField {
    fn snapshot(&mut self) -> Snapshot {
        let now = self.clock.now();
        let config = Arc::clone(&self.config);
        let mut inner = self.lock();
        inner.evolve(&config, now);
        inner.walk(config.walk_tiles_per_tick);

        let FieldInner { traps, rng, .. } = &mut *inner;
        let mut snapshot = Snapshot::new();
        for (position, trap) in traps.iter() {
            if rng.random_bool(config.occlusion) {
                snapshot.occluded.insert(*position);
            } else if !rng.random_bool(config.signal_dropout) {
                snapshot.signals.insert(*position, trap.signal);
            }
        }
        snapshot
    }

    fn probe(&mut self, position: Position, kind: ProbeKind) -> bool {
        let Some(trap) = self.lock().traps.get(&position).copied() else {
            return false;
        };
        match kind {
            ProbeKind::TerminalMarker => trap.signal != SignalKind::ArmedMarker,
            ProbeKind::ArmedMarker => trap.signal == SignalKind::ArmedMarker,
            ProbeKind::ModelPixels => true,
        }
    }

    fn player_position(&mut self) -> Option<Position> {
        Some(self.lock().player)
    }

    fn supplies_remaining(&mut self) -> Option<u32> {
        Some(self.lock().supplies)
    }
}

impl Actuator for SimulatedField {
    fn perform_action(&mut self, target: TargetArea, candidates: &[&str]) -> ActuationOutcome {
        let now = self.clock.now();
        let config = Arc::clone(&self.config);
        let mut inner = self.lock();
        match target {
            TargetArea::Inventory => inner.lay(candidates, &config, now),
            TargetArea::Tile(position) => inner.interact(position, candidates, &config, now),
        }
    }

    fn move_to(&mut self, destination: Position) -> bool {
        self.lock().destination = Some(destination);
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use trapline_core::clock::ManualClock;
    use trapline_core::config::{DispatchConfig, SessionConfig, TimingConfig};
    use trapline_core::dispatch::{Action, InteractionDispatcher, InteractionOutcome, ServiceKind};
    use trapline_core::registry::EntityRegistry;
    use trapline_core::scheduler::Scheduler;
    use trapline_types::{EntityRecord, FlagSet, LifeState, Outcome};

    use super::*;

    fn quiet_config() -> SimulationConfig {
        SimulationConfig {
            player_start: Position::new(10, 10, 0),
            supplies: 3,
            arming: MillisRange::new(1_000, 1_000),
            success_ratio: 1.0,
            collapse_after: MillisRange::new(2_000, 2_000),
            signal_dropout: 0.0,
            occlusion: 0.0,
            seed: Some(5),
            ..SimulationConfig::default()
        }
    }

    fn field(config: SimulationConfig) -> (SimulatedField, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Timestamp::ZERO));
        let shared: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;
        (SimulatedField::new(config, shared), clock)
    }

    #[test]
    fn laying_consumes_supplies_and_steps_west() {
        let (mut field, _clock) = field(quiet_config());
        let outcome = field.perform_action(TargetArea::Inventory, &["Lay"]);
        assert_eq!(outcome.matched.as_deref(), Some("Lay"));
        assert_eq!(outcome.acted_at, Some(Position::new(10, 10, 0)));
        assert_eq!(field.player(), Position::new(9, 10, 0));
        assert_eq!(field.supplies(), 2);
        assert_eq!(field.marker_at(Position::new(10, 10, 0)), Some(SignalKind::ArmedMarker));
    }

    #[test]
    fn empty_inventory_cannot_lay() {
        let (mut field, _clock) = field(SimulationConfig {
            supplies: 0,
            ..quiet_config()
        });
        let outcome = field.perform_action(TargetArea::Inventory, &["Lay"]);
        assert!(outcome.matched.is_none());
        assert_eq!(field.trap_count(), 0);
    }

    #[test]
    fn traps_resolve_then_collapse() {
        let (mut field, clock) = field(quiet_config());
        field.perform_action(TargetArea::Inventory, &["Lay"]);
        let at = Position::new(10, 10, 0);

        clock.advance(1_000);
        assert_eq!(field.snapshot().signal_at(at), Some(SignalKind::SuccessMarker));
        clock.advance(2_000);
        assert_eq!(field.snapshot().signal_at(at), Some(SignalKind::CollapsedMarker));
        assert!(field.probe(at, ProbeKind::TerminalMarker));
        assert!(!field.probe(at, ProbeKind::ArmedMarker));
    }

    #[test]
    fn walking_covers_a_few_tiles_per_snapshot() {
        let (mut field, _clock) = field(quiet_config());
        assert!(field.move_to(Position::new(15, 10, 0)));
        field.snapshot();
        assert_eq!(field.player(), Position::new(12, 10, 0));
        field.snapshot();
        field.snapshot();
        assert_eq!(field.player(), Position::new(15, 10, 0));
    }

    #[test]
    fn dispatcher_resolves_menu_by_prefix() {
        let (mut field, clock) = field(quiet_config());
        field.perform_action(TargetArea::Inventory, &["Lay"]);
        clock.advance(1_000);
        field.snapshot();

        let at = Position::new(10, 10, 0);
        let record = EntityRecord::new(at, LifeState::Resolved(Outcome::Success), FlagSet::new(), clock.now());
        let mut dispatcher = InteractionDispatcher::new(Box::new(field.clone()), 3, 1);
        let result = dispatcher.dispatch(&record, Some(field.player()), false);

        assert_eq!(result.outcome, InteractionOutcome::Serviced(ServiceKind::Reset));
        assert_eq!(result.action, Some(Action::Reset));
        assert_eq!(field.marker_at(at), Some(SignalKind::ArmedMarker));
    }

    #[test]
    fn out_of_reach_interaction_does_nothing() {
        let (mut field, _clock) = field(quiet_config());
        field.perform_action(TargetArea::Inventory, &["Lay"]);
        field.move_to(Position::new(5, 10, 0));
        field.snapshot();
        field.snapshot();
        field.snapshot();
        let outcome = field.perform_action(TargetArea::Tile(Position::new(10, 10, 0)), &["Dismantle trap"]);
        assert!(outcome.matched.is_none());
        assert!(outcome.menu_entries.is_empty());
        assert_eq!(field.trap_count(), 1);
    }

    #[test]
    fn simulation_section_is_optional() {
        assert_eq!(SimulationConfig::parse("").unwrap(), SimulationConfig::default());
        let config = SimulationConfig::parse("session:\n  max_entities: 2\n").unwrap();
        assert_eq!(config, SimulationConfig::default());

        let config = SimulationConfig::parse("simulation:\n  supplies: 9\n  seed: 3\n").unwrap();
        assert_eq!(config.supplies, 9);
        assert_eq!(config.seed, Some(3));
    }

    #[test]
    fn bad_probability_is_rejected() {
        let result = SimulationConfig::parse("simulation:\n  signal_dropout: 1.5\n");
        assert!(matches!(result, Err(EngineError::Simulation { .. })));
    }

    #[test]
    fn scheduler_runs_the_field_end_to_end() {
        let (field, clock) = field(SimulationConfig {
            player_start: Position::new(3202, 3202, 0),
            supplies: 5,
            seed: Some(11),
            ..SimulationConfig::default()
        });
        let mut scheduler = Scheduler::new(
            Arc::new(EntityRegistry::new()),
            Box::new(field.clone()),
            Box::new(field.clone()),
            TimingConfig::default(),
            DispatchConfig::default(),
        );
        let settings = SessionConfig {
            seed: Some(7),
            ..SessionConfig::default()
        };
        scheduler.configure(settings, clock.now()).unwrap();

        for _ in 0..300 {
            let summary = scheduler.step(clock.advance(600), false).unwrap();
            assert!(summary.tracked <= 3);
        }
        let stats = scheduler.stats();
        assert!(stats.placements_confirmed >= 3);
        assert!(stats.collected.saturating_add(stats.reset) > 0);
        assert!(field.trap_count() <= 3);
    }
}
