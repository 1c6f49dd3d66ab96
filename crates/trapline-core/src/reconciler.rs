//! Perception reconciler: turns per-tick snapshots into registry writes.
//!
//! Each call to [`Reconciler::reconcile`] runs four stages in a fixed order:
//!
//! 1. **Grace expiry.** Ledger entries that ran out collapse their trap
//!    (with `PendingVerification`). Those tiles sit out the rest of the tick.
//! 2. **Diff.** The new snapshot is compared tile by tile against the
//!    previous one and the tracked set. Appearances and changes become
//!    transitions, disappearances open grace periods, and long absences get
//!    a one-time best guess.
//! 3. **Escalation.** Traps that have been collapsed or armed for too long
//!    gain urgency flags. Only a genuine transition clears them.
//! 4. **Roll-over.** The snapshot (plus carried-forward occluded tiles)
//!    becomes the baseline for the next tick.
//!
//! The phantom sweep ([`Reconciler::sweep_phantoms`]) is separate: the
//! scheduler invokes it periodically while draining.

use std::collections::{BTreeMap, BTreeSet};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info, warn};
use trapline_types::{LifeState, Outcome, Position, PriorityFlag, ProbeKind, SignalKind, Timestamp};

use crate::config::TimingConfig;
use crate::registry::{Effect, EntityRegistry, GraceEntry};
use crate::sensor::{PerceptionSensor, Snapshot};
use crate::transition::LifeEvent;

/// A genuine life-state change applied during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateChange {
    /// The trap that changed.
    pub position: Position,
    /// State before.
    pub from: LifeState,
    /// State after.
    pub to: LifeState,
}

/// What one reconciliation did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Traps seen for the first time.
    pub discovered: Vec<Position>,
    /// Genuine state changes of already tracked traps.
    pub transitioned: Vec<StateChange>,
    /// Traps newly observed as resolved, with their outcome.
    pub newly_resolved: Vec<(Position, Outcome)>,
    /// Grace periods opened this tick.
    pub grace_started: Vec<Position>,
    /// Grace periods closed because the signal came back.
    pub grace_cancelled: Vec<Position>,
    /// Grace periods that ran out.
    pub grace_expired: Vec<Position>,
    /// Traps given a best-guess state after the dwell minimum.
    pub verification_flagged: Vec<Position>,
    /// Best guesses rolled back because the signal returned in time.
    pub verification_withdrawn: Vec<Position>,
    /// Escalation flags newly raised.
    pub escalated: Vec<(Position, PriorityFlag)>,
    /// Tracked traps newly hidden from view.
    pub repositioning: Vec<Position>,
}

impl ReconcileReport {
    /// Whether the tick changed nothing.
    pub fn is_quiet(&self) -> bool {
        self.discovered.is_empty()
            && self.transitioned.is_empty()
            && self.grace_started.is_empty()
            && self.grace_cancelled.is_empty()
            && self.grace_expired.is_empty()
            && self.verification_flagged.is_empty()
            && self.verification_withdrawn.is_empty()
            && self.escalated.is_empty()
            && self.repositioning.is_empty()
    }
}

/// Stateful diff engine between perception and the registry.
#[derive(Debug)]
pub struct Reconciler {
    /// Signals as of the previous tick.
    previous: BTreeMap<Position, SignalKind>,
    /// Grace tiers, dwell, and escalation thresholds.
    timing: TimingConfig,
    /// Source of grace-period jitter.
    rng: StdRng,
}

impl Reconciler {
    /// Create a reconciler with a seeded random source.
    pub fn new(timing: TimingConfig, seed: u64) -> Self {
        Self {
            previous: BTreeMap::new(),
            timing,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Signals carried as the baseline for the next tick.
    pub const fn previous(&self) -> &BTreeMap<Position, SignalKind> {
        &self.previous
    }

    /// Fold one snapshot into the registry.
    pub fn reconcile(&mut self, registry: &EntityRegistry, current: &Snapshot, now: Timestamp) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let skipped = self.expire_graces(registry, now, &mut report);
        let carried = self.diff(registry, current, &skipped, now, &mut report);
        self.escalate(registry, now, &mut report);

        let mut next = current.signals.clone();
        for position in &skipped {
            next.remove(position);
        }
        next.extend(carried);
        self.previous = next;

        if !report.is_quiet() {
            debug!(
                discovered = report.discovered.len(),
                transitioned = report.transitioned.len(),
                grace_started = report.grace_started.len(),
                grace_cancelled = report.grace_cancelled.len(),
                grace_expired = report.grace_expired.len(),
                escalated = report.escalated.len(),
                "perception reconciled"
            );
        }
        report
    }

    // -----------------------------------------------------------------------
    // Stage 1: grace expiry
    // -----------------------------------------------------------------------

    fn expire_graces(
        &mut self,
        registry: &EntityRegistry,
        now: Timestamp,
        report: &mut ReconcileReport,
    ) -> BTreeSet<Position> {
        let mut skipped = BTreeSet::new();
        for (position, entry) in registry.take_expired_graces(now) {
            self.previous.remove(&position);
            skipped.insert(position);
            report.grace_expired.push(position);
            let effect = registry.apply_event(position, LifeEvent::GraceExpired, now);
            record_effect(position, effect, report);
            info!(
                %position,
                last_signal = ?entry.last_signal,
                missing_ms = now.millis_since(entry.missing_since),
                "grace period expired, trap presumed collapsed"
            );
        }
        skipped
    }

    // -----------------------------------------------------------------------
    // Stage 2: diff
    // -----------------------------------------------------------------------

    fn diff(
        &mut self,
        registry: &EntityRegistry,
        current: &Snapshot,
        skipped: &BTreeSet<Position>,
        now: Timestamp,
        report: &mut ReconcileReport,
    ) -> BTreeMap<Position, SignalKind> {
        let mut carried = BTreeMap::new();
        let mut universe: BTreeSet<Position> = registry.positions();
        universe.extend(current.signals.keys().copied());
        universe.extend(self.previous.keys().copied());

        for position in universe.difference(skipped).copied() {
            let record = registry.get(position);
            let before = self.previous.get(&position).copied();

            if current.is_occluded(position) {
                if let Some(signal) = before {
                    carried.insert(position, signal);
                }
                if record.is_some() && registry.add_flag(position, PriorityFlag::NeedsRepositioning, now) {
                    report.repositioning.push(position);
                }
                continue;
            }

            match (before, current.signal_at(position)) {
                (Some(seen), Some(signal)) if seen == signal => {
                    registry.touch(position, now);
                    on_visible(registry, position, report);
                }
                (_, Some(signal)) => {
                    on_visible(registry, position, report);
                    let effect = registry.update_from_observation(position, signal.life_state(), now);
                    record_effect(position, effect, report);
                }
                (Some(seen), None) => {
                    let Some(record) = record else { continue };
                    if record.is_placing() || matches!(record.life_state, LifeState::Collapsed) {
                        continue;
                    }
                    let range = if seen == SignalKind::ArmedMarker {
                        self.timing.armed_grace
                    } else {
                        self.timing.grace
                    };
                    let duration_ms = range.sample(&mut self.rng);
                    if registry.begin_grace(position, GraceEntry::new(now, duration_ms, seen)) {
                        report.grace_started.push(position);
                        debug!(%position, duration_ms, last_signal = ?seen, "signal lost, grace started");
                    }
                }
                (None, None) => {
                    let Some(entry) = registry.grace_entry(position) else { continue };
                    if entry.dwell_applied || now.millis_since(entry.missing_since) < self.timing.grace_dwell_ms {
                        continue;
                    }
                    let effect = registry.apply_dwell_guess(position, now);
                    if effect.changed() {
                        report.verification_flagged.push(position);
                    }
                    record_effect(position, effect, report);
                }
            }
        }
        carried
    }

    // -----------------------------------------------------------------------
    // Stage 3: escalation
    // -----------------------------------------------------------------------

    fn escalate(&self, registry: &EntityRegistry, now: Timestamp, report: &mut ReconcileReport) {
        for record in registry.snapshot() {
            let in_state = record.time_in_state(now);
            let flag = match record.life_state {
                LifeState::Collapsed if in_state >= self.timing.collapsed_urgent_ms => {
                    PriorityFlag::UrgentCollapsed
                }
                LifeState::Armed if in_state >= self.timing.armed_critical_ms => {
                    PriorityFlag::CriticalAboutToResolve
                }
                _ => continue,
            };
            if registry.add_flag(record.position, flag, now) {
                report.escalated.push((record.position, flag));
                info!(position = %record.position, %flag, in_state_ms = in_state, "trap escalated");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Phantom sweep
    // -----------------------------------------------------------------------

    /// Probe every tracked, non-placing trap that showed no signal last
    /// tick. Traps with no trace at all are removed.
    ///
    /// Returns the positions removed.
    pub fn sweep_phantoms(
        &mut self,
        registry: &EntityRegistry,
        sensor: &mut dyn PerceptionSensor,
    ) -> Vec<Position> {
        let mut removed = Vec::new();
        for record in registry.snapshot() {
            if record.is_placing() || self.previous.contains_key(&record.position) {
                continue;
            }
            let position = record.position;
            let found = ProbeKind::SWEEP_ORDER
                .into_iter()
                .any(|kind| sensor.probe(position, kind));
            if found {
                continue;
            }
            if registry.remove(position).is_some() {
                warn!(%position, state = %record.life_state, "phantom trap removed");
                removed.push(position);
            }
        }
        removed
    }
}

fn record_effect(position: Position, effect: Effect, report: &mut ReconcileReport) {
    match effect {
        Effect::Created { state } => {
            report.discovered.push(position);
            if let LifeState::Resolved(outcome) = state {
                report.newly_resolved.push((position, outcome));
            }
        }
        Effect::Entered { from, to } => {
            report.transitioned.push(StateChange { position, from, to });
            match (from, to) {
                (LifeState::Resolved(_), _) => {}
                (_, LifeState::Resolved(outcome)) => report.newly_resolved.push((position, outcome)),
                _ => {}
            }
        }
        Effect::Amended | Effect::Removed | Effect::Unchanged => {}
    }
}

/// Common handling for a tile whose signal is visible this tick.
fn on_visible(registry: &EntityRegistry, position: Position, report: &mut ReconcileReport) {
    if let Some(rolled_back) = registry.cancel_grace(position) {
        report.grace_cancelled.push(position);
        if rolled_back {
            report.verification_withdrawn.push(position);
        }
        debug!(%position, rolled_back, "signal returned, grace cancelled");
    }
    registry.remove_flag(position, PriorityFlag::NeedsRepositioning);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pos(x: i32) -> Position {
        Position::new(x, 0, 0)
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(TimingConfig::default(), 11)
    }

    #[test]
    fn appearance_creates_record() {
        let registry = EntityRegistry::new();
        let mut rec = reconciler();
        let snapshot = Snapshot::new().with_signal(pos(1), SignalKind::ArmedMarker);
        let report = rec.reconcile(&registry, &snapshot, Timestamp::ZERO);
        assert_eq!(report.discovered, vec![pos(1)]);
        assert_eq!(registry.get(pos(1)).unwrap().life_state, LifeState::Armed);
    }

    #[test]
    fn signal_change_is_a_direct_transition() {
        let registry = EntityRegistry::new();
        let mut rec = reconciler();
        rec.reconcile(
            &registry,
            &Snapshot::new().with_signal(pos(1), SignalKind::ArmedMarker),
            Timestamp::ZERO,
        );
        let report = rec.reconcile(
            &registry,
            &Snapshot::new().with_signal(pos(1), SignalKind::SuccessMarker),
            Timestamp::from_secs(1),
        );
        assert_eq!(report.newly_resolved, vec![(pos(1), Outcome::Success)]);
        let record = registry.get(pos(1)).unwrap();
        assert!(record.flags.contains(PriorityFlag::ReadyForCollection));
    }

    #[test]
    fn disappearance_starts_armed_tier_grace() {
        let registry = EntityRegistry::new();
        let mut rec = reconciler();
        rec.reconcile(
            &registry,
            &Snapshot::new().with_signal(pos(1), SignalKind::ArmedMarker),
            Timestamp::ZERO,
        );
        let report = rec.reconcile(&registry, &Snapshot::new(), Timestamp::from_millis(600));
        assert_eq!(report.grace_started, vec![pos(1)]);
        let entry = registry.grace_entry(pos(1)).unwrap();
        assert!((2_000..=4_000).contains(&entry.duration_ms));
        assert_eq!(entry.last_signal, SignalKind::ArmedMarker);
    }

    #[test]
    fn collapsed_traps_get_no_grace() {
        let registry = EntityRegistry::new();
        let mut rec = reconciler();
        rec.reconcile(
            &registry,
            &Snapshot::new().with_signal(pos(1), SignalKind::CollapsedMarker),
            Timestamp::ZERO,
        );
        let report = rec.reconcile(&registry, &Snapshot::new(), Timestamp::from_millis(600));
        assert!(report.grace_started.is_empty());
        assert!(!registry.has_pending_grace_periods());
    }

    #[test]
    fn dwell_guess_applies_once() {
        let registry = EntityRegistry::new();
        let mut rec = reconciler();
        rec.reconcile(
            &registry,
            &Snapshot::new().with_signal(pos(1), SignalKind::ArmedMarker),
            Timestamp::ZERO,
        );
        rec.reconcile(&registry, &Snapshot::new(), Timestamp::from_millis(100));
        let early = rec.reconcile(&registry, &Snapshot::new(), Timestamp::from_millis(700));
        assert!(early.verification_flagged.is_empty());

        let report = rec.reconcile(&registry, &Snapshot::new(), Timestamp::from_millis(1_300));
        assert_eq!(report.verification_flagged, vec![pos(1)]);
        let record = registry.get(pos(1)).unwrap();
        assert_eq!(record.life_state, LifeState::Resolved(Outcome::Unknown));
        assert!(record.flags.contains(PriorityFlag::PendingVerification));

        let again = rec.reconcile(&registry, &Snapshot::new(), Timestamp::from_millis(1_900));
        assert!(again.verification_flagged.is_empty());
    }

    #[test]
    fn armed_trap_returning_resolved_after_dwell_is_a_fresh_resolution() {
        let registry = EntityRegistry::new();
        let mut rec = reconciler();
        rec.reconcile(
            &registry,
            &Snapshot::new().with_signal(pos(1), SignalKind::ArmedMarker),
            Timestamp::ZERO,
        );
        rec.reconcile(&registry, &Snapshot::new(), Timestamp::from_millis(100));
        rec.reconcile(&registry, &Snapshot::new(), Timestamp::from_millis(1_300));

        let report = rec.reconcile(
            &registry,
            &Snapshot::new().with_signal(pos(1), SignalKind::FailureMarker),
            Timestamp::from_millis(1_900),
        );
        assert_eq!(report.verification_withdrawn, vec![pos(1)]);
        assert_eq!(report.newly_resolved, vec![(pos(1), Outcome::Failure)]);
        assert_eq!(
            report.transitioned,
            vec![StateChange {
                position: pos(1),
                from: LifeState::Armed,
                to: LifeState::Resolved(Outcome::Failure),
            }]
        );
        let record = registry.get(pos(1)).unwrap();
        assert!(!record.flags.contains(PriorityFlag::PendingVerification));
    }

    #[test]
    fn occluded_tile_carries_signal_and_flags_reposition() {
        let registry = EntityRegistry::new();
        let mut rec = reconciler();
        rec.reconcile(
            &registry,
            &Snapshot::new().with_signal(pos(1), SignalKind::ArmedMarker),
            Timestamp::ZERO,
        );
        let report = rec.reconcile(
            &registry,
            &Snapshot::new().with_occluded(pos(1)),
            Timestamp::from_millis(600),
        );
        assert_eq!(report.repositioning, vec![pos(1)]);
        assert!(report.grace_started.is_empty());
        assert_eq!(rec.previous().get(&pos(1)), Some(&SignalKind::ArmedMarker));

        rec.reconcile(
            &registry,
            &Snapshot::new().with_signal(pos(1), SignalKind::ArmedMarker),
            Timestamp::from_millis(1_200),
        );
        let record = registry.get(pos(1)).unwrap();
        assert!(!record.flags.contains(PriorityFlag::NeedsRepositioning));
    }

    #[test]
    fn escalation_after_thresholds() {
        let registry = EntityRegistry::new();
        let mut rec = reconciler();
        let snapshot = Snapshot::new()
            .with_signal(pos(1), SignalKind::CollapsedMarker)
            .with_signal(pos(2), SignalKind::ArmedMarker);
        rec.reconcile(&registry, &snapshot, Timestamp::ZERO);

        let report = rec.reconcile(&registry, &snapshot, Timestamp::from_secs(61));
        assert_eq!(report.escalated, vec![(pos(2), PriorityFlag::CriticalAboutToResolve)]);

        let report = rec.reconcile(&registry, &snapshot, Timestamp::from_secs(91));
        assert_eq!(report.escalated, vec![(pos(1), PriorityFlag::UrgentCollapsed)]);

        let report = rec.reconcile(&registry, &snapshot, Timestamp::from_secs(120));
        assert!(report.escalated.is_empty());
    }

    #[test]
    fn lingering_marker_does_not_undo_reset() {
        let registry = EntityRegistry::new();
        let mut rec = reconciler();
        let snapshot = Snapshot::new().with_signal(pos(1), SignalKind::FailureMarker);
        rec.reconcile(&registry, &snapshot, Timestamp::ZERO);
        registry.apply_event(pos(1), LifeEvent::ServicedReset, Timestamp::from_secs(1));

        rec.reconcile(&registry, &snapshot, Timestamp::from_millis(1_600));
        assert_eq!(registry.get(pos(1)).unwrap().life_state, LifeState::Resetting);
    }

    struct ProbeStub {
        hit: Option<ProbeKind>,
        probes: Vec<ProbeKind>,
    }

    impl PerceptionSensor for ProbeStub {
        fn snapshot(&mut self) -> Snapshot {
            Snapshot::new()
        }

        fn probe(&mut self, _position: Position, kind: ProbeKind) -> bool {
            self.probes.push(kind);
            self.hit == Some(kind)
        }

        fn player_position(&mut self) -> Option<Position> {
            None
        }

        fn supplies_remaining(&mut self) -> Option<u32> {
            None
        }
    }

    #[test]
    fn sweep_removes_only_traceless_traps() {
        let registry = EntityRegistry::new();
        let mut rec = reconciler();
        registry.update_from_observation(pos(1), LifeState::Collapsed, Timestamp::ZERO);

        let mut sensor = ProbeStub {
            hit: Some(ProbeKind::ModelPixels),
            probes: Vec::new(),
        };
        assert!(rec.sweep_phantoms(&registry, &mut sensor).is_empty());
        assert_eq!(sensor.probes, ProbeKind::SWEEP_ORDER.to_vec());

        let mut sensor = ProbeStub {
            hit: None,
            probes: Vec::new(),
        };
        assert_eq!(rec.sweep_phantoms(&registry, &mut sensor), vec![pos(1)]);
        assert!(registry.is_empty());
    }

    #[test]
    fn sweep_skips_placing_and_visible_traps() {
        let registry = EntityRegistry::new();
        let mut rec = reconciler();
        registry.start_placement(pos(1), Timestamp::ZERO);
        rec.reconcile(
            &registry,
            &Snapshot::new().with_signal(pos(2), SignalKind::ArmedMarker),
            Timestamp::ZERO,
        );
        let mut sensor = ProbeStub {
            hit: None,
            probes: Vec::new(),
        };
        assert!(rec.sweep_phantoms(&registry, &mut sensor).is_empty());
        assert!(sensor.probes.is_empty());
        assert_eq!(registry.len(), 2);
    }
}
