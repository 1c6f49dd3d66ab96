//! The entity registry: the authoritative store of tracked traps.
//!
//! Records are keyed by [`Position`] and replaced wholesale on every write,
//! so a record handed out by [`EntityRegistry::get`] or
//! [`EntityRegistry::snapshot`] is an immutable copy. All writes go through
//! the transition table in [`crate::transition`].
//!
//! # Concurrency
//!
//! - Records and the grace-period ledger share one [`Mutex`], so a reader
//!   never sees a record without its ledger entry or vice versa.
//! - The single-writer placement latch is a separate [`AtomicBool`] claimed
//!   with compare-and-set. At most one trap can be `Placing` at a time.
//! - Lock poisoning is recovered from: the inner maps are always left in a
//!   consistent state between statements.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;
use trapline_types::{EntityRecord, FlagSet, LifeState, Position, PriorityFlag, SignalKind, Timestamp};

use crate::transition::{self, LifeEvent, Transition};

/// Result of a registry write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// A new record was created.
    Created {
        /// State of the new record.
        state: LifeState,
    },
    /// The record entered a new life state.
    Entered {
        /// State before the write.
        from: LifeState,
        /// State after the write.
        to: LifeState,
    },
    /// Only the flags changed.
    Amended,
    /// The record was deleted.
    Removed,
    /// Nothing changed (or there was nothing to change).
    Unchanged,
}

impl Effect {
    /// Whether the write changed anything at all.
    pub const fn changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// The record as it stood before a dwell best-guess replaced it.
///
/// Kept on the grace entry so a signal that returns before expiry can
/// restore the record untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DwellGuess {
    /// The record before the guess.
    pub original: EntityRecord,
    /// Life state written by the guess.
    pub guessed_state: LifeState,
    /// `state_entered_at` of the record after the guess.
    pub guessed_entered_at: Timestamp,
}

/// One pending grace period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraceEntry {
    /// When the signal was last seen missing for the first time.
    pub missing_since: Timestamp,
    /// Randomized length of this grace period.
    pub duration_ms: u64,
    /// The signal seen just before it disappeared.
    pub last_signal: SignalKind,
    /// Whether the dwell best-guess has been applied.
    pub dwell_applied: bool,
    /// What the best-guess replaced, if it changed anything.
    pub dwell_guess: Option<DwellGuess>,
}

impl GraceEntry {
    /// Start a grace period at `now`.
    pub const fn new(missing_since: Timestamp, duration_ms: u64, last_signal: SignalKind) -> Self {
        Self {
            missing_since,
            duration_ms,
            last_signal,
            dwell_applied: false,
            dwell_guess: None,
        }
    }

    /// When the grace period runs out.
    pub const fn expires_at(&self) -> Timestamp {
        self.missing_since.plus_millis(self.duration_ms)
    }

    /// Whether the grace period has run out at `now`.
    pub const fn is_expired(&self, now: Timestamp) -> bool {
        now.has_reached(self.expires_at())
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    records: BTreeMap<Position, EntityRecord>,
    grace: BTreeMap<Position, GraceEntry>,
}

/// Concurrent-safe store of every tracked trap.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    /// Records and grace ledger.
    inner: Mutex<RegistryInner>,
    /// Held while a placement is in flight or settling.
    placement_latch: AtomicBool,
}

impl EntityRegistry {
    /// Create an empty registry with the latch released.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Placement latch
    // -----------------------------------------------------------------------

    /// Claim the placement latch and record a `Placing` trap at `position`.
    ///
    /// Returns `false` without touching anything if another placement holds
    /// the latch. Any existing record on the tile is overwritten.
    pub fn start_placement(&self, position: Position, now: Timestamp) -> bool {
        if self
            .placement_latch
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(%position, "placement latch already held");
            return false;
        }
        let mut inner = self.lock();
        inner.grace.remove(&position);
        let placed = inner.records.get(&position).map_or_else(
            || transition::apply(None, &FlagSet::new(), LifeEvent::PlacementStarted),
            |record| transition::apply(Some(record.life_state), &record.flags, LifeEvent::PlacementStarted),
        );
        if let Transition::Enter { state, flags } = placed {
            inner
                .records
                .insert(position, EntityRecord::new(position, state, flags, now));
        }
        debug!(%position, "placement started");
        true
    }

    /// Settle a placement.
    ///
    /// On success the record becomes `Armed` (or merely loses its
    /// placement flag if perception already confirmed it). On failure a
    /// still-placing record is removed. The latch stays held either way;
    /// release it with [`release_placement_latch`](Self::release_placement_latch).
    pub fn complete_placement(&self, position: Position, success: bool, now: Timestamp) -> Effect {
        let mut inner = self.lock();
        if success {
            return write_event(&mut inner, position, LifeEvent::PlacementConfirmed, now);
        }
        let placing = inner
            .records
            .get(&position)
            .is_some_and(EntityRecord::is_placing);
        if placing {
            inner.records.remove(&position);
            inner.grace.remove(&position);
            return Effect::Removed;
        }
        Effect::Unchanged
    }

    /// Remove a still-placing record and release the latch in one step.
    pub fn abort_placement(&self, position: Position) {
        {
            let mut inner = self.lock();
            if inner
                .records
                .get(&position)
                .is_some_and(EntityRecord::is_placing)
            {
                inner.records.remove(&position);
                inner.grace.remove(&position);
            }
            self.placement_latch.store(false, Ordering::Release);
        }
        debug!(%position, "placement aborted");
    }

    /// Release the placement latch.
    pub fn release_placement_latch(&self) {
        self.placement_latch.store(false, Ordering::Release);
    }

    /// Whether the placement latch is held.
    pub fn is_placement_in_flight(&self) -> bool {
        self.placement_latch.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Observation and events
    // -----------------------------------------------------------------------

    /// Fold one observation into the registry.
    ///
    /// Creates the record if absent. A differing state is a genuine
    /// transition (fresh flags, `state_entered_at` reset); an identical one
    /// only refreshes `last_observed_at`.
    pub fn update_from_observation(&self, position: Position, observed: LifeState, now: Timestamp) -> Effect {
        let mut inner = self.lock();
        if !inner.records.contains_key(&position) {
            let flags = transition::canonical_flags(observed);
            inner
                .records
                .insert(position, EntityRecord::new(position, observed, flags, now));
            return Effect::Created { state: observed };
        }
        let effect = write_event(&mut inner, position, LifeEvent::Observed(observed), now);
        if let Some(record) = inner.records.get(&position) {
            let refreshed = EntityRecord {
                last_observed_at: now,
                ..record.clone()
            };
            inner.records.insert(position, refreshed);
        }
        effect
    }

    /// Refresh `last_observed_at` without evaluating the signal.
    pub fn touch(&self, position: Position, now: Timestamp) {
        let mut inner = self.lock();
        if let Some(record) = inner.records.get(&position) {
            let refreshed = EntityRecord {
                last_observed_at: now,
                ..record.clone()
            };
            inner.records.insert(position, refreshed);
        }
    }

    /// Apply a life event to an existing record.
    ///
    /// Events for untracked tiles are nothing to do.
    pub fn apply_event(&self, position: Position, event: LifeEvent, now: Timestamp) -> Effect {
        write_event(&mut self.lock(), position, event, now)
    }

    /// Add a flag to a tracked entity. Returns `true` if it was new.
    pub fn add_flag(&self, position: Position, flag: PriorityFlag, now: Timestamp) -> bool {
        self.apply_event(position, LifeEvent::Escalate(flag), now)
            .changed()
    }

    /// Remove a flag from a tracked entity. Returns `true` if it was present.
    pub fn remove_flag(&self, position: Position, flag: PriorityFlag) -> bool {
        let mut inner = self.lock();
        let Some(record) = inner.records.get(&position) else {
            return false;
        };
        if !record.flags.contains(flag) {
            return false;
        }
        let mut flags = record.flags.clone();
        flags.remove(flag);
        let replaced = EntityRecord {
            flags,
            ..record.clone()
        };
        inner.records.insert(position, replaced);
        true
    }

    /// Remove `flag` from every entity. Returns how many lost it.
    pub fn clear_flag_everywhere(&self, flag: PriorityFlag) -> usize {
        let mut inner = self.lock();
        let mut cleared: usize = 0;
        for record in inner.records.values_mut() {
            if record.flags.contains(flag) {
                let mut flags = record.flags.clone();
                flags.remove(flag);
                *record = EntityRecord {
                    flags,
                    ..record.clone()
                };
                cleared = cleared.saturating_add(1);
            }
        }
        cleared
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Delete a record and any grace entry. Returns the removed record.
    pub fn remove(&self, position: Position) -> Option<EntityRecord> {
        let mut inner = self.lock();
        inner.grace.remove(&position);
        inner.records.remove(&position)
    }

    /// Delete every record and grace entry, and release the latch.
    pub fn clear_all(&self) {
        let mut inner = self.lock();
        inner.records.clear();
        inner.grace.clear();
        self.placement_latch.store(false, Ordering::Release);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Copy of the record at `position`.
    pub fn get(&self, position: Position) -> Option<EntityRecord> {
        self.lock().records.get(&position).cloned()
    }

    /// Copies of every record, ordered by position.
    pub fn snapshot(&self) -> Vec<EntityRecord> {
        self.lock().records.values().cloned().collect()
    }

    /// Every tracked position.
    pub fn positions(&self) -> BTreeSet<Position> {
        self.lock().records.keys().copied().collect()
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Whether no entity is tracked.
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// The entity owed action most urgently.
    ///
    /// Lowest flag priority wins; ties go to the entity that entered its
    /// state earliest, then to the lowest position.
    pub fn highest_priority_actionable(&self) -> Option<EntityRecord> {
        self.highest_priority_actionable_excluding(&BTreeSet::new())
    }

    /// Like [`highest_priority_actionable`](Self::highest_priority_actionable)
    /// but skipping the given positions.
    pub fn highest_priority_actionable_excluding(&self, skip: &BTreeSet<Position>) -> Option<EntityRecord> {
        let inner = self.lock();
        inner
            .records
            .values()
            .filter(|record| !skip.contains(&record.position))
            .filter_map(|record| {
                record
                    .actionable_flag()
                    .map(|flag| ((flag.priority(), record.state_entered_at, record.position), record))
            })
            .min_by_key(|(key, _)| *key)
            .map(|(_, record)| record.clone())
    }

    /// Whether the session may pause: nothing tracked and no grace pending.
    pub fn may_pause(&self) -> bool {
        let inner = self.lock();
        inner.records.is_empty() && inner.grace.is_empty()
    }

    // -----------------------------------------------------------------------
    // Grace ledger
    // -----------------------------------------------------------------------

    /// Whether any grace period is running.
    pub fn has_pending_grace_periods(&self) -> bool {
        !self.lock().grace.is_empty()
    }

    /// Number of running grace periods.
    pub fn pending_grace_period_count(&self) -> usize {
        self.lock().grace.len()
    }

    /// The grace entry for `position`, if one is running.
    pub fn grace_entry(&self, position: Position) -> Option<GraceEntry> {
        self.lock().grace.get(&position).cloned()
    }

    /// Start a grace period for a tracked entity.
    ///
    /// Returns `false` if the entity is untracked or already in grace.
    pub(crate) fn begin_grace(&self, position: Position, entry: GraceEntry) -> bool {
        let mut inner = self.lock();
        if !inner.records.contains_key(&position) || inner.grace.contains_key(&position) {
            return false;
        }
        inner.grace.insert(position, entry);
        true
    }

    /// Cancel a running grace period because the signal came back.
    ///
    /// A dwell best-guess made during the grace period is rolled back
    /// unless the record has genuinely changed state since. Returns `None`
    /// if no grace period was running, otherwise whether a guess was rolled
    /// back.
    pub(crate) fn cancel_grace(&self, position: Position) -> Option<bool> {
        let mut inner = self.lock();
        let entry = inner.grace.remove(&position)?;
        let Some(guess) = entry.dwell_guess else {
            return Some(false);
        };
        let untouched = inner.records.get(&position).is_some_and(|record| {
            record.life_state == guess.guessed_state && record.state_entered_at == guess.guessed_entered_at
        });
        if untouched {
            inner.records.insert(position, guess.original);
        }
        Some(untouched)
    }

    /// Apply the dwell best-guess for `position` once, remembering the
    /// record it replaced.
    ///
    /// Does nothing if no grace period is running or the guess was already
    /// made.
    pub(crate) fn apply_dwell_guess(&self, position: Position, now: Timestamp) -> Effect {
        let mut inner = self.lock();
        let original = match (inner.grace.get(&position), inner.records.get(&position)) {
            (Some(entry), Some(record)) if !entry.dwell_applied => record.clone(),
            _ => return Effect::Unchanged,
        };
        let effect = write_event(&mut inner, position, LifeEvent::SignalLost, now);
        let guess = inner
            .records
            .get(&position)
            .filter(|_| effect.changed())
            .map(|record| DwellGuess {
                original,
                guessed_state: record.life_state,
                guessed_entered_at: record.state_entered_at,
            });
        if let Some(entry) = inner.grace.get_mut(&position) {
            entry.dwell_applied = true;
            entry.dwell_guess = guess;
        }
        effect
    }

    /// Remove and return every grace entry that has run out at `now`.
    pub(crate) fn take_expired_graces(&self, now: Timestamp) -> Vec<(Position, GraceEntry)> {
        let mut inner = self.lock();
        let expired: Vec<Position> = inner
            .grace
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(position, _)| *position)
            .collect();
        expired
            .into_iter()
            .filter_map(|position| inner.grace.remove(&position).map(|entry| (position, entry)))
            .collect()
    }
}

/// Run `event` through the transition table and write the result.
fn write_event(inner: &mut RegistryInner, position: Position, event: LifeEvent, now: Timestamp) -> Effect {
    let Some(record) = inner.records.get(&position) else {
        return Effect::Unchanged;
    };
    match transition::apply(Some(record.life_state), &record.flags, event) {
        Transition::Enter { state, flags } => {
            let from = record.life_state;
            let replaced = EntityRecord {
                life_state: state,
                flags,
                state_entered_at: now,
                ..record.clone()
            };
            inner.records.insert(position, replaced);
            Effect::Entered { from, to: state }
        }
        Transition::Amend { flags } => {
            let replaced = EntityRecord {
                flags,
                ..record.clone()
            };
            inner.records.insert(position, replaced);
            Effect::Amended
        }
        Transition::Unchanged => Effect::Unchanged,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use trapline_types::Outcome;

    use super::*;

    fn pos(x: i32) -> Position {
        Position::new(x, 0, 0)
    }

    #[test]
    fn second_placement_is_rejected_until_release() {
        let registry = EntityRegistry::new();
        assert!(registry.start_placement(pos(1), Timestamp::ZERO));
        assert!(!registry.start_placement(pos(2), Timestamp::ZERO));
        assert!(registry.get(pos(2)).is_none());

        registry.complete_placement(pos(1), true, Timestamp::from_secs(1));
        assert!(registry.is_placement_in_flight());
        assert!(!registry.start_placement(pos(2), Timestamp::from_secs(1)));

        registry.release_placement_latch();
        assert!(registry.start_placement(pos(2), Timestamp::from_secs(2)));
    }

    #[test]
    fn successful_placement_arms_the_trap() {
        let registry = EntityRegistry::new();
        registry.start_placement(pos(1), Timestamp::ZERO);
        let record = registry.get(pos(1)).unwrap();
        assert_eq!(record.life_state, LifeState::Placing);
        assert!(record.flags.contains(PriorityFlag::PlacementInProgress));

        let effect = registry.complete_placement(pos(1), true, Timestamp::from_secs(1));
        assert_eq!(
            effect,
            Effect::Entered {
                from: LifeState::Placing,
                to: LifeState::Armed,
            }
        );
        let record = registry.get(pos(1)).unwrap();
        assert!(record.flags.is_empty());
        assert_eq!(record.state_entered_at, Timestamp::from_secs(1));
    }

    #[test]
    fn placement_confirmed_by_perception_first_is_a_no_op() {
        let registry = EntityRegistry::new();
        registry.start_placement(pos(1), Timestamp::ZERO);
        registry.update_from_observation(pos(1), LifeState::Armed, Timestamp::from_millis(400));
        let effect = registry.complete_placement(pos(1), true, Timestamp::from_secs(1));
        assert_eq!(effect, Effect::Unchanged);
        let record = registry.get(pos(1)).unwrap();
        assert_eq!(record.life_state, LifeState::Armed);
        assert_eq!(record.state_entered_at, Timestamp::from_millis(400));
    }

    #[test]
    fn failed_placement_removes_record_but_keeps_latch() {
        let registry = EntityRegistry::new();
        registry.start_placement(pos(1), Timestamp::ZERO);
        let effect = registry.complete_placement(pos(1), false, Timestamp::from_secs(1));
        assert_eq!(effect, Effect::Removed);
        assert!(registry.is_empty());
        assert!(registry.is_placement_in_flight());
    }

    #[test]
    fn abort_releases_latch() {
        let registry = EntityRegistry::new();
        registry.start_placement(pos(1), Timestamp::ZERO);
        registry.abort_placement(pos(1));
        assert!(registry.is_empty());
        assert!(!registry.is_placement_in_flight());
    }

    #[test]
    fn identical_observation_only_refreshes_last_seen() {
        let registry = EntityRegistry::new();
        let state = LifeState::Resolved(Outcome::Success);
        assert_eq!(
            registry.update_from_observation(pos(1), state, Timestamp::ZERO),
            Effect::Created { state }
        );
        registry.add_flag(pos(1), PriorityFlag::ExpediteCollection, Timestamp::ZERO);
        let before = registry.get(pos(1)).unwrap();

        let effect = registry.update_from_observation(pos(1), state, Timestamp::from_secs(3));
        assert_eq!(effect, Effect::Unchanged);
        let after = registry.get(pos(1)).unwrap();
        assert_eq!(after.flags, before.flags);
        assert_eq!(after.state_entered_at, before.state_entered_at);
        assert_eq!(after.last_observed_at, Timestamp::from_secs(3));
    }

    #[test]
    fn genuine_transition_resets_flags_and_entry_time() {
        let registry = EntityRegistry::new();
        registry.update_from_observation(pos(1), LifeState::Armed, Timestamp::ZERO);
        registry.add_flag(pos(1), PriorityFlag::CriticalAboutToResolve, Timestamp::ZERO);
        registry.update_from_observation(
            pos(1),
            LifeState::Resolved(Outcome::Failure),
            Timestamp::from_secs(61),
        );
        let record = registry.get(pos(1)).unwrap();
        assert_eq!(record.flags.len(), 1);
        assert!(record.flags.contains(PriorityFlag::ReadyForCollection));
        assert_eq!(record.state_entered_at, Timestamp::from_secs(61));
    }

    #[test]
    fn higher_priority_flag_wins() {
        let registry = EntityRegistry::new();
        registry.update_from_observation(pos(1), LifeState::Resolved(Outcome::Success), Timestamp::ZERO);
        registry.update_from_observation(pos(2), LifeState::Collapsed, Timestamp::from_secs(5));
        let top = registry.highest_priority_actionable().unwrap();
        assert_eq!(top.position, pos(2));

        registry.add_flag(pos(1), PriorityFlag::ExpediteCollection, Timestamp::from_secs(5));
        let top = registry.highest_priority_actionable().unwrap();
        assert_eq!(top.position, pos(1));
    }

    #[test]
    fn ties_go_to_oldest_then_lowest_position() {
        let registry = EntityRegistry::new();
        registry.update_from_observation(pos(3), LifeState::Collapsed, Timestamp::from_secs(2));
        registry.update_from_observation(pos(2), LifeState::Collapsed, Timestamp::from_secs(1));
        registry.update_from_observation(pos(1), LifeState::Collapsed, Timestamp::from_secs(2));
        assert_eq!(registry.highest_priority_actionable().unwrap().position, pos(2));

        let skip: BTreeSet<Position> = [pos(2)].into_iter().collect();
        let next = registry.highest_priority_actionable_excluding(&skip).unwrap();
        assert_eq!(next.position, pos(1));
    }

    #[test]
    fn placing_and_armed_entities_are_not_actionable() {
        let registry = EntityRegistry::new();
        registry.start_placement(pos(1), Timestamp::ZERO);
        registry.update_from_observation(pos(2), LifeState::Armed, Timestamp::ZERO);
        assert!(registry.highest_priority_actionable().is_none());
    }

    #[test]
    fn grace_blocks_pause_and_dies_with_record() {
        let registry = EntityRegistry::new();
        assert!(registry.may_pause());
        registry.update_from_observation(pos(1), LifeState::Armed, Timestamp::ZERO);
        assert!(registry.begin_grace(
            pos(1),
            GraceEntry::new(Timestamp::ZERO, 2_000, SignalKind::ArmedMarker)
        ));
        assert!(!registry.begin_grace(
            pos(1),
            GraceEntry::new(Timestamp::ZERO, 2_000, SignalKind::ArmedMarker)
        ));
        assert_eq!(registry.pending_grace_period_count(), 1);

        registry.remove(pos(1));
        assert!(registry.is_empty());
        assert!(!registry.has_pending_grace_periods());
        assert!(registry.may_pause());
    }

    #[test]
    fn expired_graces_are_taken_once() {
        let registry = EntityRegistry::new();
        registry.update_from_observation(pos(1), LifeState::Armed, Timestamp::ZERO);
        registry.begin_grace(
            pos(1),
            GraceEntry::new(Timestamp::ZERO, 2_000, SignalKind::ArmedMarker),
        );
        assert!(registry.take_expired_graces(Timestamp::from_millis(1_999)).is_empty());
        assert_eq!(registry.take_expired_graces(Timestamp::from_millis(2_000)).len(), 1);
        assert!(registry.take_expired_graces(Timestamp::from_millis(2_500)).is_empty());
    }

    #[test]
    fn dwell_guess_rolls_back_on_cancel() {
        let registry = EntityRegistry::new();
        registry.update_from_observation(pos(1), LifeState::Armed, Timestamp::ZERO);
        registry.add_flag(pos(1), PriorityFlag::CriticalAboutToResolve, Timestamp::from_secs(60));
        let original = registry.get(pos(1)).unwrap();
        registry.begin_grace(
            pos(1),
            GraceEntry::new(Timestamp::from_secs(61), 2_000, SignalKind::ArmedMarker),
        );

        let effect = registry.apply_dwell_guess(pos(1), Timestamp::from_millis(62_200));
        assert!(matches!(effect, Effect::Entered { .. }));
        assert_eq!(
            registry.apply_dwell_guess(pos(1), Timestamp::from_millis(62_800)),
            Effect::Unchanged
        );

        assert_eq!(registry.cancel_grace(pos(1)), Some(true));
        assert_eq!(registry.get(pos(1)).unwrap(), original);
        assert_eq!(registry.cancel_grace(pos(1)), None);
    }

    #[test]
    fn dwell_guess_survives_a_genuine_transition() {
        let registry = EntityRegistry::new();
        registry.update_from_observation(pos(1), LifeState::Armed, Timestamp::ZERO);
        registry.begin_grace(
            pos(1),
            GraceEntry::new(Timestamp::from_secs(1), 2_000, SignalKind::ArmedMarker),
        );
        registry.apply_dwell_guess(pos(1), Timestamp::from_millis(2_200));
        registry.apply_event(pos(1), LifeEvent::ServicedReset, Timestamp::from_millis(2_400));

        assert_eq!(registry.cancel_grace(pos(1)), Some(false));
        assert_eq!(registry.get(pos(1)).unwrap().life_state, LifeState::Resetting);
    }

    #[test]
    fn placement_start_replaces_a_collapsed_record() {
        let registry = EntityRegistry::new();
        registry.update_from_observation(pos(1), LifeState::Collapsed, Timestamp::ZERO);
        assert!(registry.start_placement(pos(1), Timestamp::from_secs(4)));
        let record = registry.get(pos(1)).unwrap();
        assert_eq!(record.life_state, LifeState::Placing);
        assert_eq!(record.flags, FlagSet::only(PriorityFlag::PlacementInProgress));
        assert_eq!(record.created_at, Timestamp::from_secs(4));
    }

    #[test]
    fn clear_all_releases_everything() {
        let registry = EntityRegistry::new();
        registry.start_placement(pos(1), Timestamp::ZERO);
        registry.update_from_observation(pos(2), LifeState::Collapsed, Timestamp::ZERO);
        registry.clear_all();
        assert!(registry.is_empty());
        assert!(!registry.is_placement_in_flight());
    }

    #[test]
    fn flag_cleared_everywhere() {
        let registry = EntityRegistry::new();
        for x in 0..3 {
            registry.update_from_observation(pos(x), LifeState::Armed, Timestamp::ZERO);
            registry.add_flag(pos(x), PriorityFlag::NeedsRepositioning, Timestamp::ZERO);
        }
        assert_eq!(registry.clear_flag_everywhere(PriorityFlag::NeedsRepositioning), 3);
        assert!(registry.highest_priority_actionable().is_none());
        assert!(!registry.remove_flag(pos(0), PriorityFlag::NeedsRepositioning));
    }

    #[test]
    fn missing_positions_are_nothing_to_do() {
        let registry = EntityRegistry::new();
        assert_eq!(
            registry.apply_event(pos(9), LifeEvent::GraceExpired, Timestamp::ZERO),
            Effect::Unchanged
        );
        assert!(registry.remove(pos(9)).is_none());
        assert!(!registry.add_flag(pos(9), PriorityFlag::UrgentCollapsed, Timestamp::ZERO));
    }
}
