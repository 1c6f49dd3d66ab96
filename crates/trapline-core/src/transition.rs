//! The life-cycle transition table.
//!
//! Every state change of a tracked trap goes through [`apply`]. The table
//! takes the current state (if a record exists), the current flags, and a
//! [`LifeEvent`], and returns a [`Transition`] describing what the registry
//! must write. Nothing here touches the registry itself, so the table can
//! be reasoned about and tested exhaustively in isolation.
//!
//! A genuine state change ([`Transition::Enter`]) always replaces the flag
//! set with the canonical flags of the new state; escalation and
//! verification flags therefore only ever clear through a real transition.

use trapline_types::{FlagSet, LifeState, Outcome, PriorityFlag};

/// Something that happened to a trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeEvent {
    /// A lay action was started on the tile.
    PlacementStarted,
    /// The lay action was confirmed successful.
    PlacementConfirmed,
    /// Perception saw the trap in the given state.
    Observed(LifeState),
    /// The trap's signal has been missing for the dwell minimum.
    SignalLost,
    /// The grace period elapsed without the signal returning.
    GraceExpired,
    /// A reset interaction was performed.
    ServicedReset,
    /// An escalation or housekeeping flag became due.
    Escalate(PriorityFlag),
}

/// The write a [`LifeEvent`] requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Enter a new life state with a fresh flag set.
    Enter {
        /// The new state.
        state: LifeState,
        /// The complete flag set of the record after the transition.
        flags: FlagSet,
    },
    /// Keep the life state but replace the flag set.
    Amend {
        /// The complete flag set of the record after the amendment.
        flags: FlagSet,
    },
    /// Nothing to write.
    Unchanged,
}

/// Flags a record carries immediately after entering `state`.
pub fn canonical_flags(state: LifeState) -> FlagSet {
    match state {
        LifeState::Placing => FlagSet::only(PriorityFlag::PlacementInProgress),
        LifeState::Resolved(_) => FlagSet::only(PriorityFlag::ReadyForCollection),
        LifeState::Collapsed => FlagSet::only(PriorityFlag::NeedsInteraction),
        LifeState::Unknown => FlagSet::only(PriorityFlag::PendingVerification),
        LifeState::Armed | LifeState::Resetting => FlagSet::new(),
    }
}

/// Compute the transition for `event` given the record's current state.
///
/// `current` is `None` when no record exists for the tile.
pub fn apply(current: Option<LifeState>, flags: &FlagSet, event: LifeEvent) -> Transition {
    match (current, event) {
        (_, LifeEvent::PlacementStarted) => enter(LifeState::Placing),

        (Some(LifeState::Placing), LifeEvent::PlacementConfirmed) => enter(LifeState::Armed),
        (Some(_), LifeEvent::PlacementConfirmed) => {
            amend_without(flags, PriorityFlag::PlacementInProgress)
        }
        (None, LifeEvent::PlacementConfirmed) => Transition::Unchanged,

        (Some(state), LifeEvent::Observed(seen)) if state == seen => Transition::Unchanged,
        (_, LifeEvent::Observed(seen)) => enter(seen),

        (Some(LifeState::Armed), LifeEvent::SignalLost) => Transition::Enter {
            state: LifeState::Resolved(Outcome::Unknown),
            flags: FlagSet::only(PriorityFlag::PendingVerification),
        },
        (Some(LifeState::Collapsed) | None, LifeEvent::SignalLost) => Transition::Unchanged,
        (Some(_), LifeEvent::SignalLost) => amend_with(flags, PriorityFlag::PendingVerification),

        (_, LifeEvent::GraceExpired) => Transition::Enter {
            state: LifeState::Collapsed,
            flags: FlagSet::only(PriorityFlag::PendingVerification),
        },

        (_, LifeEvent::ServicedReset) => enter(LifeState::Resetting),

        (None, LifeEvent::Escalate(_)) => Transition::Unchanged,
        (Some(_), LifeEvent::Escalate(flag)) => amend_with(flags, flag),
    }
}

fn enter(state: LifeState) -> Transition {
    Transition::Enter {
        state,
        flags: canonical_flags(state),
    }
}

fn amend_with(flags: &FlagSet, flag: PriorityFlag) -> Transition {
    if flags.contains(flag) {
        return Transition::Unchanged;
    }
    let mut next = flags.clone();
    next.insert(flag);
    Transition::Amend { flags: next }
}

fn amend_without(flags: &FlagSet, flag: PriorityFlag) -> Transition {
    if !flags.contains(flag) {
        return Transition::Unchanged;
    }
    let mut next = flags.clone();
    next.remove(flag);
    Transition::Amend { flags: next }
}
