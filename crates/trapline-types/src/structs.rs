//! The entity record held by the registry.

use serde::{Deserialize, Serialize};

use crate::enums::LifeState;
use crate::flags::{FlagSet, PriorityFlag};
use crate::geometry::Position;
use crate::time::Timestamp;

/// One tracked trap.
///
/// Records are replaced wholesale on every update; callers only ever hold
/// copies, so a record handed out by the registry never changes under them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Tile the trap occupies. This is its identity.
    pub position: Position,
    /// Current life-cycle state.
    pub life_state: LifeState,
    /// Outstanding obligations.
    pub flags: FlagSet,
    /// When the record was created.
    pub created_at: Timestamp,
    /// When a signal for this trap was last seen.
    pub last_observed_at: Timestamp,
    /// When `life_state` last genuinely changed.
    pub state_entered_at: Timestamp,
}

impl EntityRecord {
    /// Create a record entering `life_state` at `now` with the given flags.
    pub const fn new(position: Position, life_state: LifeState, flags: FlagSet, now: Timestamp) -> Self {
        Self {
            position,
            life_state,
            flags,
            created_at: now,
            last_observed_at: now,
            state_entered_at: now,
        }
    }

    /// Milliseconds spent in the current state as of `now`.
    pub const fn time_in_state(&self, now: Timestamp) -> u64 {
        now.millis_since(self.state_entered_at)
    }

    /// The most urgent serviceable flag, if the entity is actionable.
    pub fn actionable_flag(&self) -> Option<PriorityFlag> {
        self.flags.highest_actionable()
    }

    /// Whether a lay action on this tile is still unconfirmed.
    pub fn is_placing(&self) -> bool {
        matches!(self.life_state, LifeState::Placing)
    }
}
