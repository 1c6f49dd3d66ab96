//! Perception contract.
//!
//! The scheduler never looks at pixels. It consumes a [`Snapshot`] per tick
//! from a [`PerceptionSensor`] and, while draining, asks the sensor to
//! probe individual tiles during a phantom sweep.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use trapline_types::{Position, ProbeKind, SignalKind};

/// Everything perception reported during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The signal seen on each tile that showed one.
    pub signals: BTreeMap<Position, SignalKind>,
    /// Tiles that could not be seen from the current vantage.
    pub occluded: BTreeSet<Position>,
}

impl Snapshot {
    /// An empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper adding one signal.
    #[must_use]
    pub fn with_signal(mut self, position: Position, signal: SignalKind) -> Self {
        self.signals.insert(position, signal);
        self
    }

    /// Builder-style helper marking a tile occluded.
    #[must_use]
    pub fn with_occluded(mut self, position: Position) -> Self {
        self.occluded.insert(position);
        self
    }

    /// The signal on `position`, if any.
    pub fn signal_at(&self, position: Position) -> Option<SignalKind> {
        self.signals.get(&position).copied()
    }

    /// Whether `position` was hidden this tick.
    pub fn is_occluded(&self, position: Position) -> bool {
        self.occluded.contains(&position)
    }
}

/// Source of perception for the scheduler.
pub trait PerceptionSensor: Send {
    /// Capture the signals visible this tick.
    fn snapshot(&mut self) -> Snapshot;

    /// Look for `kind` on `position`. Used by the phantom sweep.
    fn probe(&mut self, position: Position, kind: ProbeKind) -> bool;

    /// Where the player is standing, if known.
    fn player_position(&mut self) -> Option<Position>;

    /// How many traps the player still carries, if known.
    fn supplies_remaining(&mut self) -> Option<u32>;
}

impl core::fmt::Debug for dyn PerceptionSensor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("dyn PerceptionSensor")
    }
}
