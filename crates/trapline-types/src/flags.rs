//! Priority flags and the per-entity flag set.
//!
//! A flag marks an outstanding obligation on a trap. Every flag carries an
//! explicit integer priority (lower is more urgent) that is independent of
//! the order in which the variants are declared, so reordering the enum
//! never changes scheduling behaviour.
//!
//! | Flag | Priority |
//! |------|----------|
//! | `ExpediteCollection` | 0 |
//! | `UrgentCollapsed` | 1 |
//! | `CriticalAboutToResolve` | 2 |
//! | `NeedsRepositioning` | 3 |
//! | `NeedsInteraction` | 4 |
//! | `ReadyForCollection` | 5 |
//! | `PendingVerification` | 6 |
//! | `PlacementInProgress` | 7 |

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A condition marker attached to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriorityFlag {
    /// Collect immediately regardless of freshness.
    ExpediteCollection,
    /// Collapsed for long enough that the trap risks despawning.
    UrgentCollapsed,
    /// Armed for long enough that it is about to resolve on its own.
    CriticalAboutToResolve,
    /// The trap's tile is not fully visible from the current vantage.
    NeedsRepositioning,
    /// The trap must be handled before it can work again.
    NeedsInteraction,
    /// The trap holds a result waiting to be collected.
    ReadyForCollection,
    /// The trap's real state is unconfirmed.
    PendingVerification,
    /// A lay action is underway on this tile.
    PlacementInProgress,
}

impl PriorityFlag {
    /// Every flag, most urgent first.
    pub const ALL: [Self; 8] = [
        Self::ExpediteCollection,
        Self::UrgentCollapsed,
        Self::CriticalAboutToResolve,
        Self::NeedsRepositioning,
        Self::NeedsInteraction,
        Self::ReadyForCollection,
        Self::PendingVerification,
        Self::PlacementInProgress,
    ];

    /// Urgency of the flag; lower numbers are serviced first.
    pub const fn priority(self) -> u8 {
        match self {
            Self::ExpediteCollection => 0,
            Self::UrgentCollapsed => 1,
            Self::CriticalAboutToResolve => 2,
            Self::NeedsRepositioning => 3,
            Self::NeedsInteraction => 4,
            Self::ReadyForCollection => 5,
            Self::PendingVerification => 6,
            Self::PlacementInProgress => 7,
        }
    }

    /// Whether the flag makes its entity a candidate for servicing.
    pub const fn is_actionable(self) -> bool {
        !matches!(self, Self::PlacementInProgress)
    }

    /// Whether the flag overrides the freshness deferral.
    pub const fn is_escalation(self) -> bool {
        matches!(
            self,
            Self::ExpediteCollection | Self::UrgentCollapsed | Self::CriticalAboutToResolve
        )
    }

    /// Flags that may never coexist with `self` on one entity.
    const fn excludes(self) -> &'static [Self] {
        match self {
            Self::PlacementInProgress => &[Self::ReadyForCollection, Self::NeedsInteraction],
            Self::ReadyForCollection | Self::NeedsInteraction => &[Self::PlacementInProgress],
            _ => &[],
        }
    }
}

impl core::fmt::Display for PriorityFlag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            Self::ExpediteCollection => "expedite-collection",
            Self::UrgentCollapsed => "urgent-collapsed",
            Self::CriticalAboutToResolve => "critical-about-to-resolve",
            Self::NeedsRepositioning => "needs-repositioning",
            Self::NeedsInteraction => "needs-interaction",
            Self::ReadyForCollection => "ready-for-collection",
            Self::PendingVerification => "pending-verification",
            Self::PlacementInProgress => "placement-in-progress",
        };
        f.write_str(label)
    }
}

/// The set of flags attached to one entity.
///
/// Inserting a flag evicts any flag it is mutually exclusive with, so an
/// entity can never be "being placed" and "needing service" at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagSet(BTreeSet<PriorityFlag>);

impl FlagSet {
    /// An empty set.
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// A set holding exactly one flag.
    pub fn only(flag: PriorityFlag) -> Self {
        let mut set = Self::new();
        set.insert(flag);
        set
    }

    /// Add a flag, evicting any mutually exclusive flag.
    ///
    /// Returns `true` if the flag was not already present.
    pub fn insert(&mut self, flag: PriorityFlag) -> bool {
        for excluded in flag.excludes() {
            self.0.remove(excluded);
        }
        self.0.insert(flag)
    }

    /// Remove a flag. Returns `true` if it was present.
    pub fn remove(&mut self, flag: PriorityFlag) -> bool {
        self.0.remove(&flag)
    }

    /// Whether the flag is present.
    pub fn contains(&self, flag: PriorityFlag) -> bool {
        self.0.contains(&flag)
    }

    /// Whether no flag is present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of flags present.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The most urgent flag that makes the entity serviceable, if any.
    pub fn highest_actionable(&self) -> Option<PriorityFlag> {
        self.0
            .iter()
            .copied()
            .filter(|flag| flag.is_actionable())
            .min_by_key(|flag| flag.priority())
    }

    /// Whether any escalation flag is present.
    pub fn has_escalation(&self) -> bool {
        self.0.iter().any(|flag| flag.is_escalation())
    }
}

impl FromIterator<PriorityFlag> for FlagSet {
    fn from_iter<I: IntoIterator<Item = PriorityFlag>>(iter: I) -> Self {
        let mut set = Self::new();
        for flag in iter {
            set.insert(flag);
        }
        set
    }
}
