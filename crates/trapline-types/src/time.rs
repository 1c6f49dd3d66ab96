//! Monotonic session timestamps.
//!
//! Every timestamp in the system is a millisecond offset from the start of
//! the session, produced by a single clock. Wall-clock time never enters
//! the scheduling logic, so ordering comparisons are always meaningful.

use serde::{Deserialize, Serialize};

/// Milliseconds elapsed since the session clock started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The start of the session.
    pub const ZERO: Self = Self(0);

    /// Build a timestamp from a raw millisecond offset.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Build a timestamp from whole seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Return the raw millisecond offset.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed between `earlier` and `self`.
    ///
    /// Saturates at zero when `earlier` is actually later.
    pub const fn millis_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Return a timestamp `millis` later than `self`, saturating at the
    /// maximum representable offset.
    pub const fn plus_millis(self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Whether `deadline` has been reached at `self`.
    pub const fn has_reached(self, deadline: Self) -> bool {
        self.0 >= deadline.0
    }
}

impl core::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "t+{}ms", self.0)
    }
}
