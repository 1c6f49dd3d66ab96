//! Enumeration types for trap life cycles and raw perception signals.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Life cycle
// ---------------------------------------------------------------------------

/// How a resolved trap ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The trap caught something.
    Success,
    /// The trap was triggered but caught nothing.
    Failure,
    /// The trap is believed to be resolved but its outcome was not seen.
    Unknown,
}

/// The authoritative life-cycle state of one trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "outcome")]
pub enum LifeState {
    /// A lay action is underway and not yet confirmed.
    Placing,
    /// Laid and waiting.
    Armed,
    /// Triggered; waiting to be collected.
    Resolved(Outcome),
    /// Fell over and is lying on the ground.
    Collapsed,
    /// A reset action was performed; waiting to be seen armed again.
    Resetting,
    /// Tracked, but the state cannot be determined.
    Unknown,
}

impl LifeState {
    /// Short label used in logs and the observer API.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Placing => "placing",
            Self::Armed => "armed",
            Self::Resolved(Outcome::Success) => "resolved_success",
            Self::Resolved(Outcome::Failure) => "resolved_failure",
            Self::Resolved(Outcome::Unknown) => "resolved_unknown",
            Self::Collapsed => "collapsed",
            Self::Resetting => "resetting",
            Self::Unknown => "unknown",
        }
    }
}

impl core::fmt::Display for LifeState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Perception
// ---------------------------------------------------------------------------

/// The coarse kind of a raw visual signal seen on a trap's tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Marker shown over a laid, waiting trap.
    ArmedMarker,
    /// Marker shown over a trap holding a catch.
    SuccessMarker,
    /// Marker shown over a trap that triggered empty.
    FailureMarker,
    /// Marker shown over a trap lying on the ground.
    CollapsedMarker,
}

impl SignalKind {
    /// The life state this signal implies.
    pub const fn life_state(self) -> LifeState {
        match self {
            Self::ArmedMarker => LifeState::Armed,
            Self::SuccessMarker => LifeState::Resolved(Outcome::Success),
            Self::FailureMarker => LifeState::Resolved(Outcome::Failure),
            Self::CollapsedMarker => LifeState::Collapsed,
        }
    }
}

/// What a phantom-sweep probe looks for on a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Any success, failure, or collapsed marker.
    TerminalMarker,
    /// The armed marker.
    ArmedMarker,
    /// Raw trap model pixels with no marker at all.
    ModelPixels,
}

impl ProbeKind {
    /// Probes in the order a sweep tries them, cheapest first.
    pub const SWEEP_ORDER: [Self; 3] = [Self::TerminalMarker, Self::ArmedMarker, Self::ModelPixels];
}
