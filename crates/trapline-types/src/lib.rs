//! Shared type definitions for the Trapline trap scheduler.
//!
//! This crate is the single source of truth for the values that flow
//! between the registry, the perception reconciler, the scheduler, and the
//! observer API. Everything here is plain data: no locks, no I/O.
//!
//! # Modules
//!
//! - [`geometry`] -- Tile positions, zones, and distance helpers
//! - [`enums`] -- Life states, resolution outcomes, and raw signal kinds
//! - [`flags`] -- Priority flags with explicit urgency and the flag set
//! - [`structs`] -- The entity record held by the registry
//! - [`time`] -- Monotonic session timestamps

pub mod enums;
pub mod flags;
pub mod geometry;
pub mod structs;
pub mod time;

// Re-export all public types at crate root for convenience.
pub use enums::{LifeState, Outcome, ProbeKind, SignalKind};
pub use flags::{FlagSet, PriorityFlag};
pub use geometry::{Position, Zone};
pub use structs::EntityRecord;
pub use time::Timestamp;
