//! Entity registry, perception reconciler, and priority scheduler for
//! Trapline.
//!
//! This crate owns the authoritative model of every laid trap and the loop
//! that decides, tick by tick, which single physical action to take next.
//!
//! # Modules
//!
//! - [`clock`] -- Monotonic session clock and a manual clock for tests.
//! - [`config`] -- Configuration loading from `trapline-config.yaml` into
//!   strongly-typed structs.
//! - [`dispatch`] -- [`Actuator`] contract and the bounded-attempt
//!   interaction dispatcher.
//! - [`operator`] -- Shared operator control state (drain, stop, speed,
//!   settings confirmation).
//! - [`placement`] -- [`PlacementStrategy`] trait and the built-in
//!   strategies.
//! - [`reconciler`] -- Per-tick perception diffing, grace periods,
//!   escalation, and phantom sweeps.
//! - [`registry`] -- The concurrent-safe entity store with the placement
//!   latch.
//! - [`runner`] -- Async session loop with operator controls.
//! - [`scheduler`] -- The per-tick action loop state machine.
//! - [`sensor`] -- [`PerceptionSensor`] contract and snapshots.
//! - [`transition`] -- The life-cycle transition table.
//!
//! [`Actuator`]: dispatch::Actuator
//! [`PlacementStrategy`]: placement::PlacementStrategy
//! [`PerceptionSensor`]: sensor::PerceptionSensor

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod operator;
pub mod placement;
pub mod reconciler;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod sensor;
pub mod transition;
