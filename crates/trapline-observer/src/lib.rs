//! Observer API server for Trapline.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **Read endpoints** for the debug overlay (loop status, tracked
//!   entities, the current service priority)
//! - **Operator endpoints** for runtime control (confirm settings, drain,
//!   resume, speed, stop)
//!
//! # Architecture
//!
//! The loop publishes a [`LoopSnapshot`] after every tick. Status reads
//! are served from that snapshot; entity and priority reads go straight
//! to the concurrent-safe registry when one is attached. Handlers never
//! call into the scheduler, so the observer cannot stall a tick.
//!
//! [`LoopSnapshot`]: state::LoopSnapshot

pub mod error;
pub mod handlers;
pub mod operator;
pub mod router;
pub mod server;
pub mod state;

pub use router::build_router;
pub use server::{ServerError, spawn_observer, start_server};
pub use state::{AppState, LoopSnapshot};
