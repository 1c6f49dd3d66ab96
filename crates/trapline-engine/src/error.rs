//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps every failure
//! mode during startup and the session run.

use trapline_core::config::ConfigError;
use trapline_core::operator::ConfirmError;
use trapline_core::runner::RunnerError;
use trapline_observer::ServerError;

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The `simulation` section is unusable.
    #[error("simulation config error: {reason}")]
    Simulation {
        /// What is wrong with it.
        reason: String,
    },

    /// The observer API could not start.
    #[error("observer error: {source}")]
    Observer {
        /// The underlying server error.
        #[from]
        source: ServerError,
    },

    /// The configured settings could not be handed to the loop.
    #[error("settings error: {source}")]
    Confirm {
        /// Why the confirmation was refused.
        #[from]
        source: ConfirmError,
    },

    /// The session runner failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: RunnerError,
    },
}
