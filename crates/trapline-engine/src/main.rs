//! Trapline engine binary.
//!
//! Wires the scheduler to a simulated trap field, starts the observer API,
//! and runs one session until a termination condition is met.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `trapline-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Build the session clock, registry, field, and scheduler
//! 4. Create operator state and start the observer API
//! 5. Confirm session settings (or wait for the operator to)
//! 6. Run the session loop
//! 7. Log the result

mod error;
mod observer_callback;
mod sim;

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;
use trapline_core::clock::{Clock, MonotonicClock};
use trapline_core::config::{LoggingConfig, TraplineConfig};
use trapline_core::operator::OperatorState;
use trapline_core::registry::EntityRegistry;
use trapline_core::runner;
use trapline_core::scheduler::Scheduler;
use trapline_observer::state::AppState;

use crate::error::EngineError;
use crate::observer_callback::ObserverCallback;
use crate::sim::{SimulatedField, SimulationConfig};

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "trapline-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step or the session itself
/// fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let (config, loaded_from_file) = load_config()?;
    let simulation = SimulationConfig::load(Path::new(CONFIG_PATH))?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!(
        from_file = loaded_from_file,
        max_entities = config.session.max_entities,
        strategy = ?config.session.strategy,
        tick_interval_ms = config.timing.tick_interval_ms,
        "configuration loaded"
    );

    // 3. Clock, registry, field, scheduler.
    let clock = Arc::new(MonotonicClock::start());
    let field = SimulatedField::new(simulation.clone(), Arc::clone(&clock) as Arc<dyn Clock>);
    let registry = Arc::new(EntityRegistry::new());
    let mut scheduler = Scheduler::new(
        Arc::clone(&registry),
        Box::new(field.clone()),
        Box::new(field.clone()),
        config.timing.clone(),
        config.dispatch.clone(),
    );
    info!(
        player = %simulation.player_start,
        supplies = simulation.supplies,
        "simulated field ready"
    );

    // 4. Operator state and observer API.
    let (operator, settings_rx) = OperatorState::new(config.timing.tick_interval_ms, simulation.max_ticks);
    let operator = Arc::new(operator);
    let app_state = Arc::new(AppState::with_session(Arc::clone(&operator), registry));
    let observer_handle = if config.observer.enabled {
        let (addr, handle) = trapline_observer::spawn_observer(&config.observer, Arc::clone(&app_state))
            .await
            .map_err(EngineError::from)?;
        info!(%addr, "observer API started");
        Some(handle)
    } else {
        None
    };

    // 5. Settings.
    if simulation.auto_confirm {
        operator
            .confirm_settings(config.session.clone())
            .map_err(EngineError::from)?;
        info!("session settings confirmed from config");
    } else {
        info!("waiting for POST /api/operator/confirm");
    }

    // 6. Run the session.
    let mut callback = ObserverCallback::new(
        Arc::clone(&app_state),
        Arc::clone(&operator),
        simulation.drain_after_ticks,
        simulation.stop_when_drained,
    );
    let result = runner::run_session(&mut scheduler, &operator, settings_rx, clock.as_ref(), &mut callback)
        .await
        .map_err(EngineError::from)?;
    app_state.mark_phase(scheduler.phase()).await;

    // 7. Log results.
    runner::log_session_end(&result);
    if let Some(handle) = observer_handle {
        handle.abort();
    }

    info!(
        end_reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        player = %field.player(),
        supplies_left = field.supplies(),
        traps_on_ground = field.trap_count(),
        "trapline-engine shutdown complete"
    );
    Ok(())
}

/// Load configuration from [`CONFIG_PATH`], falling back to defaults when
/// the file is absent.
fn load_config() -> Result<(TraplineConfig, bool), EngineError> {
    let path = Path::new(CONFIG_PATH);
    if path.exists() {
        Ok((TraplineConfig::from_file(path)?, true))
    } else {
        let mut config = TraplineConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok((config, false))
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured
/// level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
