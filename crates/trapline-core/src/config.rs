//! Configuration loading and typed config structures for Trapline.
//!
//! The canonical configuration lives in `trapline-config.yaml` next to the
//! binary. This module defines strongly-typed structs that mirror the YAML
//! structure and a loader that reads and validates the file. Every field
//! has a default, so an empty file (or no file at all) is a valid setup.
//!
//! The `session` section doubles as the payload of the one-shot
//! "configuration confirmed" message: the host may confirm it unchanged or
//! send an edited copy through the operator API.

use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use trapline_types::{Position, Zone};

use crate::placement::StrategyKind;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but describes an unusable setup.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level Trapline configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TraplineConfig {
    /// Session settings confirmed once at startup.
    #[serde(default)]
    pub session: SessionConfig,

    /// Grace periods, escalation thresholds, and loop timing.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Interaction dispatcher limits.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Observer API settings.
    #[serde(default)]
    pub observer: ObserverConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TraplineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `TRAPLINE_OBSERVER_PORT` overrides `observer.port`
    /// - `TRAPLINE_MAX_ENTITIES` overrides `session.max_entities`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override selected values with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = std::env::var("TRAPLINE_OBSERVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.observer.port = port;
        }
        if let Some(max) = std::env::var("TRAPLINE_MAX_ENTITIES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.session.max_entities = max;
        }
    }

    /// Check every section for values the scheduler cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        self.timing.validate()?;
        if self.dispatch.max_attempts == 0 {
            return Err(invalid("dispatch.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Session settings: capacity, strategy, and zones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of traps laid at once.
    #[serde(default = "default_max_entities")]
    pub max_entities: u32,

    /// Placement strategy used to pick new sites.
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Areas in which traps may be laid.
    #[serde(default = "default_zones")]
    pub zones: Vec<Zone>,

    /// Probability that a fresh success is flagged for immediate collection.
    #[serde(default = "default_expedite_probability")]
    pub expedite_probability: f64,

    /// Seed for the scheduler's randomness. `None` draws from the OS.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_entities: default_max_entities(),
            strategy: StrategyKind::default(),
            zones: default_zones(),
            expedite_probability: default_expedite_probability(),
            seed: None,
        }
    }
}

impl SessionConfig {
    /// Validate session settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on zero capacity, no usable zone,
    /// or an out-of-range probability.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entities == 0 {
            return Err(invalid("session.max_entities must be at least 1"));
        }
        if self.zones.iter().all(Zone::is_empty) {
            return Err(invalid("session.zones must contain at least one non-empty zone"));
        }
        if !(0.0..=1.0).contains(&self.expedite_probability) {
            return Err(invalid("session.expedite_probability must be within 0.0..=1.0"));
        }
        Ok(())
    }
}

/// An inclusive range of milliseconds sampled uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MillisRange {
    /// Lower bound (inclusive).
    pub min_ms: u64,
    /// Upper bound (inclusive).
    pub max_ms: u64,
}

impl MillisRange {
    /// Create a range.
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// Draw one value from the range.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        if self.min_ms >= self.max_ms {
            return self.min_ms;
        }
        rng.random_range(self.min_ms..=self.max_ms)
    }

    const fn is_inverted(&self) -> bool {
        self.min_ms > self.max_ms
    }
}

/// Grace periods, escalation thresholds, and loop timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimingConfig {
    /// Real-time milliseconds between loop ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Grace window when an armed marker disappears.
    #[serde(default = "default_armed_grace")]
    pub armed_grace: MillisRange,

    /// Grace window when any other marker disappears.
    #[serde(default = "default_grace")]
    pub grace: MillisRange,

    /// Minimum absence before a best-guess terminal state is applied.
    #[serde(default = "default_grace_dwell_ms")]
    pub grace_dwell_ms: u64,

    /// Time collapsed before a trap gains the urgent flag.
    #[serde(default = "default_collapsed_urgent_ms")]
    pub collapsed_urgent_ms: u64,

    /// Time armed before a trap gains the critical flag.
    #[serde(default = "default_armed_critical_ms")]
    pub armed_critical_ms: u64,

    /// Age below which a fresh result is left alone in favour of laying.
    #[serde(default = "default_freshness")]
    pub freshness: MillisRange,

    /// Pause after a confirmed placement before the latch is released.
    #[serde(default = "default_settle")]
    pub settle: MillisRange,

    /// How long to wait for a placement to be seen.
    #[serde(default = "default_placement_timeout_ms")]
    pub placement_timeout_ms: u64,

    /// How long to wait for the player to arrive somewhere.
    #[serde(default = "default_movement_timeout_ms")]
    pub movement_timeout_ms: u64,

    /// Interval between phantom sweeps while draining.
    #[serde(default = "default_phantom_sweep_interval_ms")]
    pub phantom_sweep_interval_ms: u64,

    /// Cool-off before an entity whose interaction failed is tried again.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            armed_grace: default_armed_grace(),
            grace: default_grace(),
            grace_dwell_ms: default_grace_dwell_ms(),
            collapsed_urgent_ms: default_collapsed_urgent_ms(),
            armed_critical_ms: default_armed_critical_ms(),
            freshness: default_freshness(),
            settle: default_settle(),
            placement_timeout_ms: default_placement_timeout_ms(),
            movement_timeout_ms: default_movement_timeout_ms(),
            phantom_sweep_interval_ms: default_phantom_sweep_interval_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl TimingConfig {
    /// Validate ranges and thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on an inverted range or a zero tick.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(invalid("timing.tick_interval_ms must be at least 1"));
        }
        let ranges = [
            ("timing.armed_grace", self.armed_grace),
            ("timing.grace", self.grace),
            ("timing.freshness", self.freshness),
            ("timing.settle", self.settle),
        ];
        for (name, range) in ranges {
            if range.is_inverted() {
                return Err(invalid(&format!("{name}: min_ms exceeds max_ms")));
            }
        }
        if self.armed_critical_ms >= self.collapsed_urgent_ms {
            return Err(invalid(
                "timing.armed_critical_ms must be shorter than timing.collapsed_urgent_ms",
            ));
        }
        Ok(())
    }
}

/// Interaction dispatcher limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DispatchConfig {
    /// Attempts per interaction before reporting failure.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Maximum Chebyshev distance from which a trap can be handled.
    #[serde(default = "default_interaction_range")]
    pub interaction_range: u32,

    /// Distance from a target tile that counts as arrival for placement.
    #[serde(default)]
    pub arrival_tolerance: u32,

    /// Distance from a trap that counts as a good enough vantage.
    #[serde(default = "default_vantage_tolerance")]
    pub vantage_tolerance: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interaction_range: default_interaction_range(),
            arrival_tolerance: 0,
            vantage_tolerance: default_vantage_tolerance(),
        }
    }
}

/// Observer API configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObserverConfig {
    /// Whether the observer API is started.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address to bind to.
    #[serde(default = "default_observer_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_observer_port")]
    pub port: u16,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_observer_host(),
            port: default_observer_port(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_max_entities() -> u32 {
    3
}

fn default_zones() -> Vec<Zone> {
    vec![Zone::from_corners(
        Position::new(3200, 3200, 0),
        Position::new(3204, 3204, 0),
    )]
}

const fn default_expedite_probability() -> f64 {
    0.15
}

const fn default_tick_interval_ms() -> u64 {
    600
}

const fn default_armed_grace() -> MillisRange {
    MillisRange::new(2_000, 4_000)
}

const fn default_grace() -> MillisRange {
    MillisRange::new(2_400, 4_400)
}

const fn default_grace_dwell_ms() -> u64 {
    1_200
}

const fn default_collapsed_urgent_ms() -> u64 {
    90_000
}

const fn default_armed_critical_ms() -> u64 {
    60_000
}

const fn default_freshness() -> MillisRange {
    MillisRange::new(10_000, 40_000)
}

const fn default_settle() -> MillisRange {
    MillisRange::new(600, 1_800)
}

const fn default_placement_timeout_ms() -> u64 {
    5_000
}

const fn default_movement_timeout_ms() -> u64 {
    8_000
}

const fn default_phantom_sweep_interval_ms() -> u64 {
    10_000
}

const fn default_retry_backoff_ms() -> u64 {
    3_000
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_interaction_range() -> u32 {
    1
}

const fn default_vantage_tolerance() -> u32 {
    2
}

fn default_observer_host() -> String {
    "127.0.0.1".to_owned()
}

const fn default_observer_port() -> u16 {
    8090
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = TraplineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.max_entities, 3);
        assert_eq!(config.timing.collapsed_urgent_ms, 90_000);
        assert_eq!(config.timing.armed_grace, MillisRange::new(2_000, 4_000));
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r"
session:
  max_entities: 5
  strategy: spaced
  zones:
    - { plane: 0, min_x: 10, min_y: 10, max_x: 14, max_y: 14 }
  expedite_probability: 0.5
  seed: 7

timing:
  tick_interval_ms: 300
  armed_grace: { min_ms: 1000, max_ms: 2000 }
  grace_dwell_ms: 500
  collapsed_urgent_ms: 45000
  armed_critical_ms: 30000

dispatch:
  max_attempts: 4
  interaction_range: 2

observer:
  enabled: false
  port: 9999

logging:
  level: debug
  json: true
";
        let config = TraplineConfig::parse(yaml).unwrap();
        assert_eq!(config.session.max_entities, 5);
        assert_eq!(config.session.strategy, StrategyKind::Spaced);
        assert_eq!(config.session.seed, Some(7));
        assert_eq!(config.session.zones.len(), 1);
        assert_eq!(config.timing.tick_interval_ms, 300);
        assert_eq!(config.timing.armed_grace.max_ms, 2_000);
        // Untouched sections keep their defaults.
        assert_eq!(config.timing.grace, MillisRange::new(2_400, 4_400));
        assert_eq!(config.dispatch.max_attempts, 4);
        assert!(!config.observer.enabled);
        assert!(config.logging.json);
    }

    #[test]
    fn parse_empty_yaml() {
        let config = TraplineConfig::parse("");
        assert!(config.is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let result = TraplineConfig::parse("session:\n  max_entities: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let result = TraplineConfig::parse("timing:\n  settle: { min_ms: 900, max_ms: 100 }\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn empty_zones_are_rejected() {
        let result = TraplineConfig::parse("session:\n  zones: []\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn unknown_strategy_is_a_parse_error() {
        let result = TraplineConfig::parse("session:\n  strategy: zigzag\n");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn range_samples_within_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let range = MillisRange::new(2_000, 4_000);
        for _ in 0..100 {
            let value = range.sample(&mut rng);
            assert!((2_000..=4_000).contains(&value));
        }
        assert_eq!(MillisRange::new(500, 500).sample(&mut rng), 500);
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("trapline-config.yaml");
        if path.exists() {
            let config = TraplineConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
