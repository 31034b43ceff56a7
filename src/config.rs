//! Conductor configuration.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic** — builder methods applied to a loaded config
//! 2. **Environment variables** — `CONDUCTOR_*` values
//! 3. **Config file** — a TOML file (requires the `config-file` feature)
//! 4. **Defaults** — [`ConductorConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `CONDUCTOR_CLOCK_PERIOD_MS` | `u64` | `clock_period` |
//! | `CONDUCTOR_RUN_LIMIT_MS` | `u64` | `run_limit` |
//! | `CONDUCTOR_DEADLOCK_STRIKES` | `u32` | `deadlock_strikes` |
//! | `CONDUCTOR_ERROR_CAPACITY` | `usize` | `error_capacity` |
//! | `CONDUCTOR_CANCEL_GRACE_MS` | `u64` | `cancel_grace` |
//! | `CONDUCTOR_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |

use std::time::Duration;

use crate::error::{Error, ErrorKind};
use crate::manager::{DEFAULT_CLOCK_PERIOD, DEFAULT_DEADLOCK_STRIKES, DEFAULT_RUN_LIMIT};
use crate::sink::DEFAULT_ERROR_CAPACITY;

/// Environment variable name for the clock period in milliseconds.
pub const ENV_CLOCK_PERIOD_MS: &str = "CONDUCTOR_CLOCK_PERIOD_MS";
/// Environment variable name for the run limit in milliseconds.
pub const ENV_RUN_LIMIT_MS: &str = "CONDUCTOR_RUN_LIMIT_MS";
/// Environment variable name for the deadlock strike threshold.
pub const ENV_DEADLOCK_STRIKES: &str = "CONDUCTOR_DEADLOCK_STRIKES";
/// Environment variable name for the error sink capacity.
pub const ENV_ERROR_CAPACITY: &str = "CONDUCTOR_ERROR_CAPACITY";
/// Environment variable name for the cancellation grace period in milliseconds.
pub const ENV_CANCEL_GRACE_MS: &str = "CONDUCTOR_CANCEL_GRACE_MS";
/// Environment variable name for the worker thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "CONDUCTOR_THREAD_NAME_PREFIX";

/// Default time `execute` waits for cancelled workers to stop.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(1);
/// Default prefix for unnamed worker threads.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "conductor-thread";

/// Error raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Expected type.
        expected: &'static str,
        /// Raw value.
        value: String,
    },
    /// A field that must be positive was zero.
    #[error("{field} must be greater than zero")]
    Zero {
        /// Field name.
        field: &'static str,
    },
    /// The config file could not be read.
    #[cfg(feature = "config-file")]
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file was not valid TOML for this schema.
    #[cfg(feature = "config-file")]
    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorKind::Config)
            .with_message(err.to_string())
            .with_source(err)
    }
}

/// Settings for one conductor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConductorConfig {
    /// Interval between clock manager polls.
    pub clock_period: Duration,
    /// How long workers may run without the clock advancing.
    pub run_limit: Duration,
    /// Consecutive idle polls before a deadlock is declared.
    pub deadlock_strikes: u32,
    /// Number of failures retained per run.
    pub error_capacity: usize,
    /// How long `execute` waits for cancelled workers before detaching them.
    pub cancel_grace: Duration,
    /// Prefix for unnamed worker threads.
    pub thread_name_prefix: String,
}

impl ConductorConfig {
    /// Creates a configuration with the default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock_period: DEFAULT_CLOCK_PERIOD,
            run_limit: DEFAULT_RUN_LIMIT,
            deadlock_strikes: DEFAULT_DEADLOCK_STRIKES,
            error_capacity: DEFAULT_ERROR_CAPACITY,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }

    /// Loads defaults overridden by `CONDUCTOR_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the clock period.
    #[must_use]
    pub const fn clock_period(mut self, period: Duration) -> Self {
        self.clock_period = period;
        self
    }

    /// Sets the run limit.
    #[must_use]
    pub const fn run_limit(mut self, limit: Duration) -> Self {
        self.run_limit = limit;
        self
    }

    /// Sets the deadlock strike threshold.
    #[must_use]
    pub const fn deadlock_strikes(mut self, strikes: u32) -> Self {
        self.deadlock_strikes = strikes;
        self
    }

    /// Sets the error sink capacity.
    #[must_use]
    pub const fn error_capacity(mut self, capacity: usize) -> Self {
        self.error_capacity = capacity;
        self
    }

    /// Sets the cancellation grace period.
    #[must_use]
    pub const fn cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Total silence tolerated before a deadlock is declared.
    #[must_use]
    pub fn deadlock_window(&self) -> Duration {
        self.clock_period * self.deadlock_strikes
    }

    /// Checks that every setting is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clock_period.is_zero() {
            return Err(ConfigError::Zero {
                field: "clock_period",
            });
        }
        if self.run_limit.is_zero() {
            return Err(ConfigError::Zero { field: "run_limit" });
        }
        if self.deadlock_strikes == 0 {
            return Err(ConfigError::Zero {
                field: "deadlock_strikes",
            });
        }
        if self.error_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "error_capacity",
            });
        }
        Ok(())
    }

    /// Applies `CONDUCTOR_*` environment variables that are set.
    ///
    /// Returns an error if a variable is set but unparseable.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(val) = read_env(ENV_CLOCK_PERIOD_MS) {
            self.clock_period = Duration::from_millis(parse_u64(ENV_CLOCK_PERIOD_MS, &val)?);
        }
        if let Some(val) = read_env(ENV_RUN_LIMIT_MS) {
            self.run_limit = Duration::from_millis(parse_u64(ENV_RUN_LIMIT_MS, &val)?);
        }
        if let Some(val) = read_env(ENV_DEADLOCK_STRIKES) {
            self.deadlock_strikes = parse_u32(ENV_DEADLOCK_STRIKES, &val)?;
        }
        if let Some(val) = read_env(ENV_ERROR_CAPACITY) {
            self.error_capacity = parse_usize(ENV_ERROR_CAPACITY, &val)?;
        }
        if let Some(val) = read_env(ENV_CANCEL_GRACE_MS) {
            self.cancel_grace = Duration::from_millis(parse_u64(ENV_CANCEL_GRACE_MS, &val)?);
        }
        if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
            self.thread_name_prefix = val;
        }
        Ok(())
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_u64(var: &'static str, val: &str) -> Result<u64, ConfigError> {
    val.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        expected: "unsigned integer",
        value: val.to_string(),
    })
}

fn parse_u32(var: &'static str, val: &str) -> Result<u32, ConfigError> {
    val.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        expected: "u32",
        value: val.to_string(),
    })
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        expected: "unsigned integer",
        value: val.to_string(),
    })
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable conductor configuration.
///
/// ```toml
/// [clock]
/// period_ms = 10
/// run_limit_ms = 5000
/// deadlock_strikes = 50
///
/// [run]
/// error_capacity = 20
/// cancel_grace_ms = 1000
/// thread_name_prefix = "conductor-thread"
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct ConductorTomlConfig {
    /// Clock manager settings.
    #[serde(default)]
    pub clock: ClockToml,
    /// Run settings.
    #[serde(default)]
    pub run: RunToml,
}

/// `[clock]` section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct ClockToml {
    /// Clock period in milliseconds.
    pub period_ms: Option<u64>,
    /// Run limit in milliseconds.
    pub run_limit_ms: Option<u64>,
    /// Deadlock strike threshold.
    pub deadlock_strikes: Option<u32>,
}

/// `[run]` section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct RunToml {
    /// Error sink capacity.
    pub error_capacity: Option<usize>,
    /// Cancellation grace period in milliseconds.
    pub cancel_grace_ms: Option<u64>,
    /// Worker thread name prefix.
    pub thread_name_prefix: Option<String>,
}

#[cfg(feature = "config-file")]
impl ConductorConfig {
    /// Applies the fields present in a parsed TOML config.
    pub fn apply_toml(&mut self, toml: &ConductorTomlConfig) {
        if let Some(v) = toml.clock.period_ms {
            self.clock_period = Duration::from_millis(v);
        }
        if let Some(v) = toml.clock.run_limit_ms {
            self.run_limit = Duration::from_millis(v);
        }
        if let Some(v) = toml.clock.deadlock_strikes {
            self.deadlock_strikes = v;
        }
        if let Some(v) = toml.run.error_capacity {
            self.error_capacity = v;
        }
        if let Some(v) = toml.run.cancel_grace_ms {
            self.cancel_grace = Duration::from_millis(v);
        }
        if let Some(ref v) = toml.run.thread_name_prefix {
            self.thread_name_prefix.clone_from(v);
        }
    }

    /// Parses a TOML string on top of the defaults.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let parsed: ConductorTomlConfig = toml::from_str(toml_str)?;
        let mut config = Self::new();
        config.apply_toml(&parsed);
        config.validate()?;
        Ok(config)
    }

    /// Loads defaults, then the TOML file at `path`, then environment
    /// overrides.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let parsed: ConductorTomlConfig = toml::from_str(&content)?;
        let mut config = Self::new();
        config.apply_toml(&parsed);
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }
}
