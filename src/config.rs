//! config.rs
//! Run configuration loaded from TOML. Every field has a default, so an empty
//! file (or no file at all) gives the stock 5 s step test.

use std::{fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::drive::encoder::Position;
use crate::error::ConfigError;
use crate::scheduling::task::ServoTaskConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Proportional gain used for test runs.
    pub kp: f64,
    /// Target position in ticks.
    pub setpoint: Position,
    /// Symmetric actuator clamp, in percent.
    pub duty_limit: f64,
    /// Width of the hardware tick counter.
    pub counter_bits: u32,
    /// Length of one streaming run.
    pub test_duration_ms: u64,
    /// Control/sampling interval used when the host sends none.
    pub interval_ms: u64,
    pub priority: u8,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            kp: 0.05,
            setpoint: 100_000,
            duty_limit: 100.0,
            counter_bits: 16,
            test_duration_ms: 5_000,
            interval_ms: 10,
            priority: 1,
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: RunConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid("interval_ms must be at least 1".into()));
        }
        if !(self.duty_limit > 0.0 && self.duty_limit.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "duty_limit must be positive, got {}",
                self.duty_limit
            )));
        }
        if !(2..=32).contains(&self.counter_bits) {
            return Err(ConfigError::Invalid(format!(
                "counter_bits must be within 2..=32, got {}",
                self.counter_bits
            )));
        }
        Ok(())
    }

    /// Samples in one run at `interval_ms` (never zero).
    pub fn samples_for(&self, interval_ms: u64) -> u64 {
        (self.test_duration_ms / interval_ms.max(1)).max(1)
    }

    /// Task configuration for one streaming run at `interval_ms`.
    pub fn test_run(&self, interval_ms: u64) -> ServoTaskConfig {
        ServoTaskConfig::single_run(self.kp, self.setpoint, self.samples_for(interval_ms))
    }

    /// Copy with the gain and/or setpoint replaced for a single test.
    pub fn with_overrides(&self, kp: Option<f64>, setpoint: Option<Position>) -> Self {
        Self {
            kp: kp.unwrap_or(self.kp),
            setpoint: setpoint.unwrap_or(self.setpoint),
            ..self.clone()
        }
    }
}

/// Reads one operator-typed override. A blank line keeps the configured value.
pub fn parse_override<T: FromStr>(input: &str) -> Result<Option<T>, ConfigError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    input
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid(format!("'{}' is not a valid value", input)))
}
