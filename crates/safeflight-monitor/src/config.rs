//! Monitor configuration from environment.

use std::env;
use std::time::Duration;

use safeflight_core::{MonitorParams, ParamError};
use thiserror::Error;

/// Prefix of environment variables that override [`MonitorParams`] fields.
pub const PARAM_PREFIX: &str = "SAFEFLIGHT_PARAM_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name}: expected a positive number, got {value:?}")]
    InvalidSetting { name: &'static str, value: String },
    #[error(transparent)]
    Params(#[from] ParamError),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Control loop rate (Hz)
    pub cycle_hz: f64,
    /// Bound on each command acknowledgement wait
    pub ack_timeout: Duration,
    /// Traffic older than this is ignored
    pub traffic_stale_after: Duration,
    pub params: MonitorParams,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env::vars())
    }

    /// Build from `(name, value)` pairs; anything without the safeflight
    /// prefixes is ignored.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut cycle_hz = 10.0;
        let mut ack_timeout_ms = 1500;
        let mut traffic_stale_ms = 3000;
        let mut overrides = Vec::new();

        for (name, value) in vars {
            match name.as_str() {
                "SAFEFLIGHT_CYCLE_HZ" => {
                    cycle_hz = value
                        .parse::<f64>()
                        .ok()
                        .filter(|hz| hz.is_finite() && *hz > 0.0)
                        .ok_or(ConfigError::InvalidSetting {
                            name: "SAFEFLIGHT_CYCLE_HZ",
                            value: value.clone(),
                        })?;
                }
                "SAFEFLIGHT_ACK_TIMEOUT_MS" => {
                    ack_timeout_ms = parse_millis("SAFEFLIGHT_ACK_TIMEOUT_MS", &value)?;
                }
                "SAFEFLIGHT_TRAFFIC_STALE_MS" => {
                    traffic_stale_ms = parse_millis("SAFEFLIGHT_TRAFFIC_STALE_MS", &value)?;
                }
                _ => {
                    if let Some(key) = name.strip_prefix(PARAM_PREFIX) {
                        overrides.push((key.to_string(), value));
                    }
                }
            }
        }

        Ok(Self {
            cycle_hz,
            ack_timeout: Duration::from_millis(ack_timeout_ms),
            traffic_stale_after: Duration::from_millis(traffic_stale_ms),
            params: MonitorParams::from_pairs(overrides)?,
        })
    }

    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.cycle_hz)
    }
}

fn parse_millis(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse::<u64>()
        .ok()
        .filter(|ms| *ms > 0)
        .ok_or_else(|| ConfigError::InvalidSetting {
            name,
            value: value.to_string(),
        })
}
