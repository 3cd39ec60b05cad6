//! Startup configuration from the environment.

use crate::dispatcher::{DEFAULT_FRAME_TIMEOUT, DEFAULT_POLL_PERIOD};
use crate::error::ConfigError;
use serde::Serialize;
use std::time::Duration;

/// Broker publishes, we subscribe.
pub const BPCS_ENDPOINT_ENV: &str = "ITS_GBUS_BPCS_ENDPOINT";
/// Broker subscribes, we publish.
pub const BSCP_ENDPOINT_ENV: &str = "ITS_GBUS_BSCP_ENDPOINT";
pub const POLL_PERIOD_ENV: &str = "ITS_USLP_POLL_PERIOD_MS";
pub const FRAME_TIMEOUT_ENV: &str = "ITS_USLP_FRAME_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeConfig {
    pub bpcs_endpoint: String,
    pub bscp_endpoint: String,
    pub poll_period: Duration,
    pub frame_timeout: Duration,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source. Empty values count as
    /// absent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let bpcs_endpoint = get(BPCS_ENDPOINT_ENV).ok_or(ConfigError::MissingEndpoint {
            what: "bpcs",
            key: BPCS_ENDPOINT_ENV,
        })?;
        let bscp_endpoint = get(BSCP_ENDPOINT_ENV).ok_or(ConfigError::MissingEndpoint {
            what: "bscp",
            key: BSCP_ENDPOINT_ENV,
        })?;

        let poll_period = match get(POLL_PERIOD_ENV) {
            Some(value) => parse_millis(POLL_PERIOD_ENV, &value)?,
            None => DEFAULT_POLL_PERIOD,
        };
        let frame_timeout = match get(FRAME_TIMEOUT_ENV) {
            Some(value) => parse_millis(FRAME_TIMEOUT_ENV, &value)?,
            None => DEFAULT_FRAME_TIMEOUT,
        };

        Ok(Self {
            bpcs_endpoint,
            bscp_endpoint,
            poll_period,
            frame_timeout,
        })
    }
}

fn parse_millis(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(millis) if millis > 0 => Ok(Duration::from_millis(millis)),
        _ => Err(ConfigError::InvalidDuration {
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_duration_is_rejected() {
        assert!(parse_millis(POLL_PERIOD_ENV, "0").is_err());
        assert_eq!(parse_millis(POLL_PERIOD_ENV, " 250 ").unwrap(), Duration::from_millis(250));
    }
}
