//! Controller configuration read from the environment

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use vpce_core::DeletionPolicy;

pub const DEFAULT_REGION: &str = "us-west-2";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Region used when a VPCEndpoint does not name one (`VPCE_DEFAULT_REGION`)
    pub default_region: String,
    /// Service template file; the built-in ExternalName template otherwise (`VPCE_SERVICE_TEMPLATE`)
    pub service_template: Option<PathBuf>,
    /// `VPCE_POLL_INTERVAL_SECS`, `VPCE_DELETION_TIMEOUT_SECS`, `VPCE_MAX_POLL_FAULTS`
    pub deletion: DeletionPolicy,
    /// Backoff before retrying a transient fault (`VPCE_ERROR_REQUEUE_SECS`)
    pub error_requeue: Duration,
    /// `VPCE_LOG_FORMAT`: text or json
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            default_region: DEFAULT_REGION.to_string(),
            service_template: None,
            deletion: DeletionPolicy::default(),
            error_requeue: Duration::from_secs(30),
            log_format: LogFormat::Text,
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(region) = lookup("VPCE_DEFAULT_REGION").filter(|r| !r.is_empty()) {
            config.default_region = region;
        }
        config.service_template = lookup("VPCE_SERVICE_TEMPLATE")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        if let Some(secs) = seconds(&lookup, "VPCE_POLL_INTERVAL_SECS")? {
            config.deletion.interval = secs;
        }
        if let Some(secs) = seconds(&lookup, "VPCE_DELETION_TIMEOUT_SECS")? {
            config.deletion.timeout = secs;
        }
        if let Some(value) = lookup("VPCE_MAX_POLL_FAULTS") {
            config.deletion.max_faults = value.parse().map_err(|_| ConfigError::Invalid {
                key: "VPCE_MAX_POLL_FAULTS",
                value,
            })?;
        }
        if let Some(secs) = seconds(&lookup, "VPCE_ERROR_REQUEUE_SECS")? {
            config.error_requeue = secs;
        }

        config.log_format = match lookup("VPCE_LOG_FORMAT").as_deref() {
            None | Some("") | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "VPCE_LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        Ok(config)
    }
}

fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<Duration>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => match value.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs))),
            _ => Err(ConfigError::Invalid { key, value }),
        },
    }
}
