//! Environment-driven host configuration.
//!
//! | Variable                   | Meaning                                   | Default |
//! |----------------------------|-------------------------------------------|---------|
//! | `FRAMEHUB_READ_TIMEOUT_MS` | host read timeout, `-1` forever, `0` poll | `100`   |
//! | `FRAMEHUB_ENABLE_COLOR`    | probe color streams on open               | `true`  |
//! | `FRAMEHUB_ENABLE_DEPTH`    | probe depth streams on open               | `true`  |
//! | `FRAMEHUB_ENABLE_INFRARED` | probe infrared streams on open            | `true`  |

use crate::types::{StreamType, WaitTimeout};
use std::time::Duration;

/// Which modalities a stream set probes when it opens its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSetConfig {
    pub enable_color: bool,
    pub enable_depth: bool,
    pub enable_infrared: bool,
}

impl Default for StreamSetConfig {
    fn default() -> Self {
        Self {
            enable_color: true,
            enable_depth: true,
            enable_infrared: true,
        }
    }
}

impl StreamSetConfig {
    pub fn from_env() -> Self {
        Self {
            enable_color: read_env_bool("FRAMEHUB_ENABLE_COLOR", true),
            enable_depth: read_env_bool("FRAMEHUB_ENABLE_DEPTH", true),
            enable_infrared: read_env_bool("FRAMEHUB_ENABLE_INFRARED", true),
        }
    }

    pub fn is_enabled(&self, stream_type: StreamType) -> bool {
        match stream_type {
            StreamType::Color => self.enable_color,
            StreamType::Depth => self.enable_depth,
            StreamType::Infrared => self.enable_infrared,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Wait bound used by `Host::read_all`.
    pub read_timeout: WaitTimeout,
    pub stream_set: StreamSetConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            read_timeout: WaitTimeout::Bounded(Duration::from_millis(100)),
            stream_set: StreamSetConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read_timeout = std::env::var("FRAMEHUB_READ_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(WaitTimeout::from_millis)
            .unwrap_or(defaults.read_timeout);

        let config = Self {
            read_timeout,
            stream_set: StreamSetConfig::from_env(),
        };
        log::debug!("host config: {:?}", config);
        config
    }
}

fn read_env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => parse_bool(&v).unwrap_or_else(|| {
            log::warn!("Ignoring {}='{}', expected a boolean", name, v);
            default
        }),
        Err(_) => default,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
