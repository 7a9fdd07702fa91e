// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the daemon. Configuration is loaded from the environment once
//! at startup and never derived from runtime state.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SENTINEL_DATA_DIR` | Audit database and pause marker directory | `/var/lib/usb-sentinel` |
//! | `SENTINEL_SECRET_FILE` | Shared MAC secret file | `/etc/usb-sentinel/secret.key` |
//! | `SENTINEL_POLL_INTERVAL_SECS` | Enforcement cycle interval | `5` |
//! | `SENTINEL_EJECT_RETRIES` | Eject retries per cycle after a failure | `1` |
//! | `SENTINEL_EJECT_RETRY_DELAY_MS` | Delay before each eject retry | `1000` |
//! | `SENTINEL_IO_TIMEOUT_SECS` | Bound on enumeration and token reads | `3` |
//! | `SENTINEL_EJECT_TIMEOUT_SECS` | Bound on a single eject call | `10` |
//! | `SENTINEL_NOTIFY` | Desktop notifications (`true`/`false`) | `true` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::storage::paths::DATA_ROOT;

/// Environment variable name for the daemon state directory.
pub const DATA_DIR_ENV: &str = "SENTINEL_DATA_DIR";

/// Environment variable name for the shared secret file path.
///
/// The secret itself is never accepted through the environment.
pub const SECRET_FILE_ENV: &str = "SENTINEL_SECRET_FILE";

pub const POLL_INTERVAL_ENV: &str = "SENTINEL_POLL_INTERVAL_SECS";
pub const EJECT_RETRIES_ENV: &str = "SENTINEL_EJECT_RETRIES";
pub const EJECT_RETRY_DELAY_ENV: &str = "SENTINEL_EJECT_RETRY_DELAY_MS";
pub const IO_TIMEOUT_ENV: &str = "SENTINEL_IO_TIMEOUT_SECS";
pub const EJECT_TIMEOUT_ENV: &str = "SENTINEL_EJECT_TIMEOUT_SECS";
pub const NOTIFY_ENV: &str = "SENTINEL_NOTIFY";

/// Environment variable selecting `json` or `pretty` log output.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_SECRET_FILE: &str = "/etc/usb-sentinel/secret.key";

/// Timing and retry policy for the enforcement loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementPolicy {
    pub poll_interval: Duration,
    /// Retries after the first failed eject, within one cycle.
    pub eject_retries: u32,
    pub eject_retry_delay: Duration,
    pub io_timeout: Duration,
    pub eject_timeout: Duration,
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            eject_retries: 1,
            eject_retry_delay: Duration::from_secs(1),
            io_timeout: Duration::from_secs(3),
            eject_timeout: Duration::from_secs(10),
        }
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub secret_file: PathBuf,
    pub policy: EnforcementPolicy,
    pub notifications: bool,
}

impl DaemonConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = EnforcementPolicy::default();

        let poll_secs: u64 = parse_or(&lookup, POLL_INTERVAL_ENV, defaults.poll_interval.as_secs())?;
        if poll_secs == 0 {
            return Err(ConfigError::Invalid {
                var: POLL_INTERVAL_ENV,
                value: "0".to_string(),
                reason: "must be at least 1 second".to_string(),
            });
        }

        let policy = EnforcementPolicy {
            poll_interval: Duration::from_secs(poll_secs),
            eject_retries: parse_or(&lookup, EJECT_RETRIES_ENV, defaults.eject_retries)?,
            eject_retry_delay: Duration::from_millis(parse_or(
                &lookup,
                EJECT_RETRY_DELAY_ENV,
                defaults.eject_retry_delay.as_millis() as u64,
            )?),
            io_timeout: Duration::from_secs(parse_or(
                &lookup,
                IO_TIMEOUT_ENV,
                defaults.io_timeout.as_secs(),
            )?),
            eject_timeout: Duration::from_secs(parse_or(
                &lookup,
                EJECT_TIMEOUT_ENV,
                defaults.eject_timeout.as_secs(),
            )?),
        };

        Ok(Self {
            data_dir: lookup(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DATA_ROOT)),
            secret_file: lookup(SECRET_FILE_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SECRET_FILE)),
            policy,
            notifications: parse_or(&lookup, NOTIFY_ENV, true)?,
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
