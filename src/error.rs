// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy shared across the daemon.
//!
//! None of these halt the enforcement loop. The only fatal path is
//! [`SecretError`] (and [`ConfigError`]) at startup.

use std::io;
use std::path::PathBuf;

/// Token issuance failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthorityError {
    /// The device has no usable serial, so no token can be bound to it.
    #[error("device has no valid fingerprint")]
    InvalidFingerprint,
}

/// Shared secret loading failures. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("failed to read secret file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("secret file {0} is empty")]
    Empty(PathBuf),
}

/// Failures writing the token artifact to a device.
#[derive(Debug, thiserror::Error)]
pub enum TokenWriteError {
    #[error("permission denied writing {0}")]
    PermissionDenied(PathBuf),

    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Disconnect failures. Both variants are eligible for retry.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EjectError {
    #[error("eject failed: {0}")]
    Failed(String),

    #[error("eject timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

/// Device enumeration failures. Resolve to an empty device set for the cycle.
#[derive(Debug, thiserror::Error)]
pub enum EnumerationError {
    #[error("failed to run device listing: {0}")]
    Command(String),

    #[error("failed to parse device listing: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("device listing timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

/// Failures setting up a file activity watch.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to watch {path}: {reason}")]
    Setup { path: PathBuf, reason: String },

    #[error("file watching is unavailable on this platform")]
    Unsupported,
}

/// Invalid process configuration. Fatal at startup.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}
