// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared data model: device descriptors, fingerprints, tokens, decisions
//! and audit records.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Serial value platform enumerators report when the hardware exposes none.
pub const UNKNOWN_SERIAL: &str = "Unknown";

/// One removable storage volume as seen by a single enumeration pass.
///
/// Produced fresh on every enumeration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Logical path the volume is reachable under (its mount point).
    pub volume_id: String,
    /// Volume label. Chosen by whoever formatted the device, so never trusted.
    pub label: String,
    /// Hardware serial of the backing disk, as reported by the platform.
    pub raw_serial: String,
    /// Disk model string.
    pub media_model: String,
    /// Filesystem type (e.g. `vfat`).
    pub filesystem: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl DeviceDescriptor {
    /// Root directory of the volume.
    pub fn root(&self) -> &Path {
        Path::new(&self.volume_id)
    }

    /// Label for log lines and notifications, falling back to the volume path.
    pub fn display_name(&self) -> &str {
        if self.label.trim().is_empty() {
            &self.volume_id
        } else {
            &self.label
        }
    }
}

/// Stable identity string derived from a device's hardware serial.
///
/// Only [`crate::authority::fingerprint`] constructs these, so a value of this
/// type is always non-empty and never the placeholder serial.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub(crate) fn new_unchecked(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authorization token: lowercase hex HMAC-SHA256 of a fingerprint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    // Tokens are bearer credentials; only a prefix goes to logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "Token({prefix}..)")
    }
}

/// Why a verification could not reach a definite answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum IndeterminateReason {
    /// The device reports no usable serial.
    NoFingerprint,
    /// No token artifact on the device (never enrolled).
    TokenAbsent,
    /// The artifact exists but is not valid UTF-8 text.
    TokenCorrupt,
    /// Reading the artifact failed or exceeded the I/O timeout.
    TokenIo(String),
}

/// Outcome of verifying one device in one enforcement cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationDecision {
    Authorized,
    /// A token was presented and did not match.
    Unauthorized,
    Indeterminate(IndeterminateReason),
}

impl AuthorizationDecision {
    /// Fail-closed: only an exact token match permits the device.
    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthorizationDecision::Authorized)
    }
}

impl fmt::Display for AuthorizationDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorizationDecision::Authorized => f.write_str("authorized"),
            AuthorizationDecision::Unauthorized => f.write_str("unauthorized"),
            AuthorizationDecision::Indeterminate(reason) => match reason {
                IndeterminateReason::NoFingerprint => f.write_str("indeterminate(no_fingerprint)"),
                IndeterminateReason::TokenAbsent => f.write_str("indeterminate(token_absent)"),
                IndeterminateReason::TokenCorrupt => f.write_str("indeterminate(token_corrupt)"),
                IndeterminateReason::TokenIo(e) => write!(f, "indeterminate(token_io: {e})"),
            },
        }
    }
}

/// File activity kinds recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Modified,
    Deleted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Modified => "modified",
            AuditAction::Deleted => "deleted",
        }
    }
}

/// One observed file event on an authorized device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub device_label: String,
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Build a record stamped with the current time.
    pub fn new(
        device_label: impl Into<String>,
        fingerprint: Fingerprint,
        path: impl Into<PathBuf>,
        action: AuditAction,
    ) -> Self {
        Self {
            device_label: device_label.into(),
            fingerprint,
            path: path.into(),
            action,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_descriptor(volume_id: &str, serial: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        volume_id: volume_id.to_string(),
        label: "KINGSTON".to_string(),
        raw_serial: serial.to_string(),
        media_model: "DataTraveler 3.0".to_string(),
        filesystem: "vfat".to_string(),
        total_bytes: 16_000_000_000,
        free_bytes: 8_000_000_000,
    }
}
