// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-device enforcement state, held only while the device is attached.

use std::fmt;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::authority::fingerprint;
use crate::models::{AuthorizationDecision, DeviceDescriptor, Fingerprint};
use crate::monitor::MonitorHandle;
use crate::storage::TokenRead;

/// Identity of a tracked device: fingerprint plus volume path.
///
/// Entries are keyed by fingerprint and volume, not by fingerprint alone: two
/// volumes reporting the same serial get separate entries, each verified
/// against its own artifact and ejected on its own. Devices without a
/// fingerprint are keyed by volume path alone and are still tracked and
/// ejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    fingerprint: Option<Fingerprint>,
    volume_id: String,
}

impl DeviceKey {
    pub fn for_device(device: &DeviceDescriptor) -> Self {
        Self {
            fingerprint: fingerprint(device),
            volume_id: device.volume_id.clone(),
        }
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.fingerprint {
            Some(fp) => write!(f, "{fp}@{}", self.volume_id),
            None => write!(f, "<no-fingerprint>@{}", self.volume_id),
        }
    }
}

/// Enforcement lifecycle of one device.
///
/// `Detected → Verifying → {Authorized, Unauthorized}`, then for
/// unauthorized devices `Ejecting → {Ejected, EjectFailed}`. `Removed` is
/// terminal and only ever logged: the entry is dropped with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Detected,
    Verifying,
    Authorized,
    Unauthorized,
    Ejecting,
    Ejected,
    EjectFailed,
    Removed,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Detected => "detected",
            DeviceState::Verifying => "verifying",
            DeviceState::Authorized => "authorized",
            DeviceState::Unauthorized => "unauthorized",
            DeviceState::Ejecting => "ejecting",
            DeviceState::Ejected => "ejected",
            DeviceState::EjectFailed => "eject_failed",
            DeviceState::Removed => "removed",
        }
    }
}

/// Transient state for an attached device.
#[derive(Debug)]
pub struct EnforcementEntry {
    pub(super) descriptor: DeviceDescriptor,
    pub(super) state: DeviceState,
    pub(super) decision: Option<AuthorizationDecision>,
    pub(super) eject_attempts: u32,
    pub(super) monitor: Option<MonitorHandle>,
    /// Token read that outlived its timeout and has not returned yet.
    pub(super) pending_read: Option<JoinHandle<TokenRead>>,
}

impl EnforcementEntry {
    pub(super) fn detected(descriptor: DeviceDescriptor) -> Self {
        tracing::info!(
            volume = %descriptor.volume_id,
            label = %descriptor.display_name(),
            model = %descriptor.media_model,
            "Device detected"
        );
        Self {
            descriptor,
            state: DeviceState::Detected,
            decision: None,
            eject_attempts: 0,
            monitor: None,
            pending_read: None,
        }
    }

    pub(super) fn transition(&mut self, next: DeviceState) {
        if self.state != next {
            tracing::debug!(
                volume = %self.descriptor.volume_id,
                from = self.state.as_str(),
                to = next.as_str(),
                "Device state transition"
            );
            self.state = next;
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Decision from the most recent cycle.
    pub fn decision(&self) -> Option<&AuthorizationDecision> {
        self.decision.as_ref()
    }

    /// Eject calls made for this device since it was last authorized.
    pub fn eject_attempts(&self) -> u32 {
        self.eject_attempts
    }

    /// Whether a token read from an earlier cycle is still blocked.
    pub fn has_pending_read(&self) -> bool {
        self.pending_read
            .as_ref()
            .is_some_and(|read| !read.is_finished())
    }

    /// Whether a live activity monitor is attached.
    pub fn is_monitored(&self) -> bool {
        self.monitor.as_ref().is_some_and(|m| !m.is_finished())
    }
}
