// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Platform Collaborators
//!
//! Capability traits for everything the daemon asks of the host: listing
//! removable volumes, ejecting one, and showing a desktop notification.
//! The enforcement loop only sees these traits.
//!
//! All calls may block. Callers run them on the blocking pool under a timeout.

#[cfg(target_os = "linux")]
pub mod linux;

use crate::error::{EjectError, EnumerationError};
use crate::models::DeviceDescriptor;

/// Lists removable storage volumes currently attached.
pub trait DeviceEnumerator: Send + Sync {
    fn list(&self) -> Result<Vec<DeviceDescriptor>, EnumerationError>;
}

/// Physically disconnects a volume.
pub trait Ejector: Send + Sync {
    fn eject(&self, volume_id: &str) -> Result<(), EjectError>;
}

/// Fire-and-forget user notification. Implementations swallow their own failures.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Notifier that only writes to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        tracing::info!(title, message, "Notification");
    }
}
