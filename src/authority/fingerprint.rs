// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Device identity derivation.
//!
//! The fingerprint comes from the hardware serial only. Label and mount path
//! are chosen by whoever holds the device, so they never feed into identity.

use crate::models::{DeviceDescriptor, Fingerprint, UNKNOWN_SERIAL};

/// Derive the fingerprint for a device, or `None` when it has no usable serial.
///
/// A `None` device can never be authorized.
pub fn fingerprint(descriptor: &DeviceDescriptor) -> Option<Fingerprint> {
    let serial = descriptor.raw_serial.trim();
    if serial.is_empty() || serial == UNKNOWN_SERIAL {
        return None;
    }
    Some(Fingerprint::new_unchecked(serial.to_string()))
}
