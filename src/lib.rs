// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! USB Sentinel - Removable Storage Access-Control Daemon
//!
//! Detects removable storage volumes, verifies a device-bound HMAC token
//! stored on each one, ejects every device that does not carry a valid token
//! and records file activity on the devices that do.
//!
//! ## Modules
//!
//! - `authority` - Fingerprints, shared secret, token issue/verify
//! - `config` - Environment configuration
//! - `enforcement` - Detect → verify → enforce loop
//! - `monitor` - Per-device file activity watchers
//! - `platform` - Host capabilities (enumerate, eject, notify)
//! - `storage` - Token artifacts, audit trail (redb), pause marker

pub mod authority;
pub mod config;
pub mod enforcement;
pub mod error;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod platform;
pub mod storage;
