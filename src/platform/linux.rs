// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Linux implementations of the platform collaborators.
//!
//! - Enumeration parses `lsblk --json --bytes`.
//! - Ejection shells out to `eject`.
//! - Notifications go through `notify-send`.

use std::process::Command;

use serde::Deserialize;

use super::{DeviceEnumerator, Ejector, Notifier};
use crate::error::{EjectError, EnumerationError};
use crate::models::{DeviceDescriptor, UNKNOWN_SERIAL};

const LSBLK_COLUMNS: &str = "NAME,LABEL,SERIAL,MODEL,FSTYPE,SIZE,FSAVAIL,MOUNTPOINT,RM,TRAN";

// =============================================================================
// Enumeration
// =============================================================================

/// Lists mounted filesystems on USB or removable disks via `lsblk`.
#[derive(Debug, Default, Clone)]
pub struct LsblkEnumerator;

impl DeviceEnumerator for LsblkEnumerator {
    fn list(&self) -> Result<Vec<DeviceDescriptor>, EnumerationError> {
        let output = Command::new("lsblk")
            .args(["--json", "--bytes", "--output", LSBLK_COLUMNS])
            .output()
            .map_err(|e| EnumerationError::Command(e.to_string()))?;

        if !output.status.success() {
            return Err(EnumerationError::Command(format!(
                "lsblk exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_lsblk(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    label: Option<String>,
    serial: Option<String>,
    model: Option<String>,
    fstype: Option<String>,
    size: Option<Loose>,
    fsavail: Option<Loose>,
    mountpoint: Option<String>,
    rm: Option<Loose>,
    tran: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

/// Older util-linux prints every column as a string; newer ones use JSON
/// numbers and booleans.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Loose {
    Bool(bool),
    Number(u64),
    Text(String),
}

impl Loose {
    fn as_u64(&self) -> u64 {
        match self {
            Loose::Number(n) => *n,
            Loose::Text(s) => s.trim().parse().unwrap_or(0),
            Loose::Bool(_) => 0,
        }
    }

    fn as_bool(&self) -> bool {
        match self {
            Loose::Bool(b) => *b,
            Loose::Number(n) => *n != 0,
            Loose::Text(s) => s.trim() == "1" || s.trim().eq_ignore_ascii_case("true"),
        }
    }
}

/// Turn `lsblk` JSON into descriptors, one per mounted filesystem.
///
/// Partitions inherit the serial and model of their disk.
pub fn parse_lsblk(json: &[u8]) -> Result<Vec<DeviceDescriptor>, EnumerationError> {
    let output: LsblkOutput = serde_json::from_slice(json)?;
    let mut devices = Vec::new();

    for disk in &output.blockdevices {
        let usb = disk.tran.as_deref() == Some("usb");
        let removable = disk.rm.as_ref().is_some_and(Loose::as_bool);
        if !usb && !removable {
            continue;
        }

        let serial = non_blank(disk.serial.as_deref()).unwrap_or(UNKNOWN_SERIAL);
        let model = non_blank(disk.model.as_deref()).unwrap_or("Unknown");
        collect_mounted(disk, serial, model, &mut devices);
    }

    Ok(devices)
}

fn collect_mounted(
    node: &LsblkDevice,
    serial: &str,
    model: &str,
    out: &mut Vec<DeviceDescriptor>,
) {
    if let Some(mountpoint) = non_blank(node.mountpoint.as_deref()) {
        if mountpoint != "[SWAP]" {
            out.push(DeviceDescriptor {
                volume_id: mountpoint.to_string(),
                label: node.label.clone().unwrap_or_default(),
                raw_serial: serial.to_string(),
                media_model: model.to_string(),
                filesystem: node.fstype.clone().unwrap_or_default(),
                total_bytes: node.size.as_ref().map_or(0, Loose::as_u64),
                free_bytes: node.fsavail.as_ref().map_or(0, Loose::as_u64),
            });
        }
    }
    for child in &node.children {
        collect_mounted(child, serial, model, out);
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// =============================================================================
// Ejection
// =============================================================================

/// Unmounts and powers down a volume with the `eject` utility.
#[derive(Debug, Default, Clone)]
pub struct CommandEjector;

impl Ejector for CommandEjector {
    fn eject(&self, volume_id: &str) -> Result<(), EjectError> {
        let output = Command::new("eject")
            .arg(volume_id)
            .output()
            .map_err(|e| EjectError::Failed(format!("failed to run eject: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(EjectError::Failed(format!(
                "eject exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// Desktop notifications through `notify-send`.
#[derive(Debug, Default, Clone)]
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) {
        let result = Command::new("notify-send")
            .args(["--app-name=USB Sentinel", "--expire-time=5000", title, message])
            .status();
        match result {
            Ok(status) if status.success() => {}
            Ok(status) => tracing::debug!(%status, title, "notify-send failed"),
            Err(e) => tracing::debug!(error = %e, title, "notify-send unavailable"),
        }
    }
}
