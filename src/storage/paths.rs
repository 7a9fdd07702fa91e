// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the daemon's on-disk layout.

use std::path::{Path, PathBuf};

/// Default base directory for daemon state.
pub const DATA_ROOT: &str = "/var/lib/usb-sentinel";

/// Name of the token artifact at the root of every enrolled device.
///
/// Part of the wire format: other implementations look for the same name.
pub const TOKEN_FILE_NAME: &str = "mss_comp_license.key";

/// Storage path utilities for daemon state.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory for all daemon state.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Embedded audit database.
    pub fn audit_db(&self) -> PathBuf {
        self.root.join("audit.redb")
    }

    /// Marker the enrollment tool holds while it runs.
    pub fn enrollment_pause_marker(&self) -> PathBuf {
        self.root.join("enrollment.pause")
    }

    /// Token artifact location on a device mounted at `device_root`.
    pub fn token_artifact(device_root: &Path) -> PathBuf {
        device_root.join(TOKEN_FILE_NAME)
    }
}
