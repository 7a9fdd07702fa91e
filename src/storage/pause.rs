// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Enrollment pause marker.
//!
//! While an operator enrolls a device, the daemon must not eject it. The
//! enrollment tool holds a marker file for the duration; the enforcement loop
//! keeps verifying and logging but skips ejection while a fresh marker exists.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::StoragePaths;

/// Markers older than this are treated as left behind by a crashed tool.
pub const MAX_PAUSE_AGE: Duration = Duration::from_secs(300);

/// Read side, used by the enforcement loop.
#[derive(Debug, Clone)]
pub struct EnrollmentPause {
    marker: PathBuf,
    max_age: Duration,
}

impl EnrollmentPause {
    pub fn new(paths: &StoragePaths) -> Self {
        Self {
            marker: paths.enrollment_pause_marker(),
            max_age: MAX_PAUSE_AGE,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Whether ejection is currently suspended.
    pub fn is_active(&self) -> bool {
        let Ok(meta) = fs::metadata(&self.marker) else {
            return false;
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .unwrap_or_default();
        if age > self.max_age {
            tracing::warn!(
                marker = %self.marker.display(),
                age_secs = age.as_secs(),
                "Ignoring stale enrollment pause marker"
            );
            return false;
        }
        true
    }
}

/// Write side, held by the enrollment tool. Removes the marker on drop.
#[derive(Debug)]
pub struct PauseGuard {
    marker: PathBuf,
}

impl PauseGuard {
    pub fn acquire(paths: &StoragePaths) -> io::Result<Self> {
        fs::create_dir_all(paths.root())?;
        let marker = paths.enrollment_pause_marker();
        fs::write(&marker, std::process::id().to_string())?;
        Ok(Self { marker })
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.marker) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(marker = %self.marker.display(), error = %e, "Failed to remove pause marker");
            }
        }
    }
}
