// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared MAC secret, loaded once at startup.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::SecretError;

/// Process-wide MAC key. Immutable after load.
///
/// Rotating the file contents invalidates every token issued under the old
/// value.
#[derive(Clone)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, SecretError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(SecretError::Empty("<inline>".into()));
        }
        Ok(Self(bytes))
    }

    /// Read the secret from a protected file.
    ///
    /// Trailing whitespace (an editor's final newline) is not part of the key.
    pub fn load(path: &Path) -> Result<Self, SecretError> {
        let raw = fs::read(path).map_err(|source| SecretError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        warn_if_exposed(path);

        let end = raw
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(0, |i| i + 1);
        if end == 0 {
            return Err(SecretError::Empty(path.to_path_buf()));
        }

        tracing::info!(path = %path.display(), "Loaded shared secret");
        Ok(Self(raw[..end].to_vec()))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

#[cfg(unix)]
fn warn_if_exposed(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(meta) = fs::metadata(path) {
        let mode = meta.permissions().mode();
        if mode & 0o077 != 0 {
            tracing::warn!(
                path = %path.display(),
                mode = format!("{:o}", mode & 0o777),
                "Secret file is readable by group or other users"
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_exposed(_path: &Path) {}
