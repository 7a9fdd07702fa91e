// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token artifact I/O on the device itself.
//!
//! The artifact is a single file at the device root holding exactly the
//! lowercase hex digest as UTF-8 text.

use std::fs::{self, File};
use std::io::{self, Read};

use super::StoragePaths;
use crate::error::TokenWriteError;
use crate::models::{DeviceDescriptor, Token};

/// Upper bound on bytes read from an artifact. A valid token is 64 bytes;
/// anything longer is rejected without reading the rest.
pub const MAX_TOKEN_LEN: u64 = 128;

/// Result of reading a device's token artifact.
///
/// `Absent` is the normal "never enrolled" state; `Io` is an operational
/// anomaly that callers must log before failing closed.
#[derive(Debug)]
pub enum TokenRead {
    Present(Token),
    Absent,
    Corrupt,
    Io(io::Error),
}

/// Reads and writes token artifacts on attached devices.
pub trait TokenStore: Send + Sync {
    fn read(&self, device: &DeviceDescriptor) -> TokenRead;
    fn write(&self, device: &DeviceDescriptor, token: &Token) -> Result<(), TokenWriteError>;
}

/// Token store backed by the device's mounted filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsTokenStore;

impl TokenStore for FsTokenStore {
    fn read(&self, device: &DeviceDescriptor) -> TokenRead {
        let path = StoragePaths::token_artifact(device.root());
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return TokenRead::Absent,
            Err(e) => return TokenRead::Io(e),
        };

        let mut bytes = Vec::with_capacity(64);
        if let Err(e) = file.take(MAX_TOKEN_LEN + 1).read_to_end(&mut bytes) {
            return TokenRead::Io(e);
        }
        if bytes.len() as u64 > MAX_TOKEN_LEN {
            tracing::warn!(
                path = %path.display(),
                limit = MAX_TOKEN_LEN,
                "Token artifact exceeds size limit"
            );
            return TokenRead::Corrupt;
        }

        match String::from_utf8(bytes) {
            // Surrounding whitespace is tolerated on read only.
            Ok(text) => TokenRead::Present(Token::new(text.trim())),
            Err(_) => TokenRead::Corrupt,
        }
    }

    fn write(&self, device: &DeviceDescriptor, token: &Token) -> Result<(), TokenWriteError> {
        let path = StoragePaths::token_artifact(device.root());
        fs::write(&path, token.as_str().as_bytes()).map_err(|source| {
            if source.kind() == io::ErrorKind::PermissionDenied {
                TokenWriteError::PermissionDenied(path.clone())
            } else {
                TokenWriteError::Io { path: path.clone(), source }
            }
        })
    }
}
