// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Everything the daemon persists or reads from disk.
//!
//! ## Storage Layout
//!
//! ```text
//! /var/lib/usb-sentinel/
//!   audit.redb          # Append-only file activity audit trail
//!   enrollment.pause    # Present while the enrollment tool runs
//!
//! <device root>/
//!   mss_comp_license.key  # Lowercase hex HMAC token, no trailing data
//! ```

pub mod audit;
pub mod paths;
pub mod pause;
pub mod token_store;

pub use audit::{AuditError, AuditResult, AuditSink, RedbAuditSink, StoredAuditRecord};
pub use paths::{StoragePaths, TOKEN_FILE_NAME};
pub use pause::{EnrollmentPause, PauseGuard};
pub use token_store::{FsTokenStore, TokenRead, TokenStore, MAX_TOKEN_LEN};
