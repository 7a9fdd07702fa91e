// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Append-only audit trail of file activity on authorized devices,
//! backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `audit_records`: autoincrement id → serialized AuditRecord
//! - `audit_meta`: key → value (`next_id` counter)
//!
//! Id allocation and insert share one write transaction. redb admits a single
//! writer at a time, so concurrent appends from several monitors are
//! serialized and never interleave.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::models::AuditRecord;

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: id → serialized AuditRecord (JSON bytes).
const AUDIT_RECORDS: TableDefinition<u64, &[u8]> = TableDefinition::new("audit_records");

/// Counters: key → u64.
const AUDIT_META: TableDefinition<&str, u64> = TableDefinition::new("audit_meta");

const NEXT_ID_KEY: &str = "next_id";

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type AuditResult<T> = Result<T, AuditError>;

/// Durable, append-only destination for audit records.
///
/// Implementations must accept concurrent callers and serialize writes.
pub trait AuditSink: Send + Sync {
    fn append(&self, record: &AuditRecord) -> AuditResult<u64>;
}

/// A persisted record with its assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAuditRecord {
    pub id: u64,
    #[serde(flatten)]
    pub record: AuditRecord,
}

// =============================================================================
// RedbAuditSink
// =============================================================================

/// Embedded audit database.
pub struct RedbAuditSink {
    db: Database,
}

impl RedbAuditSink {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> AuditResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(AUDIT_RECORDS)?;
            let _ = write_txn.open_table(AUDIT_META)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Records with id greater than `after_id`, oldest first, at most `limit`.
    pub fn list(&self, after_id: u64, limit: usize) -> AuditResult<Vec<StoredAuditRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_RECORDS)?;

        let mut out = Vec::with_capacity(limit.min(256));
        for entry in table.range(after_id.saturating_add(1)..)? {
            if out.len() >= limit {
                break;
            }
            let (id, bytes) = entry?;
            let record: AuditRecord = serde_json::from_slice(bytes.value())?;
            out.push(StoredAuditRecord {
                id: id.value(),
                record,
            });
        }
        Ok(out)
    }

    /// Number of stored records.
    pub fn count(&self) -> AuditResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_RECORDS)?;
        Ok(table.len()?)
    }
}

impl AuditSink for RedbAuditSink {
    fn append(&self, record: &AuditRecord) -> AuditResult<u64> {
        let json = serde_json::to_vec(record)?;

        let write_txn = self.db.begin_write()?;
        let id = {
            let mut meta = write_txn.open_table(AUDIT_META)?;
            let id = meta.get(NEXT_ID_KEY)?.map(|v| v.value()).unwrap_or(1);
            meta.insert(NEXT_ID_KEY, id + 1)?;

            let mut records = write_txn.open_table(AUDIT_RECORDS)?;
            records.insert(id, json.as_slice())?;
            id
        };
        write_txn.commit()?;

        tracing::debug!(
            id,
            label = %record.device_label,
            fingerprint = %record.fingerprint,
            path = %record.path.display(),
            action = record.action.as_str(),
            "Audit record appended"
        );
        Ok(id)
    }
}
