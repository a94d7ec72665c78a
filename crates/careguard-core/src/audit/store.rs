//! Append-only storage backends for audit entries and access records.
//!
//! # Key design
//!
//! Entries use a 16-byte composite key:
//! ```text
//! [ timestamp_ms: u64 big-endian (8 bytes) | sequence: u64 big-endian (8 bytes) ]
//! ```
//!
//! The recorder never lets the timestamp run backwards, so byte order equals
//! append order equals time order. A scan resumes strictly after the last key
//! it returned.
//!
//! Access records sit in a separate table keyed by
//! `[ timestamp_ms | first 8 bytes of access_id ]`.

use super::access::AccessRecord;
use super::entry::AuditEntry;
use crate::error::{GuardError, Result};
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

pub type AuditKey = [u8; 16];

type Table = TableDefinition<'static, &'static [u8], &'static [u8]>;

/// Key: 16-byte composite (timestamp_ms big-endian ++ sequence big-endian)
/// Value: JSON-encoded AuditEntry
const AUDIT: Table = TableDefinition::new("audit");

/// Key: 16-byte composite (timestamp_ms big-endian ++ access id prefix)
/// Value: JSON-encoded AccessRecord
const ACCESS: Table = TableDefinition::new("access");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

pub fn audit_key(ts_ms: u64, seq: u64) -> AuditKey {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&ts_ms.to_be_bytes());
    key[8..].copy_from_slice(&seq.to_be_bytes());
    key
}

pub fn access_key(ts_ms: u64, access_id: Uuid) -> AuditKey {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&ts_ms.to_be_bytes());
    key[8..].copy_from_slice(&access_id.as_bytes()[..8]);
    key
}

pub fn split_key(key: &AuditKey) -> (u64, u64) {
    let mut ts = [0u8; 8];
    let mut seq = [0u8; 8];
    ts.copy_from_slice(&key[..8]);
    seq.copy_from_slice(&key[8..]);
    (u64::from_be_bytes(ts), u64::from_be_bytes(seq))
}

/// Smallest key strictly greater than `key`, or `None` at the end of the space.
fn successor(key: &AuditKey) -> Option<AuditKey> {
    u128::from_be_bytes(*key)
        .checked_add(1)
        .map(u128::to_be_bytes)
}

/// First key a scan resuming after `after` may return.
fn scan_start(after: Option<AuditKey>) -> Option<AuditKey> {
    match after {
        Some(k) => successor(&k),
        None => Some([0u8; 16]),
    }
}

fn to_key(bytes: &[u8]) -> Result<AuditKey> {
    bytes
        .try_into()
        .map_err(|_| GuardError::Storage(format!("malformed audit key ({} bytes)", bytes.len())))
}

fn duplicate(key: &AuditKey) -> GuardError {
    GuardError::Storage(format!("audit key {:?} already written", split_key(key)))
}

// ---------------------------------------------------------------------------
// AuditStore
// ---------------------------------------------------------------------------

/// Append-only log contract. There is no update or delete.
pub trait AuditStore: Send + Sync {
    /// Persist `entry` under `key`. Fails if `key` already exists.
    fn append(&self, key: AuditKey, entry: &AuditEntry) -> Result<()>;
    /// Up to `limit` entries with keys strictly after `after`, in key order.
    fn scan(&self, after: Option<AuditKey>, limit: usize) -> Result<Vec<(AuditKey, AuditEntry)>>;
    fn last_key(&self) -> Result<Option<AuditKey>>;
    /// Persist an access record. Same rules as `append`, separate keyspace.
    fn append_access(&self, key: AuditKey, record: &AccessRecord) -> Result<()>;
    fn scan_access(
        &self,
        after: Option<AuditKey>,
        limit: usize,
    ) -> Result<Vec<(AuditKey, AccessRecord)>>;
}

// ---------------------------------------------------------------------------
// RedbAuditStore
// ---------------------------------------------------------------------------

pub struct RedbAuditStore {
    db: Database,
}

fn db_err(e: impl std::fmt::Display) -> GuardError {
    GuardError::Storage(e.to_string())
}

impl RedbAuditStore {
    /// Open or create the redb database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(AUDIT).map_err(db_err)?;
        wt.open_table(ACCESS).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    fn insert<T: Serialize>(
        &self,
        table: Table,
        key: AuditKey,
        value: &T,
    ) -> Result<()> {
        let value = serde_json::to_vec(value)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(table).map_err(db_err)?;
            if table.get(key.as_slice()).map_err(db_err)?.is_some() {
                return Err(duplicate(&key));
            }
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn range<T: DeserializeOwned>(
        &self,
        table: Table,
        after: Option<AuditKey>,
        limit: usize,
    ) -> Result<Vec<(AuditKey, T)>> {
        let Some(start) = scan_start(after) else {
            return Ok(Vec::new());
        };
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(table).map_err(db_err)?;

        let mut out = Vec::new();
        for row in table.range(start.as_slice()..).map_err(db_err)? {
            if out.len() >= limit {
                break;
            }
            let (k, v) = row.map_err(db_err)?;
            let value: T = serde_json::from_slice(v.value())?;
            out.push((to_key(k.value())?, value));
        }
        Ok(out)
    }
}

impl AuditStore for RedbAuditStore {
    fn append(&self, key: AuditKey, entry: &AuditEntry) -> Result<()> {
        self.insert(AUDIT, key, entry)
    }

    fn scan(&self, after: Option<AuditKey>, limit: usize) -> Result<Vec<(AuditKey, AuditEntry)>> {
        self.range(AUDIT, after, limit)
    }

    fn last_key(&self) -> Result<Option<AuditKey>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(AUDIT).map_err(db_err)?;
        let last = match table.last().map_err(db_err)? {
            Some((k, _)) => Ok(Some(to_key(k.value())?)),
            None => Ok(None),
        };
        last
    }

    fn append_access(&self, key: AuditKey, record: &AccessRecord) -> Result<()> {
        self.insert(ACCESS, key, record)
    }

    fn scan_access(
        &self,
        after: Option<AuditKey>,
        limit: usize,
    ) -> Result<Vec<(AuditKey, AccessRecord)>> {
        self.range(ACCESS, after, limit)
    }
}

// ---------------------------------------------------------------------------
// MemoryAuditStore
// ---------------------------------------------------------------------------

/// Volatile store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    entries: Mutex<BTreeMap<AuditKey, AuditEntry>>,
    access: Mutex<BTreeMap<AuditKey, AccessRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(m: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>> {
    m.lock()
        .map_err(|_| GuardError::Storage("memory audit store poisoned".into()))
}

fn insert_unique<T: Clone>(
    map: &Mutex<BTreeMap<AuditKey, T>>,
    key: AuditKey,
    value: &T,
) -> Result<()> {
    let mut map = lock(map)?;
    if map.contains_key(&key) {
        return Err(duplicate(&key));
    }
    map.insert(key, value.clone());
    Ok(())
}

fn range_after<T: Clone>(
    map: &Mutex<BTreeMap<AuditKey, T>>,
    after: Option<AuditKey>,
    limit: usize,
) -> Result<Vec<(AuditKey, T)>> {
    let map = lock(map)?;
    let Some(start) = scan_start(after) else {
        return Ok(Vec::new());
    };
    Ok(map
        .range(start..)
        .take(limit)
        .map(|(k, v)| (*k, v.clone()))
        .collect())
}

impl AuditStore for MemoryAuditStore {
    fn append(&self, key: AuditKey, entry: &AuditEntry) -> Result<()> {
        insert_unique(&self.entries, key, entry)
    }

    fn scan(&self, after: Option<AuditKey>, limit: usize) -> Result<Vec<(AuditKey, AuditEntry)>> {
        range_after(&self.entries, after, limit)
    }

    fn last_key(&self) -> Result<Option<AuditKey>> {
        Ok(lock(&self.entries)?.keys().next_back().copied())
    }

    fn append_access(&self, key: AuditKey, record: &AccessRecord) -> Result<()> {
        insert_unique(&self.access, key, record)
    }

    fn scan_access(
        &self,
        after: Option<AuditKey>,
        limit: usize,
    ) -> Result<Vec<(AuditKey, AccessRecord)>> {
        range_after(&self.access, after, limit)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
