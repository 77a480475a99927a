//! Versioned snapshot storage shared by every process serving sessions.
//!
//! Writers never lock. Each write names the version it expects to find and
//! fails with [`StoreError::VersionConflict`] when another writer got there
//! first.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::common::SessionId;
use crate::error::StoreError;
use crate::rules::GameSummary;

/// A snapshot as kept by the store: opaque bytes plus their version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    pub version: u64,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Write `snapshot` at `version` if the stored version equals
    /// `expected`. `None` means no record may exist yet.
    async fn replace(
        &self,
        id: &SessionId,
        snapshot: Vec<u8>,
        expected: Option<u64>,
        version: u64,
    ) -> Result<(), StoreError>;

    /// Write the snapshot that directly follows the stored one.
    async fn save(&self, id: &SessionId, snapshot: Vec<u8>, version: u64) -> Result<(), StoreError> {
        self.replace(id, snapshot, version.checked_sub(1), version)
            .await
    }

    async fn load(&self, id: &SessionId) -> Result<StoredSnapshot, StoreError>;

    /// Reclaim the record after `ttl` unless [`SessionStore::cancel_expiry`]
    /// is called first.
    async fn expire(&self, id: &SessionId, ttl: Duration) -> Result<(), StoreError>;

    async fn cancel_expiry(&self, id: &SessionId) -> Result<(), StoreError>;

    /// Keep `summary` for a finished session.
    async fn archive(&self, id: &SessionId, summary: GameSummary) -> Result<(), StoreError>;

    async fn summary(&self, id: &SessionId) -> Result<GameSummary, StoreError>;
}

#[derive(Debug)]
struct Record {
    snapshot: StoredSnapshot,
    expires_at: Option<Instant>,
}

impl Record {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process store. Each session id is its own map shard entry, so writes
/// to different sessions never wait on each other. Expired records are
/// dropped lazily on access or by [`MemorySessionStore::reap`].
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    records: DashMap<SessionId, Record>,
    summaries: DashMap<SessionId, GameSummary>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired record and return how many were removed.
    pub fn reap(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.expired(now));
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn replace(
        &self,
        id: &SessionId,
        snapshot: Vec<u8>,
        expected: Option<u64>,
        version: u64,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        match self.records.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                let found = if entry.get().expired(now) {
                    None
                } else {
                    Some(entry.get().snapshot.version)
                };
                if found != expected {
                    return Err(StoreError::VersionConflict { expected, found });
                }
                let record = entry.get_mut();
                record.snapshot = StoredSnapshot {
                    version,
                    bytes: snapshot,
                };
                record.expires_at = None;
            }
            Entry::Vacant(entry) => {
                if expected.is_some() {
                    return Err(StoreError::VersionConflict {
                        expected,
                        found: None,
                    });
                }
                entry.insert(Record {
                    snapshot: StoredSnapshot {
                        version,
                        bytes: snapshot,
                    },
                    expires_at: None,
                });
            }
        }
        Ok(())
    }

    async fn load(&self, id: &SessionId) -> Result<StoredSnapshot, StoreError> {
        let now = Instant::now();
        if self
            .records
            .remove_if(id, |_, record| record.expired(now))
            .is_some()
        {
            log::debug!("reaped expired session {}", id);
        }
        self.records
            .get(id)
            .map(|record| record.snapshot.clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn expire(&self, id: &SessionId, ttl: Duration) -> Result<(), StoreError> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.expires_at = Some(Instant::now() + ttl);
        Ok(())
    }

    async fn cancel_expiry(&self, id: &SessionId) -> Result<(), StoreError> {
        if let Some(mut record) = self.records.get_mut(id) {
            if !record.expired(Instant::now()) {
                record.expires_at = None;
            }
        }
        Ok(())
    }

    async fn archive(&self, id: &SessionId, summary: GameSummary) -> Result<(), StoreError> {
        self.summaries.insert(id.clone(), summary);
        Ok(())
    }

    async fn summary(&self, id: &SessionId) -> Result<GameSummary, StoreError> {
        self.summaries
            .get(id)
            .map(|s| s.clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}
