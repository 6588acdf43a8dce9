use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use chrono::Utc;
use tgconsole_process::{JobKind, JobRecord, OwnerId};

#[derive(Debug, thiserror::Error)]
#[error("{} already has a tracked {} job (pid {})", .existing.owner_id, .existing.kind, .existing.pid)]
pub struct AlreadyRegistered {
    pub existing: JobRecord,
}

#[derive(Debug)]
pub enum ClaimError<E> {
    Occupied(JobRecord),
    Spawn(E),
}

/// In-memory map of owner -> running job for one worker kind.
///
/// All operations are synchronous; the lock is never held across an await.
#[derive(Debug)]
pub struct ProcessRegistry {
    kind: JobKind,
    records: Mutex<HashMap<OwnerId, JobRecord>>,
}

impl ProcessRegistry {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    fn map(&self) -> MutexGuard<'_, HashMap<OwnerId, JobRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert_locked(
        &self,
        map: &mut HashMap<OwnerId, JobRecord>,
        owner: &OwnerId,
        pid: u32,
    ) -> JobRecord {
        let record = JobRecord {
            owner_id: owner.clone(),
            kind: self.kind,
            pid,
            started_at: Utc::now(),
        };
        map.insert(owner.clone(), record.clone());
        tracing::info!(
            kind = %self.kind,
            owner = %owner,
            pid,
            total = map.len(),
            "registered job"
        );
        record
    }

    /// Tracks `pid` for `owner`. Never overwrites: an existing record is an error.
    pub fn register(&self, owner: &OwnerId, pid: u32) -> Result<JobRecord, AlreadyRegistered> {
        let mut map = self.map();
        if let Some(existing) = map.get(owner) {
            tracing::warn!(
                kind = %self.kind,
                owner = %owner,
                existing_pid = existing.pid,
                pid,
                "refusing to replace tracked job"
            );
            return Err(AlreadyRegistered {
                existing: existing.clone(),
            });
        }
        Ok(self.insert_locked(&mut map, owner, pid))
    }

    /// Lookup, spawn and register as one critical section.
    ///
    /// `spawn` runs with the lock held and must not block for long; it returns
    /// the new pid plus whatever handle the caller wants back.
    pub fn claim<T, E>(
        &self,
        owner: &OwnerId,
        spawn: impl FnOnce() -> Result<(u32, T), E>,
    ) -> Result<(JobRecord, T), ClaimError<E>> {
        let mut map = self.map();
        if let Some(existing) = map.get(owner) {
            return Err(ClaimError::Occupied(existing.clone()));
        }
        let (pid, handle) = spawn().map_err(ClaimError::Spawn)?;
        let record = self.insert_locked(&mut map, owner, pid);
        Ok((record, handle))
    }

    pub fn unregister(&self, owner: &OwnerId) -> bool {
        let mut map = self.map();
        let removed = map.remove(owner);
        if let Some(r) = &removed {
            tracing::info!(
                kind = %self.kind,
                owner = %owner,
                pid = r.pid,
                remaining = map.len(),
                "unregistered job"
            );
        }
        removed.is_some()
    }

    /// Removes the owner's record only while it still tracks `pid`.
    pub fn unregister_pid(&self, owner: &OwnerId, pid: u32) -> bool {
        let mut map = self.map();
        if map.get(owner).is_some_and(|r| r.pid == pid) {
            map.remove(owner);
            tracing::info!(
                kind = %self.kind,
                owner = %owner,
                pid,
                remaining = map.len(),
                "unregistered job"
            );
            return true;
        }
        false
    }

    pub fn lookup(&self, owner: &OwnerId) -> Option<JobRecord> {
        self.map().get(owner).cloned()
    }

    /// Point-in-time snapshot; diagnostics only.
    pub fn list_all(&self) -> Vec<JobRecord> {
        self.map().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}
