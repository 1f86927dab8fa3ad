//! In-memory session table.
//!
//! Every read and mutation goes through one mutex over the map, so a
//! version check and the mutation it guards can never interleave with
//! another caller. The sequence counter lives outside the lock.

use crate::record::{SessionId, SessionRecord};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;
use web_time::SystemTime;

/// The local session table of one instance.
pub struct SessionStore {
    /// Address of this instance, stamped into every new session id
    local_ip: IpAddr,
    /// Next sequence number for `new_session`
    next_seq: AtomicU64,
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
}

impl SessionStore {
    pub fn new(local_ip: IpAddr) -> Self {
        Self {
            local_ip,
            next_seq: AtomicU64::new(0),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, SessionRecord>> {
        // The map holds no invariants a panicking holder could break halfway
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a version-1 session owned by this instance. Not stored yet.
    pub fn new_session(&self, message: impl Into<String>) -> SessionRecord {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        SessionRecord::new(SessionId::new(seq, self.local_ip), 1, message)
    }

    /// Store a record expiring `ttl` from now, replacing any entry with the same id.
    pub fn add_session(&self, mut record: SessionRecord, ttl: Duration) {
        record.set_expires_at(SystemTime::now() + ttl);
        debug!(
            "Storing session {} v{} (ttl {:?})",
            record.id(),
            record.version(),
            ttl
        );
        self.sessions().insert(record.id(), record);
    }

    /// Look up a session. A supplied version that differs from the stored
    /// one makes the session look absent.
    pub fn get_session(&self, id: &SessionId, version: Option<u32>) -> Option<SessionRecord> {
        let sessions = self.sessions();
        let record = sessions.get(id)?;
        if version.is_some_and(|v| v != record.version()) {
            debug!(
                "Version mismatch reading {}: want {:?}, have {}",
                id,
                version,
                record.version()
            );
            return None;
        }
        Some(record.clone())
    }

    /// Take a session out of the table. With a version, the record is only
    /// taken when it matches; otherwise it stays in place untouched.
    pub fn remove_session(&self, id: &SessionId, version: Option<u32>) -> Option<SessionRecord> {
        let mut sessions = self.sessions();
        let stored = sessions.get(id)?.version();
        if version.is_some_and(|v| v != stored) {
            debug!(
                "Version mismatch removing {}: want {:?}, have {}",
                id, version, stored
            );
            return None;
        }
        sessions.remove(id)
    }

    /// Snapshot of the ids currently stored.
    pub fn list_ids(&self) -> Vec<SessionId> {
        self.sessions().keys().copied().collect()
    }

    /// Evict every record whose expiry is before `now`, regardless of version.
    ///
    /// Walks an id snapshot and takes the lock per record, so request paths
    /// are never blocked for a whole sweep. Returns the number evicted.
    pub fn sweep_expired(&self, now: SystemTime) -> usize {
        let mut evicted = 0;
        for id in self.list_ids() {
            let mut sessions = self.sessions();
            if sessions.get(&id).is_some_and(|r| r.is_expired(now)) {
                sessions.remove(&id);
                evicted += 1;
            }
        }
        evicted
    }

    /// `sweep_expired` against the current wall clock.
    pub fn sweep(&self) -> usize {
        self.sweep_expired(SystemTime::now())
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }
}
