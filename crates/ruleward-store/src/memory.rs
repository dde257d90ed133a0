// ABOUTME: In-process snapshot store that outlives sessions, for tests and single-process failover drills.
// ABOUTME: Can be switched offline to simulate an unavailable backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use ulid::Ulid;

use crate::store::{ComponentTag, SnapshotStore, StoreError};

type Key = (Ulid, ComponentTag);

/// A snapshot store held entirely in memory.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<Key, Vec<u8>>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the store offline (every call fails) or bring it back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored components across all sessions.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> Result<MutexGuard<'_, BTreeMap<Key, Vec<u8>>>, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl SnapshotStore for MemoryStore {
    fn put(&self, session_id: &Ulid, tag: ComponentTag, bytes: &[u8]) -> Result<(), StoreError> {
        self.entries()?.insert((*session_id, tag), bytes.to_vec());
        Ok(())
    }

    fn get(&self, session_id: &Ulid, tag: ComponentTag) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries()?.get(&(*session_id, tag)).cloned())
    }

    fn delete(&self, session_id: &Ulid, tag: ComponentTag) -> Result<(), StoreError> {
        self.entries()?.remove(&(*session_id, tag));
        Ok(())
    }

    fn sessions(&self) -> Result<Vec<Ulid>, StoreError> {
        Ok(self
            .entries()?
            .keys()
            .filter(|(_, tag)| *tag == ComponentTag::Header)
            .map(|(id, _)| *id)
            .collect())
    }
}
