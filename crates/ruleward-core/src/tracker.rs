// ABOUTME: Identity & marker tracker: allocates stable fact handles and records fired activations.
// ABOUTME: Fact identity is (handle, version); the fired-marker set only ever grows.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::fact::FactHandle;

/// Identity token for a fact at a point in its life. `update` bumps the
/// version, so the same handle can take part in a fresh tuple afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FactRef {
    pub handle: FactHandle,
    pub version: u64,
}

/// Identity of an activation: the rule plus the exact fact tuple it matched.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActivationKey {
    pub rule: String,
    pub tuple: Vec<FactRef>,
}

impl ActivationKey {
    pub fn involves(&self, handle: FactHandle) -> bool {
        self.tuple.iter().any(|r| r.handle == handle)
    }
}

impl fmt::Display for ActivationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.rule)?;
        for (i, r) in self.tuple.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}v{}", r.handle, r.version)?;
        }
        write!(f, ")")
    }
}

/// Tracks which handles are live, their current versions, and the set of
/// activations that have already fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracker {
    next_handle: u64,
    versions: BTreeMap<FactHandle, u64>,
    fired: BTreeSet<ActivationKey>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self {
            next_handle: 1,
            versions: BTreeMap::new(),
            fired: BTreeSet::new(),
        }
    }
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a tracker from persisted parts. Every live handle must have
    /// been allocated before `next_handle`.
    pub fn restore(
        next_handle: u64,
        versions: BTreeMap<FactHandle, u64>,
        fired: BTreeSet<ActivationKey>,
    ) -> Result<Self, EngineError> {
        if let Some((handle, _)) = versions.iter().find(|(h, _)| h.0 == 0 || h.0 >= next_handle) {
            return Err(EngineError::Inconsistent(format!(
                "handle {handle} is outside the allocated range (next handle {next_handle})"
            )));
        }
        Ok(Self {
            next_handle,
            versions,
            fired,
        })
    }

    /// Hand out a fresh handle at version 0.
    pub fn allocate(&mut self) -> FactRef {
        let handle = FactHandle(self.next_handle);
        self.next_handle += 1;
        self.versions.insert(handle, 0);
        FactRef { handle, version: 0 }
    }

    /// Advance the version of a live handle.
    pub fn bump(&mut self, handle: FactHandle) -> Option<FactRef> {
        let version = self.versions.get_mut(&handle)?;
        *version += 1;
        Some(FactRef {
            handle,
            version: *version,
        })
    }

    /// Forget a handle. It is never reissued.
    pub fn retire(&mut self, handle: FactHandle) -> bool {
        self.versions.remove(&handle).is_some()
    }

    pub fn identity(&self, handle: FactHandle) -> Option<FactRef> {
        self.versions
            .get(&handle)
            .map(|&version| FactRef { handle, version })
    }

    pub fn is_live(&self, handle: FactHandle) -> bool {
        self.versions.contains_key(&handle)
    }

    /// True when every reference in the key still names the live version.
    pub fn is_current(&self, key: &ActivationKey) -> bool {
        key.tuple
            .iter()
            .all(|r| self.versions.get(&r.handle) == Some(&r.version))
    }

    /// Record a marker. Returns false if it was already present.
    pub fn record_fired(&mut self, key: ActivationKey) -> bool {
        self.fired.insert(key)
    }

    pub fn has_fired(&self, key: &ActivationKey) -> bool {
        self.fired.contains(key)
    }

    pub fn fired(&self) -> &BTreeSet<ActivationKey> {
        &self.fired
    }

    pub fn versions(&self) -> &BTreeMap<FactHandle, u64> {
        &self.versions
    }

    pub fn next_handle(&self) -> u64 {
        self.next_handle
    }
}
