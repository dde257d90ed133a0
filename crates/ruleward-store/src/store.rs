// ABOUTME: The SnapshotStore trait: durable bytes keyed by (session id, component tag).
// ABOUTME: Backends only need atomic per-key put/get/delete; everything else is layered on top.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use ulid::Ulid;

/// Errors that a snapshot store backend can raise.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unknown component tag: {0}")]
    UnknownTag(String),
}

/// The parts a session snapshot is split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentTag {
    Header,
    Facts,
    Markers,
    Globals,
    Network,
}

impl ComponentTag {
    pub const ALL: [ComponentTag; 5] = [
        ComponentTag::Header,
        ComponentTag::Facts,
        ComponentTag::Markers,
        ComponentTag::Globals,
        ComponentTag::Network,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentTag::Header => "header",
            ComponentTag::Facts => "facts",
            ComponentTag::Markers => "markers",
            ComponentTag::Globals => "globals",
            ComponentTag::Network => "network",
        }
    }
}

impl fmt::Display for ComponentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentTag {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| StoreError::UnknownTag(s.to_string()))
    }
}

/// Durable keyed byte storage shared by every session. Implementations must
/// make each individual put/get/delete atomic.
pub trait SnapshotStore: Send + Sync {
    fn put(&self, session_id: &Ulid, tag: ComponentTag, bytes: &[u8]) -> Result<(), StoreError>;

    fn get(&self, session_id: &Ulid, tag: ComponentTag) -> Result<Option<Vec<u8>>, StoreError>;

    /// Deleting an absent key is not an error.
    fn delete(&self, session_id: &Ulid, tag: ComponentTag) -> Result<(), StoreError>;

    /// Sessions that currently have a header stored.
    fn sessions(&self) -> Result<Vec<Ulid>, StoreError>;
}
