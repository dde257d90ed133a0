// ABOUTME: Persistence layer for ruleward, handling snapshot storage and session reconstruction.
// ABOUTME: Provides memory, file and SQLite stores, the checkpoint writer, and the recovery loader.

pub mod checkpoint;
pub mod file;
pub mod memory;
pub mod recovery;
pub mod snapshot;
pub mod sqlite;
pub mod store;

pub use checkpoint::{CheckpointError, CheckpointWriter};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use recovery::{RecoveredSession, RecoveryError, read_header, recover_session};
pub use snapshot::{FORMAT_VERSION, SnapshotHeader};
pub use sqlite::SqliteStore;
pub use store::{ComponentTag, SnapshotStore, StoreError};
