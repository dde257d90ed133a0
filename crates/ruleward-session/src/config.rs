// ABOUTME: Configuration loading for ruleward: store backend, data directory, and default session strategies.
// ABOUTME: Reads RULEWARD_* environment variables and opens the configured snapshot store.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use ruleward_core::{ConfigurationError, PersistenceStrategy, SafepointStrategy, SessionOptions};
use ruleward_store::{FileStore, MemoryStore, SnapshotStore, SqliteStore, StoreError};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("RULEWARD_STORE must be one of memory, file, sqlite; got {0}")]
    InvalidStore(String),

    #[error(transparent)]
    Strategy(#[from] ConfigurationError),

    #[error("failed to open snapshot store: {0}")]
    Store(#[from] StoreError),
}

/// Which snapshot store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    File,
    Sqlite,
}

impl FromStr for StoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(StoreKind::Memory),
            "file" => Ok(StoreKind::File),
            "sqlite" => Ok(StoreKind::Sqlite),
            other => Err(ConfigError::InvalidStore(other.to_string())),
        }
    }
}

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ReliabilityConfig {
    pub home: PathBuf,
    pub store: StoreKind,
    pub options: SessionOptions,
}

impl ReliabilityConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - RULEWARD_HOME: data directory (default: ~/.ruleward)
    /// - RULEWARD_STORE: memory, file or sqlite (default: sqlite)
    /// - RULEWARD_PERSISTENCE: stores_only or full (default: stores_only)
    /// - RULEWARD_SAFEPOINT: explicit or always (default: always)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let home = var("RULEWARD_HOME").map(PathBuf::from).unwrap_or_else(|| {
            var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".ruleward")
        });

        let store = match var("RULEWARD_STORE") {
            Some(v) => v.parse()?,
            None => StoreKind::Sqlite,
        };

        let persistence = match var("RULEWARD_PERSISTENCE") {
            Some(v) => v.parse::<PersistenceStrategy>()?,
            None => PersistenceStrategy::StoresOnly,
        };
        let safepoint = match var("RULEWARD_SAFEPOINT") {
            Some(v) => v.parse::<SafepointStrategy>()?,
            None => SafepointStrategy::Always,
        };

        let options = SessionOptions::new(persistence, safepoint);
        options.validate()?;

        Ok(Self {
            home,
            store,
            options,
        })
    }

    /// Open the configured store. File and SQLite stores live under `home`.
    pub fn open_store(&self) -> Result<Arc<dyn SnapshotStore>, ConfigError> {
        let store: Arc<dyn SnapshotStore> = match self.store {
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::File => Arc::new(FileStore::open(self.home.clone())?),
            StoreKind::Sqlite => {
                std::fs::create_dir_all(&self.home).map_err(StoreError::Io)?;
                Arc::new(SqliteStore::open(&self.home.join("snapshots.db"))?)
            }
        };
        tracing::debug!(home = %self.home.display(), store = ?self.store, "opened snapshot store");
        Ok(store)
    }
}
