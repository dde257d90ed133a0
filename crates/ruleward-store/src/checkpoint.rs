// ABOUTME: Checkpoint writer: decides when a session is persisted and what each checkpoint contains.
// ABOUTME: Always writes the complete current state (never a delta), header last.

use std::sync::Arc;

use ruleward_core::{Engine, PersistenceStrategy, SafepointStrategy, SessionOptions};
use thiserror::Error;
use ulid::Ulid;

use crate::snapshot::encode;
use crate::store::{ComponentTag, SnapshotStore, StoreError};

/// Errors that can occur while writing a checkpoint. The in-memory state is
/// left as it was; only durability is in question.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Writes checkpoints for one session according to its strategies.
pub struct CheckpointWriter {
    store: Arc<dyn SnapshotStore>,
    session_id: Ulid,
    options: SessionOptions,
    durable_version: Option<u64>,
}

impl CheckpointWriter {
    pub fn new(store: Arc<dyn SnapshotStore>, session_id: Ulid, options: SessionOptions) -> Self {
        Self {
            store,
            session_id,
            options,
            durable_version: None,
        }
    }

    /// A writer for a session whose state at `state_version` is already in the store.
    pub fn resumed(
        store: Arc<dyn SnapshotStore>,
        session_id: Ulid,
        options: SessionOptions,
        state_version: u64,
    ) -> Self {
        Self {
            durable_version: Some(state_version),
            ..Self::new(store, session_id, options)
        }
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    /// Last state version known to be fully written.
    pub fn durable_version(&self) -> Option<u64> {
        self.durable_version
    }

    /// Called after every mutating operation. Persists synchronously under
    /// `Always`; does nothing under `Explicit`. Returns whether it wrote.
    pub fn after_mutation(&mut self, engine: &Engine, state_version: u64) -> Result<bool, CheckpointError> {
        match self.options.safepoint {
            SafepointStrategy::Always => self.write(engine, state_version).map(|()| true),
            SafepointStrategy::Explicit => Ok(false),
        }
    }

    /// An explicit safepoint request. Under `Always` the state is already
    /// durable, so this only writes if the last automatic write failed.
    pub fn safepoint(&mut self, engine: &Engine, state_version: u64) -> Result<bool, CheckpointError> {
        match self.options.safepoint {
            SafepointStrategy::Explicit => self.write(engine, state_version).map(|()| true),
            SafepointStrategy::Always if self.durable_version == Some(state_version) => Ok(false),
            SafepointStrategy::Always => {
                tracing::info!(session_id = %self.session_id, "retrying checkpoint after earlier failure");
                self.write(engine, state_version).map(|()| true)
            }
        }
    }

    /// Serialize and write every component, header last.
    pub fn write(&mut self, engine: &Engine, state_version: u64) -> Result<(), CheckpointError> {
        let components = encode(self.session_id, engine, self.options, state_version)?;

        let mut bytes_written = 0;
        for (tag, bytes) in &components {
            if *tag == ComponentTag::Header && self.options.persistence == PersistenceStrategy::StoresOnly {
                // A network component left by an earlier FULL checkpoint would be stale.
                self.store.delete(&self.session_id, ComponentTag::Network)?;
            }
            self.store.put(&self.session_id, *tag, bytes)?;
            bytes_written += bytes.len();
        }

        self.durable_version = Some(state_version);
        tracing::debug!(
            session_id = %self.session_id,
            state_version,
            persistence = %self.options.persistence,
            bytes_written,
            "checkpoint written"
        );

        Ok(())
    }

    /// Remove every component of this session from the store. The header goes
    /// first so a partial discard never leaves a restorable snapshot behind.
    pub fn discard(&mut self) -> Result<(), StoreError> {
        discard(self.store.as_ref(), &self.session_id)?;
        self.durable_version = None;
        Ok(())
    }
}

/// Delete all components for a session, header first.
pub fn discard(store: &dyn SnapshotStore, session_id: &Ulid) -> Result<(), StoreError> {
    for tag in ComponentTag::ALL {
        store.delete(session_id, tag)?;
    }
    Ok(())
}
