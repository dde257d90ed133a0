// ABOUTME: Session manager: registry of live sessions and the public create/operate/restore/destroy API.
// ABOUTME: Operations on one session serialize through its actor; different sessions proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use ruleward_core::{Engine, Fact, FactHandle, RuleProgram, SafepointStrategy, SessionOptions, Value};
use ruleward_store::{
    CheckpointWriter, ComponentTag, SnapshotStore, checkpoint, read_header, recover_session,
};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::actor::{self, Command, Outcome, SessionError, SessionHandle};

/// Owns every live session in this process and the snapshot store they share.
pub struct SessionManager {
    store: Arc<dyn SnapshotStore>,
    sessions: RwLock<HashMap<Ulid, SessionHandle>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Create a fresh session with a new id.
    pub async fn create_session(
        &self,
        program: Arc<RuleProgram>,
        options: SessionOptions,
    ) -> Result<Ulid, SessionError> {
        self.create_session_with_id(Ulid::new(), program, options).await
    }

    /// Create a fresh session under a caller-chosen id. Under `Always` the
    /// empty session is checkpointed immediately so it is restorable from
    /// the start. An id with a restorable snapshot in the store is refused;
    /// restore it or destroy it first.
    pub async fn create_session_with_id(
        &self,
        session_id: Ulid,
        program: Arc<RuleProgram>,
        options: SessionOptions,
    ) -> Result<Ulid, SessionError> {
        options.validate()?;

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session_id) {
            return Err(SessionError::SessionExists(session_id));
        }
        if self.store.get(&session_id, ComponentTag::Header)?.is_some() {
            return Err(SessionError::SessionExists(session_id));
        }
        // Headerless leftovers from an interrupted discard must not leak into the new session.
        checkpoint::discard(self.store.as_ref(), &session_id)?;

        let engine = Engine::new(program);
        let mut writer = CheckpointWriter::new(Arc::clone(&self.store), session_id, options);
        if options.safepoint == SafepointStrategy::Always {
            writer.write(&engine, 0)?;
        }

        sessions.insert(session_id, actor::spawn(session_id, engine, writer, 0));
        tracing::info!(
            session_id = %session_id,
            persistence = %options.persistence,
            safepoint = %options.safepoint,
            "created session"
        );

        Ok(session_id)
    }

    async fn handle(&self, session_id: &Ulid) -> Result<SessionHandle, SessionError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or(SessionError::UnknownSession(*session_id))
    }

    async fn send(&self, session_id: &Ulid, cmd: Command) -> Result<Outcome, SessionError> {
        self.handle(session_id).await?.send_command(cmd).await
    }

    /// Insert a fact and return its handle.
    pub async fn insert(&self, session_id: &Ulid, fact: Fact) -> Result<FactHandle, SessionError> {
        match self.send(session_id, Command::Insert { fact }).await? {
            Outcome::Inserted(handle) => Ok(handle),
            other => Err(unexpected(other)),
        }
    }

    /// Replace the contents of an existing fact. Its identity version moves on,
    /// so rules may fire again for it.
    pub async fn update(&self, session_id: &Ulid, handle: FactHandle, fact: Fact) -> Result<(), SessionError> {
        match self.send(session_id, Command::Update { handle, fact }).await? {
            Outcome::Updated => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Retract a fact, returning what it held.
    pub async fn delete(&self, session_id: &Ulid, handle: FactHandle) -> Result<Fact, SessionError> {
        match self.send(session_id, Command::Delete { handle }).await? {
            Outcome::Deleted(fact) => Ok(fact),
            other => Err(unexpected(other)),
        }
    }

    /// Fire every pending activation; returns how many fired.
    pub async fn fire_all_rules(&self, session_id: &Ulid) -> Result<usize, SessionError> {
        match self.send(session_id, Command::FireAllRules).await? {
            Outcome::Fired(count) => Ok(count),
            other => Err(unexpected(other)),
        }
    }

    /// Request a checkpoint. Returns whether anything was written.
    pub async fn safepoint(&self, session_id: &Ulid) -> Result<bool, SessionError> {
        match self.send(session_id, Command::Safepoint).await? {
            Outcome::Checkpointed(wrote) => Ok(wrote),
            other => Err(unexpected(other)),
        }
    }

    /// Empty a named global. Returns whether it held anything.
    pub async fn clear_global(&self, session_id: &Ulid, name: &str) -> Result<bool, SessionError> {
        let cmd = Command::ClearGlobal {
            name: name.to_string(),
        };
        match self.send(session_id, cmd).await? {
            Outcome::Cleared(cleared) => Ok(cleared),
            other => Err(unexpected(other)),
        }
    }

    /// Rebuild a session from its last complete snapshot and make it live.
    /// A live instance under the same id is replaced.
    pub async fn restore_session(
        &self,
        session_id: Ulid,
        program: Arc<RuleProgram>,
        options: SessionOptions,
    ) -> Result<Ulid, SessionError> {
        options.validate()?;

        let recovered = recover_session(self.store.as_ref(), &session_id, program, options.persistence)?;
        let state_version = recovered.header.state_version;
        let writer = CheckpointWriter::resumed(Arc::clone(&self.store), session_id, options, state_version);
        let handle = actor::spawn(session_id, recovered.engine, writer, state_version);

        let replaced = self.sessions.write().await.insert(session_id, handle);
        if replaced.is_some() {
            tracing::info!(session_id = %session_id, "replaced live session with restored instance");
        }

        Ok(session_id)
    }

    /// Restore every session found in the store using the strategies each
    /// was last checkpointed with. Sessions that fail to recover are logged
    /// and skipped.
    pub async fn recover_all(&self, program: Arc<RuleProgram>) -> Result<Vec<Ulid>, SessionError> {
        let mut recovered = Vec::new();

        for session_id in self.store.sessions()? {
            let header = match read_header(self.store.as_ref(), &session_id) {
                Ok(Some(header)) => header,
                Ok(None) => {
                    tracing::warn!("skipping session {} with no snapshot header", session_id);
                    continue;
                }
                Err(e) => {
                    tracing::error!("failed to read header for session {}: {}", session_id, e);
                    continue;
                }
            };

            match self
                .restore_session(session_id, Arc::clone(&program), header.options())
                .await
            {
                Ok(id) => recovered.push(id),
                Err(e) => tracing::error!("failed to recover session {}: {}", session_id, e),
            }
        }

        Ok(recovered)
    }

    /// Drop a session from the registry and delete its persisted snapshot.
    pub async fn destroy_session(&self, session_id: &Ulid) -> Result<(), SessionError> {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            // The discard runs behind any command already queued on the actor.
            Some(handle) => {
                handle.send_command(Command::Discard).await?;
            }
            None => checkpoint::discard(self.store.as_ref(), session_id)?,
        }
        tracing::info!(session_id = %session_id, "destroyed session");
        Ok(())
    }

    /// Simulate losing this process: every live session is dropped without
    /// a final checkpoint. Stored snapshots are untouched.
    pub async fn failover(&self) {
        let lost = std::mem::take(&mut *self.sessions.write().await);
        tracing::info!(sessions = lost.len(), "failover: discarding all live sessions");
    }

    pub async fn is_live(&self, session_id: &Ulid) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn live_sessions(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.sessions.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Session ids with at least one component in the store.
    pub fn stored_sessions(&self) -> Result<Vec<Ulid>, SessionError> {
        Ok(self.store.sessions()?)
    }

    pub async fn options(&self, session_id: &Ulid) -> Result<SessionOptions, SessionError> {
        Ok(self.handle(session_id).await?.options)
    }

    /// All live facts in handle order.
    pub async fn facts(&self, session_id: &Ulid) -> Result<Vec<(FactHandle, Fact)>, SessionError> {
        let handle = self.handle(session_id).await?;
        let engine = handle.read_engine().await;
        Ok(engine.facts().map(|(h, f)| (h, f.clone())).collect())
    }

    pub async fn fact(&self, session_id: &Ulid, fact_handle: FactHandle) -> Result<Option<Fact>, SessionError> {
        let handle = self.handle(session_id).await?;
        let engine = handle.read_engine().await;
        Ok(engine.fact(fact_handle).cloned())
    }

    /// Look up the handle of a live fact equal to `fact`.
    pub async fn find_handle(&self, session_id: &Ulid, fact: &Fact) -> Result<Option<FactHandle>, SessionError> {
        let handle = self.handle(session_id).await?;
        let engine = handle.read_engine().await;
        Ok(engine.find_handle(fact))
    }

    /// Contents of a named global, empty if never written.
    pub async fn global(&self, session_id: &Ulid, name: &str) -> Result<Vec<Value>, SessionError> {
        let handle = self.handle(session_id).await?;
        let engine = handle.read_engine().await;
        Ok(engine.global(name).to_vec())
    }

    /// Activations matched but not yet fired.
    pub async fn pending_activations(&self, session_id: &Ulid) -> Result<usize, SessionError> {
        let handle = self.handle(session_id).await?;
        let engine = handle.read_engine().await;
        Ok(engine.pending_count())
    }
}

fn unexpected(outcome: Outcome) -> SessionError {
    tracing::error!("session actor replied with unexpected outcome: {:?}", outcome);
    SessionError::ChannelClosed
}
