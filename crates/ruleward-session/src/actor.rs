// ABOUTME: Async actor owning one session's engine; processes commands strictly one at a time.
// ABOUTME: Every mutation is applied in memory first, then handed to the checkpoint writer before replying.

use std::sync::Arc;

use ruleward_core::{ConfigurationError, Engine, EngineError, Fact, FactHandle, SessionOptions};
use ruleward_store::{CheckpointError, CheckpointWriter, RecoveryError, StoreError};
use thiserror::Error;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("unknown fact handle {handle} in session {session_id}")]
    UnknownHandle { session_id: Ulid, handle: FactHandle },

    /// The mutation was applied in memory but could not be made durable.
    #[error("persistence error: {0}")]
    Persistence(#[from] CheckpointError),

    #[error("recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("engine error: {0}")]
    Engine(EngineError),

    #[error("session is not live: {0}")]
    UnknownSession(Ulid),

    #[error("session is already live: {0}")]
    SessionExists(Ulid),

    #[error("session actor channel closed")]
    ChannelClosed,
}

/// Requests a session actor understands.
#[derive(Debug)]
pub enum Command {
    Insert { fact: Fact },
    Update { handle: FactHandle, fact: Fact },
    Delete { handle: FactHandle },
    FireAllRules,
    ClearGlobal { name: String },
    Safepoint,
    /// Remove the persisted snapshot and stop the actor.
    Discard,
}

/// What a command did.
#[derive(Debug)]
pub enum Outcome {
    Inserted(FactHandle),
    Updated,
    Deleted(Fact),
    Fired(usize),
    Cleared(bool),
    Checkpointed(bool),
    Discarded,
}

impl Outcome {
    /// Whether the command changed session state.
    fn mutated(&self) -> bool {
        match self {
            Outcome::Inserted(_) | Outcome::Updated | Outcome::Deleted(_) => true,
            Outcome::Fired(count) => *count > 0,
            Outcome::Cleared(cleared) => *cleared,
            Outcome::Checkpointed(_) | Outcome::Discarded => false,
        }
    }
}

/// Message type sent through the command channel: a command paired with
/// a oneshot sender for the response.
type CommandMessage = (Command, oneshot::Sender<Result<Outcome, SessionError>>);

/// Public handle for interacting with a session actor.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<CommandMessage>,
    engine: Arc<RwLock<Engine>>,
    pub session_id: Ulid,
    pub options: SessionOptions,
}

impl SessionHandle {
    /// Send a command to the actor and await its outcome.
    pub async fn send_command(&self, cmd: Command) -> Result<Outcome, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send((cmd, tx))
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Read-only access to the live engine.
    pub async fn read_engine(&self) -> tokio::sync::RwLockReadGuard<'_, Engine> {
        self.engine.read().await
    }
}

/// Spawn a session actor task and return the handle for interacting with it.
/// `state_version` is the version of `engine` as already reflected in the
/// store (0 for a fresh session).
pub fn spawn(
    session_id: Ulid,
    engine: Engine,
    writer: CheckpointWriter,
    state_version: u64,
) -> SessionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel::<CommandMessage>(64);
    let options = writer.options();
    let engine = Arc::new(RwLock::new(engine));

    let handle = SessionHandle {
        cmd_tx,
        engine: Arc::clone(&engine),
        session_id,
        options,
    };

    let actor = SessionActor {
        engine,
        cmd_rx,
        writer,
        state_version,
        session_id,
    };

    tokio::spawn(actor.run());

    handle
}

/// The internal actor that processes commands in a loop.
struct SessionActor {
    engine: Arc<RwLock<Engine>>,
    cmd_rx: mpsc::Receiver<CommandMessage>,
    writer: CheckpointWriter,
    state_version: u64,
    session_id: Ulid,
}

impl SessionActor {
    async fn run(mut self) {
        while let Some((cmd, reply_tx)) = self.cmd_rx.recv().await {
            let stop = matches!(cmd, Command::Discard);
            let result = self.process_command(cmd).await;
            let discarded = stop && result.is_ok();
            // Ignore send error; the caller may have dropped their receiver
            let _ = reply_tx.send(result);
            if discarded {
                break;
            }
        }
        tracing::debug!(session_id = %self.session_id, "session actor stopped");
    }

    async fn process_command(&mut self, cmd: Command) -> Result<Outcome, SessionError> {
        let mut engine = self.engine.write().await;
        let session_id = self.session_id;
        let unknown = |e: EngineError| match e {
            EngineError::UnknownHandle(handle) => SessionError::UnknownHandle { session_id, handle },
            other => SessionError::Engine(other),
        };

        let outcome = match cmd {
            Command::Insert { fact } => Outcome::Inserted(engine.insert(fact)),
            Command::Update { handle, fact } => {
                engine.update(handle, fact).map_err(unknown)?;
                Outcome::Updated
            }
            Command::Delete { handle } => Outcome::Deleted(engine.delete(handle).map_err(unknown)?),
            Command::FireAllRules => Outcome::Fired(engine.fire_all_rules()),
            Command::ClearGlobal { name } => Outcome::Cleared(engine.clear_global(&name)),
            Command::Safepoint => {
                let wrote = self.writer.safepoint(&engine, self.state_version)?;
                return Ok(Outcome::Checkpointed(wrote));
            }
            Command::Discard => {
                self.writer.discard()?;
                return Ok(Outcome::Discarded);
            }
        };

        if !outcome.mutated() {
            return Ok(outcome);
        }

        self.state_version += 1;
        if let Err(e) = self.writer.after_mutation(&engine, self.state_version) {
            tracing::warn!(
                session_id = %self.session_id,
                state_version = self.state_version,
                "mutation applied in memory but not persisted: {}",
                e
            );
            return Err(SessionError::Persistence(e));
        }

        Ok(outcome)
    }
}
