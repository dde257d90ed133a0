// ABOUTME: Session layer for ruleward: live sessions, their actors, and the manager that restores them.
// ABOUTME: Each session is owned by one actor task; the manager maps session ids to actor handles.

pub mod actor;
pub mod config;
pub mod manager;

pub use actor::{Command, Outcome, SessionError, SessionHandle};
pub use config::{ConfigError, ReliabilityConfig, StoreKind};
pub use manager::SessionManager;
