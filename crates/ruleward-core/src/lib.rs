// ABOUTME: Core library for ruleward: facts, rule programs, the matching engine, and identity tracking.
// ABOUTME: This crate has no knowledge of storage; it exposes the state that storage persists.

pub mod datetime;
pub mod engine;
pub mod fact;
pub mod rule;
pub mod strategy;
pub mod tracker;

pub use datetime::CodecError;
pub use engine::{Engine, EngineError, EngineStores, Globals, NetworkState, StoredFact};
pub use fact::{Fact, FactHandle, Value};
pub use rule::{Rule, RuleContext, RuleProgram, Tuple};
pub use strategy::{ConfigurationError, PersistenceStrategy, SafepointStrategy, SessionOptions};
pub use tracker::{ActivationKey, FactRef, Tracker};
