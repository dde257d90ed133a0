// ABOUTME: Persistence and safepoint strategies, fixed per session at creation.
// ABOUTME: A small compatibility table rejects unsupported combinations up front.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a session is configured with an unsupported combination or
/// an unrecognized strategy name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error(
        "persistence strategy {persistence} is not supported with safepoint strategy {safepoint}: \
         pending propagation state cannot be reconstructed reliably between explicit safepoints"
    )]
    Unsupported {
        persistence: PersistenceStrategy,
        safepoint: SafepointStrategy,
    },

    #[error("unknown {kind} strategy: {value}")]
    UnknownStrategy { kind: &'static str, value: String },
}

/// What a checkpoint captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceStrategy {
    /// Facts, markers, globals and the full propagation state.
    Full,
    /// Facts, markers and globals only; propagation state is rebuilt on load.
    StoresOnly,
}

/// When a checkpoint is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafepointStrategy {
    /// Only when a safepoint is requested.
    Explicit,
    /// Synchronously after every mutating operation.
    Always,
}

impl fmt::Display for PersistenceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceStrategy::Full => write!(f, "full"),
            PersistenceStrategy::StoresOnly => write!(f, "stores_only"),
        }
    }
}

impl fmt::Display for SafepointStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafepointStrategy::Explicit => write!(f, "explicit"),
            SafepointStrategy::Always => write!(f, "always"),
        }
    }
}

impl FromStr for PersistenceStrategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "full" => Ok(PersistenceStrategy::Full),
            "stores_only" => Ok(PersistenceStrategy::StoresOnly),
            _ => Err(ConfigurationError::UnknownStrategy {
                kind: "persistence",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for SafepointStrategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "explicit" => Ok(SafepointStrategy::Explicit),
            "always" => Ok(SafepointStrategy::Always),
            _ => Err(ConfigurationError::UnknownStrategy {
                kind: "safepoint",
                value: s.to_string(),
            }),
        }
    }
}

/// The strategy pair a session is created or restored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionOptions {
    pub persistence: PersistenceStrategy,
    pub safepoint: SafepointStrategy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            persistence: PersistenceStrategy::StoresOnly,
            safepoint: SafepointStrategy::Always,
        }
    }
}

impl SessionOptions {
    pub fn new(persistence: PersistenceStrategy, safepoint: SafepointStrategy) -> Self {
        Self {
            persistence,
            safepoint,
        }
    }

    /// Check the pair against the compatibility table.
    ///
    /// | persistence | explicit | always |
    /// |-------------|----------|--------|
    /// | stores_only | yes      | yes    |
    /// | full        | no       | yes    |
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match (self.persistence, self.safepoint) {
            (PersistenceStrategy::StoresOnly, _) => Ok(()),
            (PersistenceStrategy::Full, SafepointStrategy::Always) => Ok(()),
            (PersistenceStrategy::Full, SafepointStrategy::Explicit) => {
                Err(ConfigurationError::Unsupported {
                    persistence: self.persistence,
                    safepoint: self.safepoint,
                })
            }
        }
    }

    /// Every supported combination, for exhaustive tests and tooling.
    pub fn supported() -> Vec<SessionOptions> {
        [
            (PersistenceStrategy::StoresOnly, SafepointStrategy::Explicit),
            (PersistenceStrategy::StoresOnly, SafepointStrategy::Always),
            (PersistenceStrategy::Full, SafepointStrategy::Always),
        ]
        .into_iter()
        .map(|(p, s)| SessionOptions::new(p, s))
        .collect()
    }
}
