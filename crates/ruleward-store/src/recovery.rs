// ABOUTME: Recovery loader: rebuilds a session engine from its stored snapshot components.
// ABOUTME: Verifies format and state-version agreement, then deserializes (FULL) or replays facts (STORES_ONLY).

use std::sync::Arc;

use ruleward_core::{Engine, EngineError, PersistenceStrategy, RuleProgram};
use serde::de::DeserializeOwned;
use thiserror::Error;
use ulid::Ulid;

use crate::snapshot::{
    FORMAT_VERSION, FactsComponent, GlobalsComponent, MarkersComponent, NetworkComponent,
    SnapshotHeader, into_stores,
};
use crate::store::{ComponentTag, SnapshotStore, StoreError};

/// Errors that can occur during recovery. Any of these aborts the restore.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("no snapshot stored for session {0}")]
    NotFound(Ulid),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("component {tag} of session {session_id} is missing")]
    MissingComponent { session_id: Ulid, tag: ComponentTag },

    #[error("failed to decode component {tag}: {source}")]
    Decode {
        tag: ComponentTag,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported snapshot format version {0} (expected {expected})", expected = FORMAT_VERSION)]
    UnsupportedFormat(u32),

    #[error("snapshot header names session {found}, expected {expected}")]
    SessionMismatch { expected: Ulid, found: Ulid },

    #[error("torn snapshot: {tag} is at state version {found}, header is at {expected}")]
    Torn {
        tag: ComponentTag,
        expected: u64,
        found: u64,
    },

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// A rebuilt engine plus the header it was loaded from.
pub struct RecoveredSession {
    pub engine: Engine,
    pub header: SnapshotHeader,
}

/// Read and decode just the header, if one is stored.
pub fn read_header(store: &dyn SnapshotStore, session_id: &Ulid) -> Result<Option<SnapshotHeader>, RecoveryError> {
    match store.get(session_id, ComponentTag::Header)? {
        Some(bytes) => Ok(Some(decode(ComponentTag::Header, &bytes)?)),
        None => Ok(None),
    }
}

/// Recover a session from the store.
///
/// Recovery sequence:
/// 1. Load the header (absent means no snapshot)
/// 2. Check format version and session id
/// 3. Load facts, markers and globals and check they match the header's state version
/// 4. FULL: load the network component and adopt it as-is after validation
/// 5. STORES_ONLY: build a fresh engine and replay every fact through the matcher,
///    skipping tuples whose marker is already recorded
pub fn recover_session(
    store: &dyn SnapshotStore,
    session_id: &Ulid,
    program: Arc<RuleProgram>,
    persistence: PersistenceStrategy,
) -> Result<RecoveredSession, RecoveryError> {
    // Step 1 & 2: header
    let header = read_header(store, session_id)?.ok_or(RecoveryError::NotFound(*session_id))?;

    if header.format_version != FORMAT_VERSION {
        return Err(RecoveryError::UnsupportedFormat(header.format_version));
    }
    if header.session_id != *session_id {
        return Err(RecoveryError::SessionMismatch {
            expected: *session_id,
            found: header.session_id,
        });
    }

    // Step 3: backing stores
    let facts: FactsComponent = load(store, session_id, ComponentTag::Facts)?;
    check_version(&header, ComponentTag::Facts, facts.state_version)?;
    let markers: MarkersComponent = load(store, session_id, ComponentTag::Markers)?;
    check_version(&header, ComponentTag::Markers, markers.state_version)?;
    let globals: GlobalsComponent = load(store, session_id, ComponentTag::Globals)?;
    check_version(&header, ComponentTag::Globals, globals.state_version)?;

    let stores = into_stores(&header, facts, markers, globals);

    // Step 4 & 5: propagation state
    let engine = match persistence {
        PersistenceStrategy::Full => {
            let network: NetworkComponent = load(store, session_id, ComponentTag::Network)?;
            check_version(&header, ComponentTag::Network, network.state_version)?;
            Engine::from_network(program, stores, network.network)?
        }
        PersistenceStrategy::StoresOnly => Engine::rebuild(program, stores)?,
    };

    tracing::info!(
        session_id = %session_id,
        state_version = header.state_version,
        facts = engine.fact_count(),
        pending = engine.pending_count(),
        fired = engine.tracker().fired().len(),
        persistence = %persistence,
        "recovered session"
    );

    Ok(RecoveredSession { engine, header })
}

fn load<T: DeserializeOwned>(
    store: &dyn SnapshotStore,
    session_id: &Ulid,
    tag: ComponentTag,
) -> Result<T, RecoveryError> {
    let bytes = store
        .get(session_id, tag)?
        .ok_or(RecoveryError::MissingComponent {
            session_id: *session_id,
            tag,
        })?;
    decode(tag, &bytes)
}

fn decode<T: DeserializeOwned>(tag: ComponentTag, bytes: &[u8]) -> Result<T, RecoveryError> {
    serde_json::from_slice(bytes).map_err(|source| RecoveryError::Decode { tag, source })
}

fn check_version(header: &SnapshotHeader, tag: ComponentTag, found: u64) -> Result<(), RecoveryError> {
    if found == header.state_version {
        Ok(())
    } else {
        Err(RecoveryError::Torn {
            tag,
            expected: header.state_version,
            found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointWriter;
    use crate::memory::MemoryStore;
    use chrono::NaiveDate;
    use ruleward_core::{Fact, Rule, SafepointStrategy, SessionOptions, Value};

    fn program() -> Arc<RuleProgram> {
        Arc::new(RuleProgram::new(vec![
            Rule::new("X")
                .when("String")
                .when("Person")
                .filter(|t| match (t.fact(0).str("value"), t.fact(1).str("name")) {
                    (Some(p), Some(n)) => n.starts_with(p),
                    _ => false,
                })
                .then(|t, ctx| ctx.push_global("results", t.fact(1).str("name").unwrap_or_default())),
        ]))
    }

    fn person(name: &str) -> Fact {
        Fact::new("Person").with("name", name).with("age", 30)
    }

    fn checkpointed(options: SessionOptions) -> (Arc<MemoryStore>, Ulid, Engine) {
        let store = Arc::new(MemoryStore::new());
        let id = Ulid::new();
        let mut engine = Engine::new(program());
        engine.insert(Fact::text("M"));
        engine.insert(person("Matching Person One"));
        engine.fire_all_rules();
        engine.insert(person("Matching Person Two"));

        let mut writer = CheckpointWriter::new(store.clone(), id, options);
        writer.write(&engine, 4).unwrap();
        (store, id, engine)
    }

    #[test]
    fn missing_snapshot_is_not_found() {
        let store = MemoryStore::new();
        let id = Ulid::new();
        let err = recover_session(&store, &id, program(), PersistenceStrategy::StoresOnly)
            .err()
            .unwrap();
        assert!(matches!(err, RecoveryError::NotFound(x) if x == id));
    }

    #[test]
    fn stores_only_recovery_fires_only_unfired_matches() {
        let (store, id, original) = checkpointed(SessionOptions::default());

        let mut recovered =
            recover_session(store.as_ref(), &id, program(), PersistenceStrategy::StoresOnly).unwrap();

        assert_eq!(recovered.header.state_version, 4);
        assert_eq!(recovered.engine.stores(), original.stores());
        assert_eq!(recovered.engine.fire_all_rules(), 1);
        assert_eq!(
            recovered.engine.global("results"),
            &[
                Value::from("Matching Person One"),
                Value::from("Matching Person Two")
            ]
        );
    }

    #[test]
    fn full_recovery_adopts_network() {
        let options = SessionOptions::new(PersistenceStrategy::Full, SafepointStrategy::Always);
        let (store, id, original) = checkpointed(options);

        let mut recovered =
            recover_session(store.as_ref(), &id, program(), PersistenceStrategy::Full).unwrap();

        assert_eq!(recovered.engine.network(), original.network());
        assert_eq!(recovered.engine.fire_all_rules(), 1);
    }

    #[test]
    fn full_recovery_needs_network_component() {
        let (store, id, _) = checkpointed(SessionOptions::default());

        let err = recover_session(store.as_ref(), &id, program(), PersistenceStrategy::Full)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RecoveryError::MissingComponent { tag: ComponentTag::Network, .. }
        ));
    }

    #[test]
    fn torn_snapshot_is_rejected() {
        let (store, id, engine) = checkpointed(SessionOptions::default());

        // Simulate a crash after the facts component of a later checkpoint landed.
        let components = crate::snapshot::encode(id, &engine, SessionOptions::default(), 5).unwrap();
        let (_, facts) = components
            .iter()
            .find(|(t, _)| *t == ComponentTag::Facts)
            .unwrap();
        store.put(&id, ComponentTag::Facts, facts).unwrap();

        let err = recover_session(store.as_ref(), &id, program(), PersistenceStrategy::StoresOnly)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RecoveryError::Torn { tag: ComponentTag::Facts, expected: 4, found: 5 }
        ));
    }

    #[test]
    fn corrupt_component_is_a_decode_error() {
        let (store, id, _) = checkpointed(SessionOptions::default());
        store.put(&id, ComponentTag::Markers, b"{not json").unwrap();

        let err = recover_session(store.as_ref(), &id, program(), PersistenceStrategy::StoresOnly)
            .err()
            .unwrap();
        assert!(matches!(err, RecoveryError::Decode { tag: ComponentTag::Markers, .. }));
    }

    #[test]
    fn malformed_timestamp_aborts_recovery_with_codec_message() {
        let store = Arc::new(MemoryStore::new());
        let id = Ulid::new();
        let mut engine = Engine::new(program());
        let at = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        engine.insert(Fact::new("Event").with("at", at));
        CheckpointWriter::new(store.clone(), id, SessionOptions::default())
            .write(&engine, 1)
            .unwrap();

        let facts = store.get(&id, ComponentTag::Facts).unwrap().unwrap();
        let tampered = String::from_utf8(facts)
            .unwrap()
            .replace("2024-02-29T12:00:00", "2024-02-30T12:00:00");
        store.put(&id, ComponentTag::Facts, tampered.as_bytes()).unwrap();

        let err = recover_session(store.as_ref(), &id, program(), PersistenceStrategy::StoresOnly)
            .err()
            .unwrap();
        let message = err.to_string();
        assert!(message.contains("2024-02-30T12:00:00"), "got {message}");
        assert!(message.contains("NaiveDateTime"), "got {message}");
    }

    #[test]
    fn newer_format_version_is_rejected() {
        let (store, id, _) = checkpointed(SessionOptions::default());
        let header = store.get(&id, ComponentTag::Header).unwrap().unwrap();
        let bumped = String::from_utf8(header)
            .unwrap()
            .replace("\"format_version\":1", "\"format_version\":99");
        store.put(&id, ComponentTag::Header, bumped.as_bytes()).unwrap();

        let err = recover_session(store.as_ref(), &id, program(), PersistenceStrategy::StoresOnly)
            .err()
            .unwrap();
        assert!(matches!(err, RecoveryError::UnsupportedFormat(99)));
        assert_eq!(
            err.to_string(),
            format!("unsupported snapshot format version 99 (expected {FORMAT_VERSION})")
        );
    }

    #[test]
    fn header_for_another_session_is_rejected() {
        let (store, id, _) = checkpointed(SessionOptions::default());
        let other = Ulid::new();
        let header = store.get(&id, ComponentTag::Header).unwrap().unwrap();
        store.put(&other, ComponentTag::Header, &header).unwrap();

        let err = recover_session(store.as_ref(), &other, program(), PersistenceStrategy::StoresOnly)
            .err()
            .unwrap();
        assert!(matches!(err, RecoveryError::SessionMismatch { .. }));
    }
}
