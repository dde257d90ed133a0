// ABOUTME: Serialized form of a session snapshot, split into independently keyed components.
// ABOUTME: Encoding is deterministic: equal logical state always produces identical bytes.

use std::collections::BTreeSet;

use ruleward_core::{
    ActivationKey, Engine, EngineStores, Fact, FactHandle, Globals, NetworkState, PersistenceStrategy,
    SafepointStrategy, SessionOptions, StoredFact,
};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::store::ComponentTag;

/// Bumped whenever the component layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

/// Written last on every checkpoint; its presence marks a restorable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub format_version: u32,
    pub session_id: Ulid,
    pub state_version: u64,
    pub persistence: PersistenceStrategy,
    pub safepoint: SafepointStrategy,
    pub rules: Vec<String>,
    pub next_handle: u64,
}

impl SnapshotHeader {
    pub fn options(&self) -> SessionOptions {
        SessionOptions::new(self.persistence, self.safepoint)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactEntry {
    pub handle: FactHandle,
    pub version: u64,
    pub fact: Fact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactsComponent {
    pub state_version: u64,
    pub facts: Vec<FactEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkersComponent {
    pub state_version: u64,
    pub fired: BTreeSet<ActivationKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalsComponent {
    pub state_version: u64,
    pub globals: Globals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkComponent {
    pub state_version: u64,
    pub network: NetworkState,
}

/// Serialize an engine into `(tag, bytes)` pairs in write order. The header
/// always comes last. The network component is only produced for `Full`.
pub fn encode(
    session_id: Ulid,
    engine: &Engine,
    options: SessionOptions,
    state_version: u64,
) -> Result<Vec<(ComponentTag, Vec<u8>)>, serde_json::Error> {
    let stores = engine.stores();

    let header = SnapshotHeader {
        format_version: FORMAT_VERSION,
        session_id,
        state_version,
        persistence: options.persistence,
        safepoint: options.safepoint,
        rules: engine.program().rule_names(),
        next_handle: stores.next_handle,
    };

    let facts = FactsComponent {
        state_version,
        facts: stores
            .facts
            .into_iter()
            .map(|(handle, stored)| FactEntry {
                handle,
                version: stored.version,
                fact: stored.fact,
            })
            .collect(),
    };

    let markers = MarkersComponent {
        state_version,
        fired: stores.fired,
    };

    let globals = GlobalsComponent {
        state_version,
        globals: stores.globals,
    };

    let mut components = vec![
        (ComponentTag::Facts, serde_json::to_vec(&facts)?),
        (ComponentTag::Markers, serde_json::to_vec(&markers)?),
        (ComponentTag::Globals, serde_json::to_vec(&globals)?),
    ];

    if options.persistence == PersistenceStrategy::Full {
        let network = NetworkComponent {
            state_version,
            network: engine.network().clone(),
        };
        components.push((ComponentTag::Network, serde_json::to_vec(&network)?));
    }

    components.push((ComponentTag::Header, serde_json::to_vec(&header)?));

    Ok(components)
}

/// Reassemble engine backing stores from decoded components.
pub fn into_stores(
    header: &SnapshotHeader,
    facts: FactsComponent,
    markers: MarkersComponent,
    globals: GlobalsComponent,
) -> EngineStores {
    EngineStores {
        next_handle: header.next_handle,
        facts: facts
            .facts
            .into_iter()
            .map(|entry| {
                (
                    entry.handle,
                    StoredFact {
                        version: entry.version,
                        fact: entry.fact,
                    },
                )
            })
            .collect(),
        fired: markers.fired,
        globals: globals.globals,
    }
}
