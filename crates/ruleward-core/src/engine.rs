// ABOUTME: Single-session matching engine: a handle-indexed fact arena, per-type alpha memories, and a FIFO agenda.
// ABOUTME: Exposes its backing stores and propagation state so sessions can be checkpointed and rebuilt.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fact::{Fact, FactHandle, Value};
use crate::rule::{Rule, RuleContext, RuleProgram, Tuple};
use crate::tracker::{ActivationKey, FactRef, Tracker};

/// Errors raised by the engine itself.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown fact handle: {0}")]
    UnknownHandle(FactHandle),

    #[error("inconsistent engine state: {0}")]
    Inconsistent(String),
}

/// Named result lists written by rule actions.
pub type Globals = BTreeMap<String, Vec<Value>>;

/// A fact as held in the backing store, with the version of its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFact {
    pub version: u64,
    pub fact: Fact,
}

/// The minimal state from which a whole engine can be rebuilt by replaying
/// inserts through the matcher.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineStores {
    pub next_handle: u64,
    pub facts: BTreeMap<FactHandle, StoredFact>,
    pub fired: BTreeSet<ActivationKey>,
    pub globals: Globals,
}

/// Internal propagation state: alpha memories and the agenda of pending
/// activations, keyed by scheduling sequence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkState {
    pub alpha: BTreeMap<String, BTreeSet<FactHandle>>,
    pub agenda: BTreeMap<u64, ActivationKey>,
    pub next_sequence: u64,
}

/// The in-memory evaluation engine for one session.
pub struct Engine {
    program: Arc<RuleProgram>,
    facts: BTreeMap<FactHandle, Fact>,
    tracker: Tracker,
    network: NetworkState,
    /// Derived from `network.agenda`; never persisted.
    queued: BTreeSet<ActivationKey>,
    globals: Globals,
}

impl Engine {
    /// Create an empty engine for the given program.
    pub fn new(program: Arc<RuleProgram>) -> Self {
        Self {
            program,
            facts: BTreeMap::new(),
            tracker: Tracker::new(),
            network: NetworkState::default(),
            queued: BTreeSet::new(),
            globals: Globals::new(),
        }
    }

    /// Build a fresh engine from backing stores alone. Every fact is pushed
    /// back through the matcher in handle order; tuples whose marker is
    /// already recorded are not scheduled again.
    pub fn rebuild(program: Arc<RuleProgram>, stores: EngineStores) -> Result<Self, EngineError> {
        let versions = stores
            .facts
            .iter()
            .map(|(handle, stored)| (*handle, stored.version))
            .collect();
        let tracker = Tracker::restore(stores.next_handle, versions, stores.fired)?;

        let mut engine = Self {
            program,
            facts: BTreeMap::new(),
            tracker,
            network: NetworkState::default(),
            queued: BTreeSet::new(),
            globals: stores.globals,
        };

        for (handle, stored) in stores.facts {
            engine.attach(handle, stored.fact);
            engine.propagate(handle);
        }

        tracing::debug!(
            facts = engine.facts.len(),
            pending = engine.network.agenda.len(),
            "rebuilt engine from backing stores"
        );

        Ok(engine)
    }

    /// Build an engine directly from a persisted propagation state, without
    /// running the matcher. The state is checked against the stores and the
    /// program before it is accepted.
    pub fn from_network(
        program: Arc<RuleProgram>,
        stores: EngineStores,
        network: NetworkState,
    ) -> Result<Self, EngineError> {
        let versions = stores
            .facts
            .iter()
            .map(|(handle, stored)| (*handle, stored.version))
            .collect();
        let tracker = Tracker::restore(stores.next_handle, versions, stores.fired)?;
        let facts: BTreeMap<FactHandle, Fact> = stores
            .facts
            .into_iter()
            .map(|(handle, stored)| (handle, stored.fact))
            .collect();

        for (kind, handles) in &network.alpha {
            for handle in handles {
                match facts.get(handle) {
                    Some(fact) if &fact.kind == kind => {}
                    Some(fact) => {
                        return Err(EngineError::Inconsistent(format!(
                            "alpha memory {kind} holds {handle} of type {}",
                            fact.kind
                        )));
                    }
                    None => {
                        return Err(EngineError::Inconsistent(format!(
                            "alpha memory {kind} holds dead handle {handle}"
                        )));
                    }
                }
            }
        }

        for (handle, fact) in &facts {
            let indexed = network
                .alpha
                .get(&fact.kind)
                .is_some_and(|handles| handles.contains(handle));
            if !indexed {
                return Err(EngineError::Inconsistent(format!(
                    "fact {handle} is missing from alpha memory {}",
                    fact.kind
                )));
            }
        }

        let mut queued = BTreeSet::new();
        for (sequence, key) in &network.agenda {
            if *sequence >= network.next_sequence {
                return Err(EngineError::Inconsistent(format!(
                    "activation sequence {sequence} is not below next sequence {}",
                    network.next_sequence
                )));
            }
            if program.rule(&key.rule).is_none() {
                return Err(EngineError::Inconsistent(format!(
                    "pending activation {key} names a rule missing from the program"
                )));
            }
            if !tracker.is_current(key) {
                return Err(EngineError::Inconsistent(format!(
                    "pending activation {key} references a stale or dead fact"
                )));
            }
            if tracker.has_fired(key) {
                return Err(EngineError::Inconsistent(format!(
                    "pending activation {key} is already marked fired"
                )));
            }
            queued.insert(key.clone());
        }

        Ok(Self {
            program,
            facts,
            tracker,
            network,
            queued,
            globals: stores.globals,
        })
    }

    /// Insert a fact and schedule every activation it completes.
    pub fn insert(&mut self, fact: Fact) -> FactHandle {
        let handle = self.tracker.allocate().handle;
        self.attach(handle, fact);
        self.propagate(handle);
        handle
    }

    /// Replace a fact's value in place. The handle is kept; its version moves
    /// on, so pending matches are dropped and the new value is matched afresh.
    pub fn update(&mut self, handle: FactHandle, fact: Fact) -> Result<(), EngineError> {
        if !self.tracker.is_live(handle) {
            return Err(EngineError::UnknownHandle(handle));
        }
        self.cancel(handle);
        self.detach(handle);
        self.tracker.bump(handle);
        self.attach(handle, fact);
        self.propagate(handle);
        Ok(())
    }

    /// Remove a fact and every pending activation that depends on it.
    pub fn delete(&mut self, handle: FactHandle) -> Result<Fact, EngineError> {
        if !self.tracker.is_live(handle) {
            return Err(EngineError::UnknownHandle(handle));
        }
        self.cancel(handle);
        let fact = self
            .detach(handle)
            .ok_or(EngineError::UnknownHandle(handle))?;
        self.tracker.retire(handle);
        Ok(fact)
    }

    /// Fire pending activations in scheduling order until none remain.
    /// Returns the number of activations fired.
    pub fn fire_all_rules(&mut self) -> usize {
        let program = Arc::clone(&self.program);
        let mut count = 0;

        while let Some((_, key)) = self.network.agenda.pop_first() {
            self.queued.remove(&key);

            if !self.tracker.is_current(&key) || self.tracker.has_fired(&key) {
                continue;
            }
            let Some(rule) = program.rule(&key.rule) else {
                continue;
            };

            let handles: Vec<FactHandle> = key.tuple.iter().map(|r| r.handle).collect();
            let facts: Vec<&Fact> = handles.iter().filter_map(|h| self.facts.get(h)).collect();
            if facts.len() != handles.len() {
                continue;
            }

            let mut ctx = RuleContext::default();
            rule.fire(
                &Tuple {
                    handles: &handles,
                    facts,
                },
                &mut ctx,
            );

            tracing::trace!(activation = %key, "fired");
            self.tracker.record_fired(key);
            count += 1;

            self.apply(ctx);
        }

        count
    }

    fn apply(&mut self, ctx: RuleContext) {
        for (name, value) in ctx.globals {
            self.globals.entry(name).or_default().push(value);
        }
        for fact in ctx.inserts {
            self.insert(fact);
        }
        for handle in ctx.deletes {
            if let Err(e) = self.delete(handle) {
                tracing::debug!("rule action delete ignored: {}", e);
            }
        }
    }

    fn attach(&mut self, handle: FactHandle, fact: Fact) {
        self.network
            .alpha
            .entry(fact.kind.clone())
            .or_default()
            .insert(handle);
        self.facts.insert(handle, fact);
    }

    fn detach(&mut self, handle: FactHandle) -> Option<Fact> {
        let fact = self.facts.remove(&handle)?;
        if let Some(handles) = self.network.alpha.get_mut(&fact.kind) {
            handles.remove(&handle);
            if handles.is_empty() {
                self.network.alpha.remove(&fact.kind);
            }
        }
        Some(fact)
    }

    fn cancel(&mut self, handle: FactHandle) {
        self.network.agenda.retain(|_, key| !key.involves(handle));
        self.queued.retain(|key| !key.involves(handle));
    }

    /// Schedule every new activation that contains `handle`.
    fn propagate(&mut self, handle: FactHandle) {
        let program = Arc::clone(&self.program);
        let Some(kind) = self.facts.get(&handle).map(|f| f.kind.clone()) else {
            return;
        };

        for rule in program.rules() {
            for (position, pattern) in rule.patterns().iter().enumerate() {
                if *pattern != kind {
                    continue;
                }
                for tuple in self.tuples_with(rule, position, handle) {
                    self.consider(rule, tuple);
                }
            }
        }
    }

    /// All handle tuples for `rule` with `handle` pinned at `position`. A
    /// fact never occupies two positions of one tuple.
    fn tuples_with(&self, rule: &Rule, position: usize, handle: FactHandle) -> Vec<Vec<FactHandle>> {
        let mut partial: Vec<Vec<FactHandle>> = vec![Vec::new()];

        for (index, pattern) in rule.patterns().iter().enumerate() {
            let choices: Vec<FactHandle> = if index == position {
                vec![handle]
            } else {
                self.network
                    .alpha
                    .get(pattern)
                    .map(|handles| handles.iter().copied().filter(|h| *h != handle).collect())
                    .unwrap_or_default()
            };

            let mut next = Vec::new();
            for prefix in &partial {
                for choice in &choices {
                    if prefix.contains(choice) {
                        continue;
                    }
                    let mut tuple = prefix.clone();
                    tuple.push(*choice);
                    next.push(tuple);
                }
            }
            partial = next;
            if partial.is_empty() {
                break;
            }
        }

        partial
    }

    fn consider(&mut self, rule: &Rule, handles: Vec<FactHandle>) {
        let refs: Option<Vec<FactRef>> = handles.iter().map(|h| self.tracker.identity(*h)).collect();
        let Some(refs) = refs else {
            return;
        };
        let key = ActivationKey {
            rule: rule.name().to_string(),
            tuple: refs,
        };

        if self.queued.contains(&key) || self.tracker.has_fired(&key) {
            return;
        }

        let facts: Vec<&Fact> = handles.iter().filter_map(|h| self.facts.get(h)).collect();
        let matched = rule.matches(&Tuple {
            handles: &handles,
            facts,
        });
        if !matched {
            return;
        }

        let sequence = self.network.next_sequence;
        self.network.next_sequence += 1;
        self.network.agenda.insert(sequence, key.clone());
        self.queued.insert(key);
    }

    pub fn program(&self) -> &Arc<RuleProgram> {
        &self.program
    }

    pub fn fact(&self, handle: FactHandle) -> Option<&Fact> {
        self.facts.get(&handle)
    }

    pub fn facts(&self) -> impl Iterator<Item = (FactHandle, &Fact)> {
        self.facts.iter().map(|(h, f)| (*h, f))
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    /// First live handle whose fact equals `fact`, in handle order.
    pub fn find_handle(&self, fact: &Fact) -> Option<FactHandle> {
        self.facts
            .iter()
            .find(|(_, f)| *f == fact)
            .map(|(h, _)| *h)
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn global(&self, name: &str) -> &[Value] {
        self.globals.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Empty a global list. Returns false if it held nothing.
    pub fn clear_global(&mut self, name: &str) -> bool {
        self.globals.remove(name).is_some_and(|values| !values.is_empty())
    }

    /// Pending activations in firing order.
    pub fn pending(&self) -> impl Iterator<Item = &ActivationKey> {
        self.network.agenda.values()
    }

    pub fn pending_count(&self) -> usize {
        self.network.agenda.len()
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn network(&self) -> &NetworkState {
        &self.network
    }

    /// Snapshot of the backing stores.
    pub fn stores(&self) -> EngineStores {
        let facts = self
            .facts
            .iter()
            .filter_map(|(handle, fact)| {
                self.tracker.identity(*handle).map(|r| {
                    (
                        *handle,
                        StoredFact {
                            version: r.version,
                            fact: fact.clone(),
                        },
                    )
                })
            })
            .collect();

        EngineStores {
            next_handle: self.tracker.next_handle(),
            facts,
            fired: self.tracker.fired().clone(),
            globals: self.globals.clone(),
        }
    }
}
