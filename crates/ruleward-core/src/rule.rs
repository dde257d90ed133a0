// ABOUTME: Rule programs: named rules with type patterns, a join condition, and an action.
// ABOUTME: Actions run against a matched tuple and report side effects through RuleContext.

use std::fmt;
use std::sync::Arc;

use crate::fact::{Fact, FactHandle, Value};

type Condition = Arc<dyn Fn(&Tuple<'_>) -> bool + Send + Sync>;
type Action = Arc<dyn Fn(&Tuple<'_>, &mut RuleContext) + Send + Sync>;

/// A matched tuple of facts, positionally aligned with the rule's patterns.
pub struct Tuple<'a> {
    pub(crate) handles: &'a [FactHandle],
    pub(crate) facts: Vec<&'a Fact>,
}

impl<'a> Tuple<'a> {
    /// The fact bound to the pattern at `index`.
    pub fn fact(&self, index: usize) -> &'a Fact {
        self.facts[index]
    }

    pub fn handle(&self, index: usize) -> FactHandle {
        self.handles[index]
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

/// Side effects requested by a firing rule. Applied by the engine once the
/// action returns.
#[derive(Debug, Default)]
pub struct RuleContext {
    pub(crate) globals: Vec<(String, Value)>,
    pub(crate) inserts: Vec<Fact>,
    pub(crate) deletes: Vec<FactHandle>,
}

impl RuleContext {
    /// Append a value to the named global list.
    pub fn push_global(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.globals.push((name.into(), value.into()));
    }

    pub fn insert(&mut self, fact: Fact) {
        self.inserts.push(fact);
    }

    pub fn delete(&mut self, handle: FactHandle) {
        self.deletes.push(handle);
    }
}

/// A single rule. Build with [`Rule::new`] and the `when`/`filter`/`then` chain.
#[derive(Clone)]
pub struct Rule {
    name: String,
    patterns: Vec<String>,
    condition: Condition,
    action: Action,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("patterns", &self.patterns)
            .finish()
    }
}

impl Rule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            patterns: Vec::new(),
            condition: Arc::new(|_| true),
            action: Arc::new(|_, _| {}),
        }
    }

    /// Add a pattern matching any fact of the given type.
    pub fn when(mut self, kind: impl Into<String>) -> Self {
        self.patterns.push(kind.into());
        self
    }

    /// Join condition evaluated over a full candidate tuple.
    pub fn filter<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Tuple<'_>) -> bool + Send + Sync + 'static,
    {
        self.condition = Arc::new(condition);
        self
    }

    pub fn then<F>(mut self, action: F) -> Self
    where
        F: Fn(&Tuple<'_>, &mut RuleContext) + Send + Sync + 'static,
    {
        self.action = Arc::new(action);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub(crate) fn matches(&self, tuple: &Tuple<'_>) -> bool {
        (self.condition)(tuple)
    }

    pub(crate) fn fire(&self, tuple: &Tuple<'_>, ctx: &mut RuleContext) {
        (self.action)(tuple, ctx)
    }
}

/// An ordered set of rules with unique names.
#[derive(Debug, Clone, Default)]
pub struct RuleProgram {
    rules: Vec<Rule>,
}

impl RuleProgram {
    pub fn new(rules: Vec<Rule>) -> Self {
        let mut program = Self::default();
        for rule in rules {
            program.add(rule);
        }
        program
    }

    /// Add a rule, replacing any earlier rule of the same name in place.
    pub fn add(&mut self, rule: Rule) {
        match self.rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.name.clone()).collect()
    }
}
