//! Indexed storage for relational facts.
//!
//! Per predicate the store keeps the tuples in insertion order (so iteration
//! is deterministic), a hash set for the novelty check, and a prefix index
//! covering every prefix length. `insert` returning `true` is the signal
//! the whole fixed-point driver runs on.

use crate::program::Interpretation;
use crate::symbol::Symbol;
use crate::value::Value;
use ahash::{AHashMap, AHashSet};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A ground tuple, shared between the indexes.
pub type Tuple = Arc<[Value]>;

/// One relation: tuples plus indexes.
#[derive(Debug, Default)]
struct Relation {
    arity: usize,
    /// Insertion order, for deterministic full scans.
    tuples: Vec<Tuple>,
    /// Membership and novelty.
    seen: AHashSet<Tuple>,
    /// Tuples grouped under every prefix of length 1..=arity.
    by_prefix: AHashMap<Box<[Value]>, Vec<Tuple>>,
}

impl Relation {
    fn new(arity: usize) -> Self {
        Relation {
            arity,
            ..Relation::default()
        }
    }

    fn insert(&mut self, tuple: Tuple) -> bool {
        debug_assert_eq!(tuple.len(), self.arity);
        if !self.seen.insert(tuple.clone()) {
            return false;
        }
        for len in 1..=self.arity {
            self.by_prefix
                .entry(tuple[..len].to_vec().into_boxed_slice())
                .or_default()
                .push(tuple.clone());
        }
        self.tuples.push(tuple);
        true
    }

    fn lookup(&self, prefix: &[Value]) -> &[Tuple] {
        if prefix.is_empty() {
            return &self.tuples;
        }
        self.by_prefix
            .get(prefix)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Fact store over every relational predicate of a program.
#[derive(Debug, Default)]
pub struct FactStore {
    relations: BTreeMap<Symbol, Relation>,
}

impl FactStore {
    /// Create a store with one empty relation per relational predicate.
    pub fn new(interpretations: &BTreeMap<Symbol, Interpretation>) -> Self {
        let relations = interpretations
            .iter()
            .filter(|(_, interp)| !interp.is_lattice())
            .map(|(predicate, interp)| (predicate.clone(), Relation::new(interp.arity())))
            .collect();
        FactStore { relations }
    }

    /// Insert a tuple; `true` iff it was absent.
    pub fn insert(&mut self, predicate: &Symbol, tuple: Vec<Value>) -> bool {
        // Admission guarantees every head predicate has a relation.
        match self.relations.get_mut(predicate) {
            Some(relation) => relation.insert(Arc::from(tuple.into_boxed_slice())),
            None => false,
        }
    }

    /// Whether a tuple is present.
    pub fn contains(&self, predicate: &Symbol, tuple: &[Value]) -> bool {
        self.relations
            .get(predicate)
            .map(|relation| relation.seen.contains(tuple))
            .unwrap_or(false)
    }

    /// Every tuple of `predicate` whose leading positions equal `prefix`.
    pub fn lookup(&self, predicate: &Symbol, prefix: &[Value]) -> &[Tuple] {
        self.relations
            .get(predicate)
            .map(|relation| relation.lookup(prefix))
            .unwrap_or(&[])
    }

    /// All tuples of `predicate`, in insertion order.
    pub fn tuples(&self, predicate: &Symbol) -> &[Tuple] {
        self.lookup(predicate, &[])
    }

    /// Iterate over the declared relational predicates.
    pub fn predicates(&self) -> impl Iterator<Item = &Symbol> {
        self.relations.keys()
    }

    /// Total number of stored tuples.
    pub fn len(&self) -> usize {
        self.relations.values().map(|r| r.tuples.len()).sum()
    }

    /// Whether the store holds no tuples at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
