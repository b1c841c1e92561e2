//! Lattice store and stock lattice interpretations.
//!
//! A lattice predicate of arity `n` maps an `n - 1` key tuple to a single
//! value that only ever moves up its lattice. `join` reports whether the
//! stored value changed; that bit is what wakes dependent clauses, exactly
//! like fact-store novelty does for relations.

use crate::program::Interpretation;
use crate::symbol::Symbol;
use crate::value::Value;
use ahash::AHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Keyed lattice cells for every lattice predicate of a program.
#[derive(Debug, Default)]
pub struct LatticeStore {
    maps: BTreeMap<Symbol, AHashMap<Box<[Value]>, Value>>,
}

impl LatticeStore {
    /// Create a store with one empty map per lattice predicate.
    pub fn new(interpretations: &BTreeMap<Symbol, Interpretation>) -> Self {
        let maps = interpretations
            .iter()
            .filter(|(_, interp)| interp.is_lattice())
            .map(|(predicate, _)| (predicate.clone(), AHashMap::new()))
            .collect();
        LatticeStore { maps }
    }

    /// Join `value` into the cell at `key`; `true` iff the cell changed.
    pub fn join(
        &mut self,
        predicate: &Symbol,
        key: &[Value],
        value: Value,
        interp: &Interpretation,
    ) -> bool {
        let (bottom, leq, lub) = match interp {
            Interpretation::LatticeMap {
                bottom, leq, lub, ..
            } => (bottom, leq, lub),
            Interpretation::Relation { .. } => return false,
        };
        let map = match self.maps.get_mut(predicate) {
            Some(map) => map,
            None => return false,
        };
        match map.get_mut(key) {
            Some(current) => {
                let joined = lub(current, &value);
                if joined == *current || (leq(&joined, current) && leq(current, &joined)) {
                    return false;
                }
                *current = joined;
                true
            }
            None => {
                let joined = lub(bottom, &value);
                if joined == *bottom || (leq(&joined, bottom) && leq(bottom, &joined)) {
                    return false;
                }
                map.insert(key.to_vec().into_boxed_slice(), joined);
                true
            }
        }
    }

    /// The value stored at `key`, or the lattice's bottom.
    pub fn get(&self, predicate: &Symbol, key: &[Value], interp: &Interpretation) -> Value {
        let stored = self
            .maps
            .get(predicate)
            .and_then(|map| map.get(key))
            .cloned();
        match (stored, interp) {
            (Some(value), _) => value,
            (None, Interpretation::LatticeMap { bottom, .. }) => bottom.clone(),
            (None, Interpretation::Relation { .. }) => Value::Unit,
        }
    }

    /// Every populated cell of `predicate`, sorted by key.
    pub fn entries(&self, predicate: &Symbol) -> BTreeMap<Vec<Value>, Value> {
        self.maps
            .get(predicate)
            .map(|map| {
                map.iter()
                    .map(|(key, value)| (key.to_vec(), value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Iterate over the declared lattice predicates.
    pub fn predicates(&self) -> impl Iterator<Item = &Symbol> {
        self.maps.keys()
    }
}

/// Max-of-integers lattice; bottom is `Int64(i64::MIN)`.
pub fn int_max(arity: usize) -> Interpretation {
    Interpretation::lattice(
        arity,
        Value::Int64(i64::MIN),
        Arc::new(|a: &Value, b: &Value| a.as_int() <= b.as_int()),
        Arc::new(|a: &Value, b: &Value| {
            if a.as_int() >= b.as_int() {
                a.clone()
            } else {
                b.clone()
            }
        }),
    )
}

/// Min-of-integers lattice; bottom is `Int64(i64::MAX)`.
pub fn int_min(arity: usize) -> Interpretation {
    Interpretation::lattice(
        arity,
        Value::Int64(i64::MAX),
        Arc::new(|a: &Value, b: &Value| a.as_int() >= b.as_int()),
        Arc::new(|a: &Value, b: &Value| {
            if a.as_int() <= b.as_int() {
                a.clone()
            } else {
                b.clone()
            }
        }),
    )
}

/// Boolean or-lattice; bottom is `false`.
pub fn bool_or(arity: usize) -> Interpretation {
    Interpretation::lattice(
        arity,
        Value::Bool(false),
        Arc::new(|a: &Value, b: &Value| {
            !matches!(a, Value::Bool(true)) || matches!(b, Value::Bool(true))
        }),
        Arc::new(|a: &Value, b: &Value| {
            Value::Bool(matches!(a, Value::Bool(true)) || matches!(b, Value::Bool(true)))
        }),
    )
}

/// Flat lattice: `bottom` below every element, `top` above, distinct middle
/// elements incomparable. The usual shape for sign- and constant-propagation
/// domains.
pub fn flat(arity: usize, bottom: Value, top: Value) -> Interpretation {
    let leq: crate::program::LeqFn = {
        let bottom = bottom.clone();
        let top = top.clone();
        Arc::new(move |a: &Value, b: &Value| *a == bottom || *b == top || a == b)
    };
    let lub: crate::program::LubFn = {
        let bottom = bottom.clone();
        let top = top.clone();
        Arc::new(move |a: &Value, b: &Value| {
            if a == b || *b == bottom {
                a.clone()
            } else if *a == bottom {
                b.clone()
            } else {
                top.clone()
            }
        })
    };
    Interpretation::lattice(arity, bottom, leq, lub)
}
