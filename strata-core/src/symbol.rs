//! Interned names for predicates and variables.
//!
//! Symbols compare and hash by content, so interning is purely an
//! allocation-sharing optimization. The interner is process-wide and
//! thread-safe: independent solver instances may intern concurrently.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

static INTERNER: Lazy<DashMap<String, Arc<str>>> = Lazy::new(DashMap::new);

/// An interned name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Intern a name, sharing storage with every other symbol of the same text.
    pub fn new(name: &str) -> Self {
        if let Some(interned) = INTERNER.get(name) {
            return Symbol(interned.clone());
        }
        let shared: Arc<str> = Arc::from(name);
        INTERNER.insert(name.to_string(), shared.clone());
        Symbol(shared)
    }

    /// The symbol's text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
