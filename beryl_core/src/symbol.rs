//! Interned symbols.
//!
//! Method names, variable names and constant names are interned once and
//! referred to by a small integer id everywhere else. Lookups on the hot
//! dispatch path therefore compare a `u32` instead of hashing a string.

use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// An interned name.
///
/// Symbols are only meaningful relative to the [`SymbolTable`] that
/// produced them; two tables may assign the same id to different names.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(pub u32);

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

/// Bidirectional name <-> id map.
///
/// Uses FxHashMap for the name lookup (small string keys, hot path) and a
/// dense `Vec` for the reverse direction.
#[derive(Debug, Default)]
pub struct SymbolTable {
    names: Vec<Arc<str>>,
    ids: FxHashMap<Arc<str>, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            ids: FxHashMap::default(),
        }
    }

    /// Intern a name, returning its stable id.
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(&sym) = self.ids.get(name) {
            return sym;
        }
        let arc: Arc<str> = Arc::from(name);
        let sym = Symbol(self.names.len() as u32);
        self.names.push(arc.clone());
        self.ids.insert(arc, sym);
        sym
    }

    /// The name behind an id, if the id came from this table.
    pub fn name(&self, sym: Symbol) -> Option<&str> {
        self.names.get(sym.0 as usize).map(|s| &**s)
    }

    /// Number of interned names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let mut t = SymbolTable::new();
        let a = t.intern("foo");
        let b = t.intern("bar");
        let c = t.intern("foo");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(t.name(a), Some("foo"));
        assert_eq!(t.name(b), Some("bar"));
    }

    #[test]
    fn test_unknown_id() {
        let t = SymbolTable::new();
        assert_eq!(t.name(Symbol(3)), None);
    }
}
