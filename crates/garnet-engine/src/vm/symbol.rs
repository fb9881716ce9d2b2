//! Symbol interning for selectors and constant names
//!
//! Selectors, constant names and throw tags are compared constantly during
//! lookup, so they are interned once and referred to by small integer symbols.

use rustc_hash::FxHashMap;
use std::fmt;
use std::num::NonZeroU32;

/// An interned name (32-bit index).
///
/// Symbols are small and can be copied cheaply.
/// Use `SymbolTable::resolve()` to get the actual string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(NonZeroU32);

impl Symbol {
    #[inline]
    fn from_raw(raw: u32) -> Self {
        Symbol(NonZeroU32::MIN.saturating_add(raw))
    }

    #[inline]
    fn to_raw(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":#{}", self.to_raw())
    }
}

/// Symbol table that deduplicates names
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    /// Map from string to symbol
    map: FxHashMap<String, Symbol>,
    /// Interned strings, indexed by symbol
    strings: Vec<String>,
}

impl SymbolTable {
    /// Create a new empty symbol table
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a name, returning its symbol.
    ///
    /// If the name was already interned, returns the existing symbol.
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(&sym) = self.map.get(name) {
            return sym;
        }

        let sym = Symbol::from_raw(self.strings.len() as u32);
        self.strings.push(name.to_string());
        self.map.insert(name.to_string(), sym);
        sym
    }

    /// Look up a name without interning it
    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.map.get(name).copied()
    }

    /// Resolve a symbol back to its name
    pub fn resolve(&self, sym: Symbol) -> &str {
        self.strings
            .get(sym.to_raw())
            .map(String::as_str)
            .unwrap_or("<unknown symbol>")
    }

    /// Number of interned symbols
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Whether no symbol has been interned
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_dedup() {
        let mut table = SymbolTable::new();
        let a = table.intern("speak");
        let b = table.intern("speak");
        let c = table.intern("call");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_resolve() {
        let mut table = SymbolTable::new();
        let sym = table.intern("const_missing");
        assert_eq!(table.resolve(sym), "const_missing");
        assert_eq!(table.lookup("const_missing"), Some(sym));
        assert_eq!(table.lookup("nope"), None);
    }
}
