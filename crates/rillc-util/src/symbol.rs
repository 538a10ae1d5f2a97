//! Interned string identifiers.
//!
//! A [`Symbol`] is a 4-byte handle into a global string table, giving O(1)
//! comparison and hashing for identifiers that repeat thousands of times
//! across a compilation. Strings are leaked into the table and never removed;
//! the set of unique identifiers in a program is bounded, so this keeps the
//! handle a plain `u32` with no lifetime tracking.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::OnceLock;

/// An interned string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

impl Symbol {
    /// Intern a string, returning its symbol. Idempotent.
    pub fn intern(string: &str) -> Symbol {
        table().intern(string)
    }

    /// Look up the string for this symbol.
    pub fn as_str(self) -> &'static str {
        table().get(self)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct StringTable {
    inner: RwLock<TableInner>,
}

#[derive(Default)]
struct TableInner {
    lookup: FxHashMap<&'static str, u32>,
    strings: Vec<&'static str>,
}

impl StringTable {
    fn intern(&self, string: &str) -> Symbol {
        if let Some(&idx) = self.inner.read().lookup.get(string) {
            return Symbol(idx);
        }
        let mut inner = self.inner.write();
        // Re-check: another caller may have interned between the locks.
        if let Some(&idx) = inner.lookup.get(string) {
            return Symbol(idx);
        }
        let leaked: &'static str = Box::leak(string.to_owned().into_boxed_str());
        let idx = inner.strings.len() as u32;
        inner.strings.push(leaked);
        inner.lookup.insert(leaked, idx);
        Symbol(idx)
    }

    fn get(&self, sym: Symbol) -> &'static str {
        self.inner.read().strings[sym.0 as usize]
    }
}

fn table() -> &'static StringTable {
    static TABLE: OnceLock<StringTable> = OnceLock::new();
    TABLE.get_or_init(|| StringTable { inner: RwLock::new(TableInner::default()) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_string_same_symbol() {
        let a = Symbol::intern("loop_head");
        let b = Symbol::intern("loop_head");
        let c = Symbol::intern("loop_tail");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn round_trip() {
        let s = Symbol::intern("size_of");
        assert_eq!(s.as_str(), "size_of");
    }
}
