//! Interned string table.
//!
//! Spec §3 "String table" / §4.1: a bidirectional map between small
//! non-negative integer ids and the bytes they name. `intern` is total (it
//! inserts on first sight); `id_of` is lookup-only and returns `-1` (the
//! reserved sentinel) when the string was never interned. Ids are dense,
//! start at 0, and are stable for the context's lifetime — the table is
//! append-only.
//!
//! Uses `indexmap::IndexSet` over `std::collections` for this hot lookup
//! table — it gives dense, insertion-ordered ids "for free" instead of
//! hand-rolling a `Vec` + side `HashMap`.

use indexmap::IndexSet;

/// Sentinel returned by [`StringTable::id_of`] for an unknown string.
pub const NOT_FOUND: i32 = -1;

#[derive(Debug, Default, Clone)]
pub struct StringTable {
    strings: IndexSet<Box<str>>,
}

impl StringTable {
    pub fn new() -> Self {
        StringTable { strings: IndexSet::new() }
    }

    /// Interns `s`, returning its stable id. Re-interning the same bytes
    /// always returns the same id.
    pub fn intern(&mut self, s: &str) -> i32 {
        if let Some(idx) = self.strings.get_index_of(s) {
            return idx as i32;
        }
        let (idx, _) = self.strings.insert_full(s.into());
        idx as i32
    }

    /// Looks up `s` without inserting it. Returns [`NOT_FOUND`] if absent.
    pub fn id_of(&self, s: &str) -> i32 {
        self.strings.get_index_of(s).map(|i| i as i32).unwrap_or(NOT_FOUND)
    }

    /// Resolves an id back to its bytes. Ids returned by `intern` are
    /// always valid here; out-of-range ids (including [`NOT_FOUND`]) yield
    /// `None`.
    pub fn get(&self, id: i32) -> Option<&str> {
        if id < 0 {
            return None;
        }
        self.strings.get_index(id as usize).map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent_and_dense() {
        let mut tab = StringTable::new();
        let a = tab.intern("waittill");
        let b = tab.intern("endon");
        let a2 = tab.intern("waittill");
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(a, a2);
        assert_eq!(tab.get(a), Some("waittill"));
        assert_eq!(tab.get(b), Some("endon"));
    }

    #[test]
    fn id_of_is_lookup_only() {
        let mut tab = StringTable::new();
        assert_eq!(tab.id_of("missing"), NOT_FOUND);
        let id = tab.intern("present");
        assert_eq!(tab.id_of("present"), id);
        assert_eq!(tab.id_of("still-missing"), NOT_FOUND);
    }

    #[test]
    fn out_of_range_lookup_is_none() {
        let tab = StringTable::new();
        assert_eq!(tab.get(NOT_FOUND), None);
        assert_eq!(tab.get(999), None);
    }
}
