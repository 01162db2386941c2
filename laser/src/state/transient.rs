// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::smt::{bv, const_array, Term};

/// EIP-1153 transient storage, shared by every account on a path and keyed
/// by `concat(address, slot)` (512 bits). Writes are journaled in order;
/// a read folds the journal into a store chain over the all-zero array and
/// selects from it, so the solver sees exactly the writes of the current
/// transaction. The journal is cleared at every top-level transaction
/// boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransientStorage {
    journal: Vec<JournalEntry>,
}

#[derive(Debug, Clone, PartialEq)]
struct JournalEntry {
    key: Term,
    value: Term,
}

impl TransientStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(address: &Term, index: &Term) -> Term {
        address.concat(index)
    }

    /// The value at `(address, index)`: zero unless written this
    /// transaction.
    pub fn get(&self, address: &Term, index: &Term) -> Term {
        let key = Self::key(address, index);
        let mut array = const_array(512, bv(0, 256));
        for entry in &self.journal {
            array = array.store(&entry.key, &entry.value);
        }
        array.select(&key)
    }

    /// Journals a write.
    pub fn set(&mut self, address: &Term, index: &Term, value: Term) {
        let key = Self::key(address, index).simplify();
        self.journal.push(JournalEntry { key, value });
    }

    /// Drops the journal. Called before every top-level transaction.
    pub fn clear(&mut self) {
        self.journal.clear();
    }

    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smt::bv_sym;

    fn addr() -> Term {
        bv(0xaa, 256)
    }

    #[test]
    fn reads_default_to_zero() {
        let ts = TransientStorage::new();
        assert_eq!(ts.get(&addr(), &bv(1, 256)), bv(0, 256));
    }

    #[test]
    fn last_write_wins() {
        let mut ts = TransientStorage::new();
        ts.set(&addr(), &bv(1, 256), bv(10, 256));
        ts.set(&addr(), &bv(1, 256), bv(20, 256));
        assert_eq!(ts.get(&addr(), &bv(1, 256)), bv(20, 256));
    }

    #[test]
    fn keys_are_scoped_by_address() {
        let mut ts = TransientStorage::new();
        ts.set(&bv(0xaa, 256), &bv(1, 256), bv(10, 256));
        assert_eq!(ts.get(&bv(0xbb, 256), &bv(1, 256)), bv(0, 256));
    }

    #[test]
    fn clear_resets_every_key() {
        let mut ts = TransientStorage::new();
        ts.set(&addr(), &bv(1, 256), bv(10, 256));
        ts.clear();
        assert_eq!(ts.get(&addr(), &bv(1, 256)), bv(0, 256));
        assert_eq!(ts.journal_len(), 0);
    }

    #[test]
    fn symbolic_slots_stay_symbolic() {
        let mut ts = TransientStorage::new();
        let slot = bv_sym("slot", 256);
        ts.set(&addr(), &slot, bv(1, 256));
        assert_eq!(ts.get(&addr(), &slot), bv(1, 256));
        assert!(!ts.get(&addr(), &bv(9, 256)).is_concrete());
    }
}
