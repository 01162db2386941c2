// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::smt::{bool_val, Sort, Term};

/// The accumulated path condition: an ordered, logically conjunctive,
/// append-only collection of boolean terms. Snapshot-cloned on every fork;
/// any forward trajectory only ever appends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    terms: Vec<Term>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one boolean term to the conjunction.
    pub fn push(&mut self, term: Term) {
        assert_eq!(term.sort(), Sort::Bool, "constraints hold boolean terms");
        // Tautologies carry no information.
        if term.as_bool() == Some(true) {
            return;
        }
        self.terms.push(term);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Term> {
        self.terms.iter()
    }

    pub fn as_slice(&self) -> &[Term] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Cheap structural check: `false` only when some constraint folded to
    /// the constant `false`, i.e. the path is dead without consulting the
    /// solver.
    pub fn is_possible(&self) -> bool {
        self.terms.iter().all(|t| t.as_bool() != Some(false))
    }

    /// The whole conjunction as a single term.
    pub fn conjunction(&self) -> Term {
        self.terms
            .iter()
            .fold(bool_val(true), |acc, t| acc.and(t))
    }

    /// The conjunction extended with `extra` terms, without mutating the
    /// path. Detectors use this to pose "and additionally ..." queries.
    pub fn with(&self, extra: &[Term]) -> Constraints {
        let mut out = self.clone();
        for t in extra {
            out.push(t.clone());
        }
        out
    }

    /// A structural fingerprint of the conjunction, used as the model-cache
    /// key and in CFG node identity.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.terms.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smt::{bool_sym, bv, bv_sym};

    #[test]
    fn append_only_and_clone() {
        let mut c = Constraints::new();
        let x = bv_sym("x", 256);
        c.push(x.eq_term(&bv(1, 256)));
        let snapshot = c.clone();
        c.push(bool_sym("p"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(c.len(), 2);
        // The snapshot's terms are a prefix of the extended set.
        assert_eq!(c.as_slice()[..1], snapshot.as_slice()[..]);
    }

    #[test]
    fn true_terms_are_dropped() {
        let mut c = Constraints::new();
        c.push(bv(1, 8).eq_term(&bv(1, 8)));
        assert!(c.is_empty());
        assert!(c.is_possible());
    }

    #[test]
    fn folded_false_kills_the_path() {
        let mut c = Constraints::new();
        c.push(bv(1, 8).eq_term(&bv(2, 8)));
        assert!(!c.is_possible());
    }
}
