// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! A built-in decision procedure of last resort. `SubstitutionSolver` is not
//! a complete SMT solver: it decides what unit propagation plus concrete
//! re-evaluation can decide and answers `Unknown` for the rest. It serves as
//! a cheap pre-filter in front of a real backend and as the reference
//! backend for the test suite, where path conditions are constructed to be
//! propagation-decidable.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::smt::solver::{Model, SatResult, SolverBackend};
use crate::smt::{bool_val, Op, Sort, Term, TermNode};

#[derive(Default)]
pub struct SubstitutionSolver;

/// Rounds of propagation before giving up; each round substitutes every
/// binding discovered so far.
const MAX_ROUNDS: usize = 8;

impl SolverBackend for SubstitutionSolver {
    fn check(&mut self, constraints: &[Term], _timeout: Duration) -> SatResult {
        let mut bindings: HashMap<String, Term> = HashMap::new();
        let mut residual: Vec<Term> = constraints.to_vec();

        for _ in 0..MAX_ROUNDS {
            let mut progressed = false;
            let mut next = Vec::with_capacity(residual.len());
            for t in &residual {
                let t = t.substitute(&bindings);
                match t.as_bool() {
                    Some(true) => {
                        progressed = true;
                        continue;
                    }
                    Some(false) => return SatResult::Unsat,
                    None => {}
                }
                if let Some((name, value)) = unit_binding(&t) {
                    match bindings.get(&name) {
                        Some(existing) if existing != &value => return SatResult::Unsat,
                        Some(_) => {}
                        None => {
                            bindings.insert(name, value);
                            progressed = true;
                            continue;
                        }
                    }
                }
                next.push(t);
            }
            residual = next;
            if residual.is_empty() {
                return SatResult::Sat(Model::new(bindings));
            }
            if !progressed {
                break;
            }
        }

        // Last try: complete the candidate with zero defaults and re-check
        // the original conjunction by evaluation.
        let model = Model::new(bindings);
        if model.satisfies(constraints) {
            return SatResult::Sat(model);
        }
        SatResult::Unknown
    }
}

/// Recognises `sym == const` (either side), a bare boolean symbol, and its
/// negation.
fn unit_binding(t: &Term) -> Option<(String, Term)> {
    match t.node() {
        TermNode::Symbol(name) if t.sort() == Sort::Bool => {
            Some((name.to_string(), bool_val(true)))
        }
        TermNode::App(Op::BoolNot, args) => match args[0].node() {
            TermNode::Symbol(name) if args[0].sort() == Sort::Bool => {
                Some((name.to_string(), bool_val(false)))
            }
            _ => None,
        },
        TermNode::App(Op::Eq, args) => {
            let (a, b) = (&args[0], &args[1]);
            match (a.node(), b.is_concrete(), b.node(), a.is_concrete()) {
                (TermNode::Symbol(name), true, _, _) => Some((name.to_string(), b.clone())),
                (_, _, TermNode::Symbol(name), true) => Some((name.to_string(), a.clone())),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smt::{bv, bv_sym};

    fn check(constraints: &[Term]) -> SatResult {
        SubstitutionSolver.check(constraints, Duration::from_secs(1))
    }

    #[test]
    fn free_equality_is_sat_with_model() {
        let retval = bv_sym("retval", 256);
        match check(&[retval.eq_term(&bv(1, 256))]) {
            SatResult::Sat(model) => assert_eq!(model.get("retval"), Some(&bv(1, 256))),
            other => panic!("expected sat, got {:?}", other),
        }
    }

    #[test]
    fn propagation_chains() {
        let x = bv_sym("x", 256);
        let y = bv_sym("y", 256);
        // x == 3, y == x + 1  =>  y == 4
        let cs = [x.eq_term(&bv(3, 256)), y.eq_term(&x.add(&bv(1, 256)))];
        match check(&cs) {
            SatResult::Sat(model) => assert_eq!(model.get("y"), Some(&bv(4, 256))),
            other => panic!("expected sat, got {:?}", other),
        }
    }

    #[test]
    fn contradiction_is_unsat() {
        let x = bv_sym("x", 8);
        let cs = [x.eq_term(&bv(1, 8)), x.eq_term(&bv(2, 8))];
        assert_eq!(check(&cs), SatResult::Unsat);
    }

    #[test]
    fn zero_default_closes_disequalities() {
        let x = bv_sym("x", 8);
        // x < 10 is satisfied by the zero default.
        let cs = [x.ult(&bv(10, 8))];
        assert!(check(&cs).is_sat());
    }

    #[test]
    fn genuinely_hard_queries_are_unknown() {
        let x = bv_sym("x", 8);
        // x > 10 fails under the zero default and has no unit binding.
        let cs = [x.ugt(&bv(10, 8))];
        assert_eq!(check(&cs), SatResult::Unknown);
    }
}
