// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The solver gateway. The external SMT solver is a capability behind the
//! [`SolverBackend`] trait; the gateway layers per-query timeouts, verdict
//! statistics, a model-reuse cache and the variable-independence optimiser on
//! top of whatever backend the embedder supplies.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::smt::constraints::Constraints;
use crate::smt::{Sort, Term};

/// A satisfying assignment: free symbol name → concrete term.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    assignments: HashMap<String, Term>,
}

impl Model {
    pub fn new(assignments: HashMap<String, Term>) -> Self {
        Model { assignments }
    }

    pub fn get(&self, name: &str) -> Option<&Term> {
        self.assignments.get(name)
    }

    /// Evaluates `term` under this model. Unassigned bit-vector symbols
    /// complete to zero and booleans to `false`, so the result is always a
    /// concrete term unless the term contains unreduced array reads.
    pub fn eval(&self, term: &Term) -> Option<Term> {
        let mut symbols = BTreeSet::new();
        term.collect_symbols(&mut symbols);
        let mut bindings = self.assignments.clone();
        for name in symbols {
            if bindings.contains_key(&name) {
                continue;
            }
            if let Some(default) = default_for_symbol(term, &name) {
                bindings.insert(name, default);
            }
        }
        let out = term.substitute(&bindings);
        out.is_concrete().then_some(out)
    }

    /// Whether every given constraint evaluates to `true` under this model.
    pub fn satisfies(&self, constraints: &[Term]) -> bool {
        constraints
            .iter()
            .all(|c| self.eval(c).and_then(|t| t.as_bool()) == Some(true))
    }

    /// Merges another model in; the union of models over variable-disjoint
    /// partitions is a model of the whole conjunction.
    pub fn absorb(&mut self, other: Model) {
        self.assignments.extend(other.assignments);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Term)> {
        self.assignments.iter()
    }
}

/// Finds the sort of symbol `name` inside `term` and produces its zero
/// default. Arrays have no zero default (a read from an unconstrained array
/// stays symbolic).
fn default_for_symbol(term: &Term, name: &str) -> Option<Term> {
    fn find_sort(term: &Term, name: &str) -> Option<Sort> {
        match term.node() {
            crate::smt::TermNode::Symbol(n) if n.as_ref() == name => Some(term.sort()),
            crate::smt::TermNode::ConstArray(d) => find_sort(d, name),
            crate::smt::TermNode::App(_, args) => args.iter().find_map(|a| find_sort(a, name)),
            _ => None,
        }
    }
    match find_sort(term, name)? {
        Sort::BitVec(w) => Some(crate::smt::bv(0, w)),
        Sort::Bool => Some(crate::smt::bool_val(false)),
        Sort::Array { .. } => None,
    }
}

/// Verdict of one satisfiability query.
#[derive(Debug, Clone, PartialEq)]
pub enum SatResult {
    Sat(Model),
    Unsat,
    /// Timeout or an incomplete backend; the engine's policy decides whether
    /// this counts as reachable.
    Unknown,
}

impl SatResult {
    pub fn is_sat(&self) -> bool {
        matches!(self, SatResult::Sat(_))
    }
}

/// The external SMT solver capability. One synchronous operation; the
/// timeout is per query. Implementations must honour the term layer's EVM
/// division-by-zero semantics.
pub trait SolverBackend {
    fn check(&mut self, constraints: &[Term], timeout: Duration) -> SatResult;
}

/// Counters for solver traffic, reported with the analysis results.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolverStatistics {
    pub queries: u64,
    pub sat: u64,
    pub unsat: u64,
    pub unknown: u64,
    pub cache_hits: u64,
}

/// Reuses models from previously solved queries: a cached model that
/// evaluates the new conjunction to `true` answers SAT without a solver
/// round-trip.
#[derive(Default)]
struct ModelCache {
    models: Vec<Model>,
}

/// Bound on retained models; older entries age out first.
const MODEL_CACHE_SIZE: usize = 32;

impl ModelCache {
    fn lookup(&mut self, constraints: &[Term]) -> Option<Model> {
        let hit = self.models.iter().position(|m| m.satisfies(constraints))?;
        // Move-to-front so hot models stay cached.
        let model = self.models.remove(hit);
        self.models.insert(0, model.clone());
        Some(model)
    }

    fn put(&mut self, model: Model) {
        if self.models.contains(&model) {
            return;
        }
        self.models.insert(0, model);
        self.models.truncate(MODEL_CACHE_SIZE);
    }
}

/// Solver gateway configuration, copied out of the engine's analysis config.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    pub timeout: Duration,
    /// Hint forwarded to backends that can solve partitions in parallel.
    pub parallel_solving: bool,
    /// Disables the variable-independence partitioning optimisation.
    pub disable_dependency_pruning: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            timeout: Duration::from_millis(10_000),
            parallel_solving: false,
            disable_dependency_pruning: false,
        }
    }
}

/// The gateway owned by the engine context. All satisfiability questions go
/// through here; verdict caching keyed by constraint fingerprint plus model
/// reuse keep sibling states from re-solving identical subgoals.
pub struct Solver {
    backend: Box<dyn SolverBackend>,
    config: SolverConfig,
    model_cache: ModelCache,
    verdicts: HashMap<u64, bool>,
    pub stats: SolverStatistics,
}

impl Solver {
    pub fn new(backend: Box<dyn SolverBackend>, config: SolverConfig) -> Self {
        Solver {
            backend,
            config,
            model_cache: ModelCache::default(),
            verdicts: HashMap::new(),
            stats: SolverStatistics::default(),
        }
    }

    /// Checks a constraint set, returning a model on SAT.
    pub fn check(&mut self, constraints: &Constraints) -> SatResult {
        self.check_terms(constraints.as_slice(), constraints.fingerprint())
    }

    /// Checks a constraint set extended with extra terms (the common
    /// detector query shape).
    pub fn check_with(&mut self, constraints: &Constraints, extra: &[Term]) -> SatResult {
        let extended = constraints.with(extra);
        self.check_terms(extended.as_slice(), extended.fingerprint())
    }

    fn check_terms(&mut self, terms: &[Term], fingerprint: u64) -> SatResult {
        self.stats.queries += 1;

        if terms.iter().any(|t| t.as_bool() == Some(false)) {
            self.stats.unsat += 1;
            return SatResult::Unsat;
        }
        if let Some(&verdict) = self.verdicts.get(&fingerprint) {
            if !verdict {
                self.stats.cache_hits += 1;
                self.stats.unsat += 1;
                return SatResult::Unsat;
            }
            // A cached SAT verdict still needs a model; fall through to the
            // model cache.
        }
        if let Some(model) = self.model_cache.lookup(terms) {
            self.stats.cache_hits += 1;
            self.stats.sat += 1;
            self.verdicts.insert(fingerprint, true);
            return SatResult::Sat(model);
        }

        let result = if self.config.disable_dependency_pruning {
            self.backend.check(terms, self.config.timeout)
        } else {
            self.check_partitioned(terms)
        };

        match &result {
            SatResult::Sat(model) => {
                self.stats.sat += 1;
                self.verdicts.insert(fingerprint, true);
                self.model_cache.put(model.clone());
            }
            SatResult::Unsat => {
                self.stats.unsat += 1;
                self.verdicts.insert(fingerprint, false);
            }
            SatResult::Unknown => {
                self.stats.unknown += 1;
            }
        }
        result
    }

    /// Splits the conjunction into variable-disjoint partitions and solves
    /// each independently. Sound because satisfiability distributes over
    /// conjunctions with disjoint symbol support.
    fn check_partitioned(&mut self, terms: &[Term]) -> SatResult {
        let partitions = partition_by_symbols(terms);
        if partitions.len() <= 1 {
            return self.backend.check(terms, self.config.timeout);
        }
        log::trace!("independence split: {} partitions", partitions.len());
        let mut combined = Model::default();
        for part in partitions {
            match self.backend.check(&part, self.config.timeout) {
                SatResult::Sat(model) => combined.absorb(model),
                SatResult::Unsat => return SatResult::Unsat,
                SatResult::Unknown => return SatResult::Unknown,
            }
        }
        SatResult::Sat(combined)
    }
}

/// Groups constraints into partitions with pairwise-disjoint symbol sets
/// (union-find over the symbol occurrence relation). Ground constraints
/// travel with the first partition.
fn partition_by_symbols(terms: &[Term]) -> Vec<Vec<Term>> {
    let mut symbol_sets: Vec<BTreeSet<String>> = Vec::with_capacity(terms.len());
    for t in terms {
        let mut set = BTreeSet::new();
        t.collect_symbols(&mut set);
        symbol_sets.push(set);
    }

    let mut parent: Vec<usize> = (0..terms.len()).collect();
    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        if parent[i] != i {
            let root = find(parent, parent[i]);
            parent[i] = root;
        }
        parent[i]
    }
    let mut owner: HashMap<String, usize> = HashMap::new();
    for (i, set) in symbol_sets.iter().enumerate() {
        for sym in set {
            match owner.get(sym) {
                Some(&j) => {
                    let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                    parent[ri] = rj;
                }
                None => {
                    owner.insert(sym.clone(), i);
                }
            }
        }
    }

    let mut groups: HashMap<usize, Vec<Term>> = HashMap::new();
    let mut order: Vec<usize> = Vec::new();
    for (i, t) in terms.iter().enumerate() {
        let root = find(&mut parent, i);
        if !groups.contains_key(&root) {
            order.push(root);
        }
        groups.entry(root).or_default().push(t.clone());
    }
    order.into_iter().map(|r| groups.remove(&r).unwrap()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smt::backend::SubstitutionSolver;
    use crate::smt::{bv, bv_sym};

    fn solver() -> Solver {
        Solver::new(Box::new(SubstitutionSolver::default()), SolverConfig::default())
    }

    #[test]
    fn model_reuse_across_siblings() {
        let mut s = solver();
        let x = bv_sym("x", 256);
        let mut c = Constraints::new();
        c.push(x.eq_term(&bv(5, 256)));
        assert!(s.check(&c).is_sat());
        let first_queries = s.stats.cache_hits;
        // A second, identical sibling query hits the cache.
        assert!(s.check(&c.clone()).is_sat());
        assert!(s.stats.cache_hits > first_queries);
    }

    #[test]
    fn independence_partitioning_merges_models() {
        let mut s = solver();
        let x = bv_sym("x", 256);
        let y = bv_sym("y", 256);
        let mut c = Constraints::new();
        c.push(x.eq_term(&bv(1, 256)));
        c.push(y.eq_term(&bv(2, 256)));
        match s.check(&c) {
            SatResult::Sat(model) => {
                assert_eq!(model.get("x"), Some(&bv(1, 256)));
                assert_eq!(model.get("y"), Some(&bv(2, 256)));
            }
            other => panic!("expected sat, got {:?}", other),
        }
    }

    #[test]
    fn contradictory_bindings_are_unsat() {
        let mut s = solver();
        let mut c = Constraints::new();
        c.push(bv(1, 8).eq_term(&bv(1, 8)));
        // push() drops tautologies; force a contradiction in.
        c.push(bv_sym("z", 8).eq_term(&bv(1, 8)));
        c.push(bv_sym("z", 8).eq_term(&bv(2, 8)));
        assert_eq!(s.check(&c), SatResult::Unsat);
    }
}
