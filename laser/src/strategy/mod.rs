// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The worklist: pluggable scheduling of not-yet-explored states. A strategy
//! owns the live states and answers one question, "what next?". Exploration
//! order is deterministic for a given strategy and input.

use std::collections::VecDeque;

use crate::smt::{SatResult, Solver};
use crate::state::GlobalState;

/// Strategy selection, from the analysis configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    #[default]
    DepthFirst,
    BreadthFirst,
    /// Defer solver checks: states wait in a pending tier and are promoted
    /// to the ready tier only once their constraints prove satisfiable.
    DelayConstraint,
}

/// The scheduler contract: append produced states, pick the next one. The
/// solver handle is passed in because some strategies gate promotion on
/// satisfiability.
pub trait SearchStrategy {
    fn append(&mut self, state: GlobalState);

    fn pick_next(&mut self, solver: &mut Solver) -> Option<GlobalState>;

    /// Live states still owned by the strategy.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards all owned states (deadline drain).
    fn clear(&mut self);
}

pub fn build(kind: StrategyKind) -> Box<dyn SearchStrategy> {
    match kind {
        StrategyKind::DepthFirst => Box::new(DepthFirst::default()),
        StrategyKind::BreadthFirst => Box::new(BreadthFirst::default()),
        StrategyKind::DelayConstraint => Box::new(DelayConstraint::default()),
    }
}

/// LIFO exploration; the default.
#[derive(Default)]
pub struct DepthFirst {
    work_list: Vec<GlobalState>,
}

impl SearchStrategy for DepthFirst {
    fn append(&mut self, state: GlobalState) {
        self.work_list.push(state);
    }

    fn pick_next(&mut self, _solver: &mut Solver) -> Option<GlobalState> {
        self.work_list.pop()
    }

    fn len(&self) -> usize {
        self.work_list.len()
    }

    fn clear(&mut self) {
        self.work_list.clear();
    }
}

/// FIFO exploration.
#[derive(Default)]
pub struct BreadthFirst {
    work_list: VecDeque<GlobalState>,
}

impl SearchStrategy for BreadthFirst {
    fn append(&mut self, state: GlobalState) {
        self.work_list.push_back(state);
    }

    fn pick_next(&mut self, _solver: &mut Solver) -> Option<GlobalState> {
        self.work_list.pop_front()
    }

    fn len(&self) -> usize {
        self.work_list.len()
    }

    fn clear(&mut self) {
        self.work_list.clear();
    }
}

/// Two-tier scheduling that delays constraint solving: freshly produced
/// states queue as *pending*; a state is promoted to *ready* only when its
/// path condition is satisfiable (solver-shown, or already answered by the
/// gateway's model cache). Provably dead states never reach the executor;
/// undecided states are kept, since dropping them would silently lose
/// coverage.
#[derive(Default)]
pub struct DelayConstraint {
    ready: VecDeque<GlobalState>,
    pending: VecDeque<GlobalState>,
}

impl SearchStrategy for DelayConstraint {
    fn append(&mut self, state: GlobalState) {
        self.pending.push_back(state);
    }

    fn pick_next(&mut self, solver: &mut Solver) -> Option<GlobalState> {
        while self.ready.is_empty() {
            let state = self.pending.pop_front()?;
            match solver.check(&state.world_state.constraints) {
                SatResult::Sat(_) | SatResult::Unknown => self.ready.push_back(state),
                SatResult::Unsat => {
                    log::trace!("delay-constraint: dropped unsatisfiable state");
                }
            }
        }
        self.ready.pop_front()
    }

    fn len(&self) -> usize {
        self.ready.len() + self.pending.len()
    }

    fn clear(&mut self) {
        self.ready.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use laser_shared::address::Address;
    use laser_shared::disasm::Disassembly;

    use super::*;
    use crate::machine::AnalysisConfig;
    use crate::smt::backend::SubstitutionSolver;
    use crate::smt::{bv, bv_sym};
    use crate::state::{Calldata, Environment, Frame, GlobalState, MachineState, WorldState};

    fn state(marker: u64) -> GlobalState {
        let env = Environment::new(
            Address::from(0xaa),
            Rc::new(Disassembly::default()),
            bv_sym("caller", 256),
            bv_sym("origin", 256),
            bv(0, 256),
            bv_sym("gasprice", 256),
            Calldata::concrete(vec![]),
        );
        let mut frame = Frame {
            env,
            mstate: MachineState::new(0, 1_000_000),
            return_ctx: None,
        };
        frame.mstate.push(bv(marker, 256)).unwrap();
        GlobalState::new(WorldState::new(), frame)
    }

    fn marker(state: &GlobalState) -> u64 {
        state.mstate().peek(0).unwrap().as_u64().unwrap()
    }

    fn solver() -> Solver {
        Solver::new(
            Box::new(SubstitutionSolver::default()),
            AnalysisConfig::default().solver_config(),
        )
    }

    #[test]
    fn depth_first_is_lifo() {
        let mut s = DepthFirst::default();
        let mut solver = solver();
        s.append(state(1));
        s.append(state(2));
        assert_eq!(marker(&s.pick_next(&mut solver).unwrap()), 2);
        assert_eq!(marker(&s.pick_next(&mut solver).unwrap()), 1);
        assert!(s.pick_next(&mut solver).is_none());
    }

    #[test]
    fn breadth_first_is_fifo() {
        let mut s = BreadthFirst::default();
        let mut solver = solver();
        s.append(state(1));
        s.append(state(2));
        assert_eq!(marker(&s.pick_next(&mut solver).unwrap()), 1);
        assert_eq!(marker(&s.pick_next(&mut solver).unwrap()), 2);
    }

    #[test]
    fn delay_constraint_drops_dead_states() {
        let mut s = DelayConstraint::default();
        let mut solver = solver();
        let live = state(1);
        let mut dead = state(2);
        dead.world_state
            .constraints
            .push(bv(1, 8).eq_term(&bv_sym("x", 8)));
        dead.world_state
            .constraints
            .push(bv(2, 8).eq_term(&bv_sym("x", 8)));
        s.append(dead);
        s.append(live);
        assert_eq!(marker(&s.pick_next(&mut solver).unwrap()), 1);
        assert!(s.pick_next(&mut solver).is_none());
    }
}
