// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use laser_shared::disasm::Instruction;

use crate::error::{ExecutionError, Result};
use crate::state::annotation::StateAnnotation;
use crate::state::environment::Environment;
use crate::state::machine_state::MachineState;
use crate::state::world_state::WorldState;

/// Where a sub-call's return data lands in the caller, and what must be
/// restored if it reverts.
#[derive(Debug, Clone)]
pub struct ReturnContext {
    pub out_offset: usize,
    pub out_size: usize,
    /// World state as of the call, restored on revert.
    pub world_snapshot: WorldState,
    /// CREATE/CREATE2 frame: on success the returned bytes become the new
    /// account's runtime code and this address is pushed on the caller's
    /// stack.
    pub create_address: Option<laser_shared::address::Address>,
}

/// One call frame: machine state plus its environment. The return context
/// is present on every frame but the transaction entry frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub env: Environment,
    pub mstate: MachineState,
    pub return_ctx: Option<ReturnContext>,
}

/// The complete snapshot one executing path carries: a world state, a
/// non-empty stack of call frames, the CFG node currently being extended,
/// and the per-path annotation bag.
///
/// Forking is plain `clone()`: the result shares no mutable substructure
/// with the original, so writes on one fork are invisible to the other.
pub struct GlobalState {
    pub world_state: WorldState,
    frames: Vec<Frame>,
    /// Id of the CFG node this state is currently extending.
    pub node_id: usize,
    /// Instructions executed on this path so far, compared against the
    /// depth bound by the scheduler.
    pub instruction_count: usize,
    annotations: Vec<Box<dyn StateAnnotation>>,
}

impl Clone for GlobalState {
    fn clone(&self) -> Self {
        GlobalState {
            world_state: self.world_state.clone(),
            frames: self.frames.clone(),
            node_id: self.node_id,
            instruction_count: self.instruction_count,
            annotations: self.annotations.iter().map(|a| a.clone_on_fork()).collect(),
        }
    }
}

impl std::fmt::Debug for GlobalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalState")
            .field("account", &self.frame().env.active_account)
            .field("pc", &self.frame().mstate.pc)
            .field("depth", &self.frames.len())
            .field("constraints", &self.world_state.constraints.len())
            .finish()
    }
}

impl GlobalState {
    pub fn new(world_state: WorldState, entry: Frame) -> Self {
        GlobalState {
            world_state,
            frames: vec![entry],
            node_id: 0,
            instruction_count: 0,
            annotations: Vec::new(),
        }
    }

    /// The active call frame.
    pub fn frame(&self) -> &Frame {
        self.frames.last().expect("frame stack is never empty")
    }

    pub fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("frame stack is never empty")
    }

    pub fn env(&self) -> &Environment {
        &self.frame().env
    }

    pub fn mstate(&self) -> &MachineState {
        &self.frame().mstate
    }

    pub fn mstate_mut(&mut self) -> &mut MachineState {
        &mut self.frame_mut().mstate
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Pops the active frame. Errors if this would empty the stack; the
    /// executor detects transaction completion *before* popping the last
    /// frame.
    pub fn pop_frame(&mut self) -> Result<Frame> {
        if self.frames.len() <= 1 {
            return Err(ExecutionError::Fatal(anyhow::anyhow!(
                "popped the transaction entry frame"
            )));
        }
        Ok(self.frames.pop().expect("length checked"))
    }

    pub fn is_entry_frame(&self) -> bool {
        self.frames.len() == 1
    }

    /// The instruction the active frame's pc points at, or `None` when the
    /// pc ran off the end of the code (implicit STOP).
    pub fn current_instruction(&self) -> Option<&Instruction> {
        let frame = self.frame();
        frame.env.code.get(frame.mstate.pc)
    }

    // -- annotations ---------------------------------------------------------

    pub fn annotate<A: StateAnnotation>(&mut self, annotation: A) {
        self.annotations.push(Box::new(annotation));
    }

    pub fn get_annotation<A: StateAnnotation>(&self) -> Option<&A> {
        self.annotations
            .iter()
            .find_map(|a| a.as_any().downcast_ref::<A>())
    }

    pub fn get_annotation_mut<A: StateAnnotation>(&mut self) -> Option<&mut A> {
        self.annotations
            .iter_mut()
            .find_map(|a| a.as_any_mut().downcast_mut::<A>())
    }

    /// Fetches the annotation of type `A`, inserting a default first if the
    /// path does not carry one yet.
    pub fn annotation_or_default<A: StateAnnotation + Default>(&mut self) -> &mut A {
        if self.get_annotation::<A>().is_none() {
            self.annotate(A::default());
        }
        self.get_annotation_mut::<A>().expect("just inserted")
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use laser_shared::address::Address;
    use laser_shared::disasm::Disassembly;

    use super::*;
    use crate::smt::{bv, bv_sym};
    use crate::state::calldata::Calldata;

    fn entry_frame() -> Frame {
        let env = Environment::new(
            Address::from(0xaa),
            Rc::new(Disassembly::default()),
            bv_sym("caller", 256),
            bv_sym("origin", 256),
            bv(0, 256),
            bv_sym("gasprice", 256),
            Calldata::concrete(vec![]),
        );
        Frame {
            env,
            mstate: MachineState::new(0, 1_000_000),
            return_ctx: None,
        }
    }

    #[derive(Default)]
    struct Marker {
        hits: Vec<usize>,
    }

    impl StateAnnotation for Marker {
        fn clone_on_fork(&self) -> Box<dyn StateAnnotation> {
            Box::new(Marker {
                hits: self.hits.clone(),
            })
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    #[test]
    fn fork_copies_annotations_independently() {
        let mut state = GlobalState::new(WorldState::new(), entry_frame());
        state.annotation_or_default::<Marker>().hits.push(1);
        let mut fork = state.clone();
        fork.annotation_or_default::<Marker>().hits.push(2);
        assert_eq!(state.get_annotation::<Marker>().unwrap().hits, vec![1]);
        assert_eq!(fork.get_annotation::<Marker>().unwrap().hits, vec![1, 2]);
    }

    #[test]
    fn fork_purity_across_stack_and_world() {
        let mut state = GlobalState::new(WorldState::new(), entry_frame());
        state.mstate_mut().push(bv(1, 256)).unwrap();
        let mut fork = state.clone();
        fork.mstate_mut().push(bv(2, 256)).unwrap();
        fork.world_state.constraints.push(bv_sym("x", 256).eq_term(&bv(1, 256)));
        assert_eq!(state.mstate().stack_len(), 1);
        assert_eq!(fork.mstate().stack_len(), 2);
        assert!(state.world_state.constraints.is_empty());
    }

    #[test]
    fn entry_frame_cannot_be_popped() {
        let mut state = GlobalState::new(WorldState::new(), entry_frame());
        assert!(state.pop_frame().is_err());
        assert!(state.is_entry_frame());
    }
}
