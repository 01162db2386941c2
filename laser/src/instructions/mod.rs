// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Opcode semantics over symbolic operands. Each opcode maps to a handler
//! `GlobalState → list of successors` through a static function table, so
//! the hot loop stays monomorphic. Handlers consume the state, mutate it and
//! return zero (halt), one (continuation) or more (fork / jump enumeration)
//! successors, each tagged with the kind of control transfer for CFG
//! recording.

use std::collections::HashMap;

use lazy_static::lazy_static;
use laser_shared::opcode::Opcode;

use crate::error::Result;
use crate::machine::AnalysisConfig;
use crate::smt::{bv, Solver, Term};
use crate::state::GlobalState;

mod arith;
mod bitwise;
mod call;
mod env;
mod flow;
mod memory_ops;
mod stack_ops;
mod storage_ops;

/// Deterministic fresh-symbol naming and the keccak interning table. Owned
/// by the executor and threaded through every handler, so identical runs
/// produce identical symbol names (and therefore identical issues).
#[derive(Default)]
pub struct Counters {
    next_symbol: u64,
    keccak: HashMap<Term, Term>,
}

impl Counters {
    pub fn fresh_name(&mut self, prefix: &str) -> String {
        let n = self.next_symbol;
        self.next_symbol += 1;
        format!("{}_{}", prefix, n)
    }

    pub fn fresh_bv(&mut self, prefix: &str, width: u32) -> Term {
        let name = self.fresh_name(prefix);
        crate::smt::bv_sym(&name, width)
    }

    /// The stand-in for `keccak256(input)` when `input` is symbolic: one
    /// interned symbol per distinct input term, so structurally equal
    /// buffers hash equal along a path.
    pub fn keccak_symbol(&mut self, input: &Term) -> Term {
        if let Some(hit) = self.keccak.get(input) {
            return hit.clone();
        }
        let sym = self.fresh_bv("keccak", 256);
        self.keccak.insert(input.clone(), sym.clone());
        sym
    }
}

/// Everything a handler may consult besides the state itself. No ambient
/// globals: solver, configuration and counters all arrive through here.
pub struct ExecCtx<'a> {
    pub solver: &'a mut Solver,
    pub config: &'a AnalysisConfig,
    pub counters: &'a mut Counters,
    pub warnings: &'a mut Vec<String>,
}

impl ExecCtx<'_> {
    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}", message);
        self.warnings.push(message);
    }
}

/// The kind of control transfer a successor represents; the executor turns
/// these into CFG nodes and edges.
#[derive(Debug, Clone)]
pub enum Transition {
    /// pc advanced past the instruction (plus immediates).
    Sequential,
    /// JUMP, or the taken arm of a JUMPI (condition recorded on the edge).
    JumpTaken { condition: Option<Term> },
    /// The fall-through arm of a conditional fork; the condition is the
    /// negation of the taken arm's.
    FallThrough { condition: Term },
    /// A new call frame was entered.
    CallEnter,
    /// A frame returned into its caller.
    CallReturn,
    /// The entry frame halted; the transaction is complete.
    TransactionEnd { reverted: bool },
}

/// One successor state produced by a handler.
pub struct Successor {
    pub state: GlobalState,
    pub transition: Transition,
}

impl Successor {
    pub fn sequential(state: GlobalState) -> Self {
        Successor {
            state,
            transition: Transition::Sequential,
        }
    }
}

pub type Handler = fn(&mut ExecCtx<'_>, GlobalState) -> Result<Vec<Successor>>;

lazy_static! {
    static ref HANDLERS: [Handler; 256] = build_handlers();
}

/// The opcode handler, or the invalid-opcode handler for unassigned bytes.
pub fn handler_for(op: Opcode) -> Handler {
    HANDLERS[op.0 as usize]
}

fn build_handlers() -> [Handler; 256] {
    let mut table: [Handler; 256] = [flow::exec_unassigned; 256];
    macro_rules! set {
        ($op:expr, $h:expr) => {
            table[$op.0 as usize] = $h as Handler;
        };
    }
    macro_rules! set_range {
        ($lo:expr, $hi:expr, $h:expr) => {
            for byte in $lo.0..=$hi.0 {
                table[byte as usize] = $h as Handler;
            }
        };
    }

    set!(Opcode::STOP, flow::exec_stop);
    set!(Opcode::ADD, arith::exec_add);
    set!(Opcode::MUL, arith::exec_mul);
    set!(Opcode::SUB, arith::exec_sub);
    set!(Opcode::DIV, arith::exec_div);
    set!(Opcode::SDIV, arith::exec_sdiv);
    set!(Opcode::MOD, arith::exec_mod);
    set!(Opcode::SMOD, arith::exec_smod);
    set!(Opcode::ADDMOD, arith::exec_addmod);
    set!(Opcode::MULMOD, arith::exec_mulmod);
    set!(Opcode::EXP, arith::exec_exp);
    set!(Opcode::SIGNEXTEND, arith::exec_signextend);
    set!(Opcode::LT, bitwise::exec_lt);
    set!(Opcode::GT, bitwise::exec_gt);
    set!(Opcode::SLT, bitwise::exec_slt);
    set!(Opcode::SGT, bitwise::exec_sgt);
    set!(Opcode::EQ, bitwise::exec_eq);
    set!(Opcode::ISZERO, bitwise::exec_iszero);
    set!(Opcode::AND, bitwise::exec_and);
    set!(Opcode::OR, bitwise::exec_or);
    set!(Opcode::XOR, bitwise::exec_xor);
    set!(Opcode::NOT, bitwise::exec_not);
    set!(Opcode::BYTE, bitwise::exec_byte);
    set!(Opcode::SHL, bitwise::exec_shl);
    set!(Opcode::SHR, bitwise::exec_shr);
    set!(Opcode::SAR, bitwise::exec_sar);
    set!(Opcode::KECCAK256, memory_ops::exec_keccak256);
    set!(Opcode::ADDRESS, env::exec_address);
    set!(Opcode::BALANCE, env::exec_balance);
    set!(Opcode::ORIGIN, env::exec_origin);
    set!(Opcode::CALLER, env::exec_caller);
    set!(Opcode::CALLVALUE, env::exec_callvalue);
    set!(Opcode::CALLDATALOAD, env::exec_calldataload);
    set!(Opcode::CALLDATASIZE, env::exec_calldatasize);
    set!(Opcode::CALLDATACOPY, env::exec_calldatacopy);
    set!(Opcode::CODESIZE, env::exec_codesize);
    set!(Opcode::CODECOPY, env::exec_codecopy);
    set!(Opcode::GASPRICE, env::exec_gasprice);
    set!(Opcode::EXTCODESIZE, env::exec_extcodesize);
    set!(Opcode::EXTCODECOPY, env::exec_extcodecopy);
    set!(Opcode::RETURNDATASIZE, env::exec_returndatasize);
    set!(Opcode::RETURNDATACOPY, env::exec_returndatacopy);
    set!(Opcode::EXTCODEHASH, env::exec_extcodehash);
    set!(Opcode::BLOCKHASH, env::exec_blockhash);
    set!(Opcode::COINBASE, env::exec_coinbase);
    set!(Opcode::TIMESTAMP, env::exec_timestamp);
    set!(Opcode::NUMBER, env::exec_number);
    set!(Opcode::PREVRANDAO, env::exec_prevrandao);
    set!(Opcode::GASLIMIT, env::exec_gaslimit);
    set!(Opcode::CHAINID, env::exec_chainid);
    set!(Opcode::SELFBALANCE, env::exec_selfbalance);
    set!(Opcode::BASEFEE, env::exec_basefee);
    set!(Opcode::BLOBHASH, env::exec_blobhash);
    set!(Opcode::BLOBBASEFEE, env::exec_blobbasefee);
    set!(Opcode::POP, stack_ops::exec_pop);
    set!(Opcode::MLOAD, memory_ops::exec_mload);
    set!(Opcode::MSTORE, memory_ops::exec_mstore);
    set!(Opcode::MSTORE8, memory_ops::exec_mstore8);
    set!(Opcode::SLOAD, storage_ops::exec_sload);
    set!(Opcode::SSTORE, storage_ops::exec_sstore);
    set!(Opcode::JUMP, flow::exec_jump);
    set!(Opcode::JUMPI, flow::exec_jumpi);
    set!(Opcode::PC, flow::exec_pc);
    set!(Opcode::MSIZE, memory_ops::exec_msize);
    set!(Opcode::GAS, flow::exec_gas);
    set!(Opcode::JUMPDEST, flow::exec_jumpdest);
    set!(Opcode::TLOAD, storage_ops::exec_tload);
    set!(Opcode::TSTORE, storage_ops::exec_tstore);
    set!(Opcode::MCOPY, memory_ops::exec_mcopy);
    set_range!(Opcode::PUSH0, Opcode::PUSH32, stack_ops::exec_push);
    set_range!(Opcode::DUP1, Opcode::DUP16, stack_ops::exec_dup);
    set_range!(Opcode::SWAP1, Opcode::SWAP16, stack_ops::exec_swap);
    set_range!(Opcode::LOG0, Opcode::LOG4, env::exec_log);
    set!(Opcode::CREATE, call::exec_create);
    set!(Opcode::CALL, call::exec_call);
    set!(Opcode::CALLCODE, call::exec_call);
    set!(Opcode::RETURN, flow::exec_return);
    set!(Opcode::DELEGATECALL, call::exec_call);
    set!(Opcode::CREATE2, call::exec_create);
    set!(Opcode::STATICCALL, call::exec_call);
    set!(Opcode::REVERT, flow::exec_revert);
    set!(Opcode::INVALID, flow::exec_invalid);
    set!(Opcode::SELFDESTRUCT, flow::exec_selfdestruct);

    table
}

// ---- shared helpers --------------------------------------------------------

/// Advances past the current instruction and wraps the state as the single
/// sequential successor.
pub(crate) fn cont(mut state: GlobalState) -> Result<Vec<Successor>> {
    state.mstate_mut().pc += 1;
    Ok(vec![Successor::sequential(state)])
}

/// EVM truthiness of a word.
pub(crate) fn truthy(word: &Term) -> Term {
    word.ne_term(&bv(0, 256))
}

/// A boolean as an EVM word.
pub(crate) fn bool_to_word(cond: &Term) -> Term {
    Term::ite(cond, &bv(1, 256), &bv(0, 256))
}

/// Concretises a term expected to be a machine-level offset or size. A
/// symbolic value yields `None`; callers degrade with a warning rather than
/// failing the path.
pub(crate) fn concrete_usize(ctx: &mut ExecCtx<'_>, what: &str, term: &Term) -> Option<usize> {
    match term.as_usize() {
        Some(v) => Some(v),
        None => {
            ctx.warn(format!("symbolic {} not concretised; result imprecise", what));
            None
        }
    }
}

/// The opcode and byte address of the instruction the state is about to
/// execute. Handlers call this before mutating the frame.
pub(crate) fn current_op(state: &GlobalState) -> (Opcode, usize, Option<Vec<u8>>) {
    match state.current_instruction() {
        Some(instr) => (instr.opcode, instr.address, instr.argument.clone()),
        // Running off the end of code is an implicit STOP; handlers for it
        // never read the immediate.
        None => (Opcode::STOP, usize::MAX, None),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::rc::Rc;

    use laser_shared::address::Address;
    use laser_shared::disasm::Disassembly;

    use crate::machine::AnalysisConfig;
    use crate::smt::backend::SubstitutionSolver;
    use crate::smt::solver::SolverConfig;
    use crate::smt::{bv, bv_sym, Solver, Term};
    use crate::state::{Calldata, Environment, Frame, GlobalState, MachineState, WorldState};

    use super::Counters;

    pub(crate) fn ctx_fixture() -> (Solver, AnalysisConfig, Counters, Vec<String>) {
        (
            Solver::new(
                Box::new(SubstitutionSolver::default()),
                SolverConfig::default(),
            ),
            AnalysisConfig::default(),
            Counters::default(),
            Vec::new(),
        )
    }

    /// Binds an [`ExecCtx`](super::ExecCtx) over fresh fixture parts.
    macro_rules! exec_ctx {
        ($ctx:ident, $fix:ident) => {
            let mut $fix = crate::instructions::tests::ctx_fixture();
            let mut $ctx = crate::instructions::ExecCtx {
                solver: &mut $fix.0,
                config: &$fix.1,
                counters: &mut $fix.2,
                warnings: &mut $fix.3,
            };
        };
    }
    pub(crate) use exec_ctx;

    /// A single-frame state running `code` at address 0xaa, with symbolic
    /// transaction calldata.
    pub(crate) fn state_with_code(code: &[u8]) -> GlobalState {
        let address = Address::from(0xaa);
        let disasm = Rc::new(Disassembly::from_bytecode(code));
        let mut world = WorldState::new();
        world.create_account(address, "Test", disasm.clone(), bv(0, 256), true);
        let env = Environment::new(
            address,
            disasm,
            bv_sym("1_caller", 256),
            bv_sym("1_origin", 256),
            bv_sym("1_value", 256),
            bv_sym("gas_price", 256),
            Calldata::symbolic("1"),
        );
        let frame = Frame {
            env,
            mstate: MachineState::new(0, 8_000_000),
            return_ctx: None,
        };
        GlobalState::new(world, frame)
    }

    /// An empty-code state preloaded with `values` (last element on top).
    pub(crate) fn state_with_stack(values: Vec<Term>) -> GlobalState {
        let mut state = state_with_code(&[]);
        for v in values {
            state.mstate_mut().push(v).unwrap();
        }
        state
    }
}
