// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use laser_shared::opcode::Opcode;

use crate::error::Result;
use crate::instructions::{cont, current_op, ExecCtx, Successor};
use crate::smt::{bv, bv_from_bytes};
use crate::state::GlobalState;

pub fn exec_pop(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    state.mstate_mut().pop()?;
    cont(state)
}

/// PUSH0..PUSH32. The immediate bytes come off the instruction record; the
/// disassembler already zero-padded truncated immediates.
pub fn exec_push(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let (_, _, argument) = current_op(&state);
    let value = match argument {
        Some(bytes) if !bytes.is_empty() => bv_from_bytes(&bytes).zero_extend(256),
        _ => bv(0, 256),
    };
    state.mstate_mut().push(value)?;
    cont(state)
}

pub fn exec_dup(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let (op, _, _) = current_op(&state);
    let i = (op.0 - Opcode::DUP1.0 + 1) as usize;
    state.mstate_mut().dup(i)?;
    cont(state)
}

pub fn exec_swap(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let (op, _, _) = current_op(&state);
    let i = (op.0 - Opcode::SWAP1.0 + 1) as usize;
    state.mstate_mut().swap(i)?;
    cont(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::tests::{exec_ctx, state_with_code};

    #[test]
    fn push_reads_the_immediate() {
        exec_ctx!(ctx, fix);
        // PUSH2 0xbeef
        let state = state_with_code(&[0x61, 0xbe, 0xef]);
        let out = exec_push(&mut ctx, state).unwrap();
        assert_eq!(out[0].state.mstate().peek(0).unwrap(), &bv(0xbeef, 256));
        assert_eq!(out[0].state.mstate().pc, 1);
    }

    #[test]
    fn push0_pushes_zero() {
        exec_ctx!(ctx, fix);
        let state = state_with_code(&[0x5f]);
        let out = exec_push(&mut ctx, state).unwrap();
        assert_eq!(out[0].state.mstate().peek(0).unwrap(), &bv(0, 256));
    }
}
