// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use sha3::{Digest, Keccak256};

use crate::error::{ExecutionError, Result};
use crate::instructions::{concrete_usize, cont, ExecCtx, Successor};
use crate::smt::{bv, bv_from_biguint, bv_from_bytes, Term};
use crate::state::GlobalState;

use laser_shared::address::Address;

fn push1(mut state: GlobalState, value: Term) -> Result<Vec<Successor>> {
    state.mstate_mut().push(value)?;
    cont(state)
}

pub fn exec_address(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let value = bv_from_biguint(state.env().active_account.to_biguint(), 256);
    push1(state, value)
}

pub fn exec_balance(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let address = state.mstate_mut().pop()?;
    let value = state.world_state.balance_of(&address);
    push1(state, value)
}

pub fn exec_origin(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let value = state.env().origin.clone();
    push1(state, value)
}

pub fn exec_caller(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let value = state.env().caller.clone();
    push1(state, value)
}

pub fn exec_callvalue(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let value = state.env().callvalue.clone();
    push1(state, value)
}

pub fn exec_calldataload(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let offset = state.mstate_mut().pop()?;
    let value = state.env().calldata.load_word(&offset);
    push1(state, value)
}

pub fn exec_calldatasize(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let value = state.env().calldata.size();
    push1(state, value)
}

pub fn exec_calldatacopy(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let dest = m.pop()?;
    let offset = m.pop()?;
    let size = m.pop()?;
    if let (Some(dest), Some(size)) = (
        concrete_usize(ctx, "CALLDATACOPY dest", &dest),
        concrete_usize(ctx, "CALLDATACOPY size", &size),
    ) {
        let bytes: Vec<Term> = (0..size)
            .map(|i| {
                state
                    .env()
                    .calldata
                    .load_byte(&offset.add(&bv(i as u64, 256)))
            })
            .collect();
        state.mstate_mut().memory.write_bytes(dest, &bytes);
    }
    cont(state)
}

pub fn exec_codesize(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let value = bv(state.env().code.bytecode.len() as u64, 256);
    push1(state, value)
}

pub fn exec_codecopy(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let dest = m.pop()?;
    let offset = m.pop()?;
    let size = m.pop()?;
    if let (Some(dest), Some(offset), Some(size)) = (
        concrete_usize(ctx, "CODECOPY dest", &dest),
        concrete_usize(ctx, "CODECOPY offset", &offset),
        concrete_usize(ctx, "CODECOPY size", &size),
    ) {
        let code = &state.env().code.bytecode;
        let bytes: Vec<u8> = (0..size)
            .map(|i| code.get(offset + i).copied().unwrap_or(0))
            .collect();
        state.mstate_mut().memory.write_concrete(dest, &bytes);
    }
    cont(state)
}

pub fn exec_gasprice(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let value = state.env().gasprice.clone();
    push1(state, value)
}

pub fn exec_extcodesize(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let address = state.mstate_mut().pop()?;
    let value = match address.as_biguint() {
        Some(a) => match state.world_state.account(&Address::from(a)) {
            Some(account) => bv(account.code.bytecode.len() as u64, 256),
            None => bv(0, 256),
        },
        None => ctx.counters.fresh_bv("extcodesize", 256),
    };
    push1(state, value)
}

pub fn exec_extcodecopy(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let address = m.pop()?;
    let dest = m.pop()?;
    let offset = m.pop()?;
    let size = m.pop()?;
    if let (Some(dest), Some(offset), Some(size)) = (
        concrete_usize(ctx, "EXTCODECOPY dest", &dest),
        concrete_usize(ctx, "EXTCODECOPY offset", &offset),
        concrete_usize(ctx, "EXTCODECOPY size", &size),
    ) {
        let code: Vec<u8> = match address.as_biguint() {
            Some(a) => state
                .world_state
                .account(&Address::from(a))
                .map(|acc| acc.code.bytecode.clone())
                .unwrap_or_default(),
            None => Vec::new(),
        };
        let bytes: Vec<u8> = (0..size)
            .map(|i| code.get(offset + i).copied().unwrap_or(0))
            .collect();
        state.mstate_mut().memory.write_concrete(dest, &bytes);
    }
    cont(state)
}

pub fn exec_returndatasize(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let value = match &state.mstate().last_return_data {
        Some(data) => bv(data.len() as u64, 256),
        None => bv(0, 256),
    };
    push1(state, value)
}

pub fn exec_returndatacopy(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let dest = m.pop()?;
    let offset = m.pop()?;
    let size = m.pop()?;
    if let (Some(dest), Some(offset), Some(size)) = (
        concrete_usize(ctx, "RETURNDATACOPY dest", &dest),
        concrete_usize(ctx, "RETURNDATACOPY offset", &offset),
        concrete_usize(ctx, "RETURNDATACOPY size", &size),
    ) {
        let data = state.mstate().last_return_data.clone().unwrap_or_default();
        let bytes: Vec<Term> = (0..size)
            .map(|i| data.get(offset + i).cloned().unwrap_or_else(|| bv(0, 8)))
            .collect();
        state.mstate_mut().memory.write_bytes(dest, &bytes);
    }
    cont(state)
}

pub fn exec_extcodehash(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let address = state.mstate_mut().pop()?;
    let value = match address.as_biguint() {
        Some(a) => match state.world_state.account(&Address::from(a)) {
            Some(account) => bv_from_bytes(&Keccak256::digest(&account.code.bytecode)),
            None => bv(0, 256),
        },
        None => ctx.counters.fresh_bv("extcodehash", 256),
    };
    push1(state, value)
}

/// BLOCKHASH is unmodelled chain history: one fresh symbol per lookup.
pub fn exec_blockhash(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let _number = state.mstate_mut().pop()?;
    let value = ctx.counters.fresh_bv("blockhash", 256);
    push1(state, value)
}

pub fn exec_coinbase(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let value = state.world_state.block.coinbase.clone();
    push1(state, value)
}

pub fn exec_timestamp(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let value = state.world_state.block.timestamp.clone();
    push1(state, value)
}

pub fn exec_number(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let value = state.world_state.block.number.clone();
    push1(state, value)
}

pub fn exec_prevrandao(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let value = state.world_state.block.prevrandao.clone();
    push1(state, value)
}

pub fn exec_gaslimit(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let value = state.world_state.block.gaslimit.clone();
    push1(state, value)
}

pub fn exec_chainid(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let value = state.world_state.block.chainid.clone();
    push1(state, value)
}

pub fn exec_selfbalance(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let address = bv_from_biguint(state.env().active_account.to_biguint(), 256);
    let value = state.world_state.balance_of(&address);
    push1(state, value)
}

pub fn exec_basefee(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let value = state.world_state.block.basefee.clone();
    push1(state, value)
}

/// Blob versioned hashes are unmodelled chain data: one fresh symbol per
/// lookup.
pub fn exec_blobhash(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let _index = state.mstate_mut().pop()?;
    let value = ctx.counters.fresh_bv("blobhash", 256);
    push1(state, value)
}

pub fn exec_blobbasefee(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let value = state.world_state.block.blobbasefee.clone();
    push1(state, value)
}

/// LOG0..LOG4: pops the data range and topics; the engine does not model
/// the log itself.
pub fn exec_log(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    if state.env().static_call {
        return Err(ExecutionError::WriteProtection);
    }
    let (op, _, _) = crate::instructions::current_op(&state);
    let topics = (op.0 - laser_shared::opcode::Opcode::LOG0.0) as usize;
    state.mstate_mut().pop_n(2 + topics)?;
    cont(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::tests::{exec_ctx, state_with_code, state_with_stack};

    #[test]
    fn calldataload_on_symbolic_input_concatenates_byte_symbols() {
        exec_ctx!(ctx, fix);
        let state = state_with_stack(vec![bv(4, 256)]);
        let out = exec_calldataload(&mut ctx, state).unwrap();
        let word = out[0].state.mstate().peek(0).unwrap().clone();
        assert_eq!(word.width(), 256);
        assert!(!word.is_concrete());
    }

    #[test]
    fn codecopy_copies_the_running_code() {
        exec_ctx!(ctx, fix);
        let mut state = state_with_code(&[0x60, 0x01, 0x00]);
        for v in [bv(3, 256), bv(0, 256), bv(0, 256)] {
            state.mstate_mut().push(v).unwrap();
        }
        let out = exec_codecopy(&mut ctx, state).unwrap();
        let mut state = out.into_iter().next().unwrap().state;
        assert_eq!(
            state.mstate_mut().memory.try_concrete(0, 3).unwrap(),
            vec![0x60, 0x01, 0x00]
        );
    }

    #[test]
    fn returndatasize_defaults_to_zero() {
        exec_ctx!(ctx, fix);
        let state = state_with_stack(vec![]);
        let out = exec_returndatasize(&mut ctx, state).unwrap();
        assert_eq!(out[0].state.mstate().peek(0).unwrap(), &bv(0, 256));
    }
}
