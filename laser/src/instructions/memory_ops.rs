// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use sha3::{Digest, Keccak256};

use crate::error::Result;
use crate::instructions::{concrete_usize, cont, ExecCtx, Successor};
use crate::smt::{bv, bv_from_bytes};
use crate::state::GlobalState;

pub fn exec_mload(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let offset = state.mstate_mut().pop()?;
    let value = match concrete_usize(ctx, "MLOAD offset", &offset) {
        Some(o) => state.mstate_mut().memory.read_word(o),
        None => ctx.counters.fresh_bv("mload_sentinel", 256),
    };
    state.mstate_mut().push(value)?;
    cont(state)
}

pub fn exec_mstore(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let offset = m.pop()?;
    let value = m.pop()?;
    if let Some(o) = concrete_usize(ctx, "MSTORE offset", &offset) {
        state.mstate_mut().memory.write(o, &value);
    }
    cont(state)
}

pub fn exec_mstore8(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let offset = m.pop()?;
    let value = m.pop()?;
    if let Some(o) = concrete_usize(ctx, "MSTORE8 offset", &offset) {
        state.mstate_mut().memory.write_byte(o, value.extract(7, 0));
    }
    cont(state)
}

pub fn exec_msize(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let msize = state.mstate().memory.msize();
    state.mstate_mut().push(bv(msize as u64, 256))?;
    cont(state)
}

pub fn exec_mcopy(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let dest = m.pop()?;
    let src = m.pop()?;
    let size = m.pop()?;
    if let (Some(dest), Some(src), Some(size)) = (
        concrete_usize(ctx, "MCOPY dest", &dest),
        concrete_usize(ctx, "MCOPY src", &src),
        concrete_usize(ctx, "MCOPY size", &size),
    ) {
        let bytes = state.mstate_mut().memory.read_bytes(src, size);
        state.mstate_mut().memory.write_bytes(dest, &bytes);
    }
    cont(state)
}

/// KECCAK256 hashes concretely whenever the input buffer folded to bytes;
/// otherwise the digest is an interned fresh symbol per distinct input term,
/// so equal buffers hash equal along the path.
pub fn exec_keccak256(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let offset = m.pop()?;
    let size = m.pop()?;
    let digest = match (
        concrete_usize(ctx, "KECCAK256 offset", &offset),
        concrete_usize(ctx, "KECCAK256 size", &size),
    ) {
        (Some(_), Some(0)) => bv_from_bytes(&Keccak256::digest([])),
        (Some(o), Some(s)) => match state.mstate_mut().memory.try_concrete(o, s) {
            Some(bytes) => bv_from_bytes(&Keccak256::digest(&bytes)),
            None => {
                let input = state.mstate_mut().memory.read(o, s);
                ctx.counters.keccak_symbol(&input)
            }
        },
        _ => ctx.counters.fresh_bv("keccak_sentinel", 256),
    };
    state.mstate_mut().push(digest)?;
    cont(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::tests::{exec_ctx, state_with_stack};
    use crate::smt::bv_sym;

    #[test]
    fn mstore_mload_roundtrip() {
        exec_ctx!(ctx, fix);
        let state = state_with_stack(vec![bv(0xfeed, 256), bv(0, 256)]);
        let out = exec_mstore(&mut ctx, state).unwrap();
        let mut state = out.into_iter().next().unwrap().state;
        state.mstate_mut().push(bv(0, 256)).unwrap();
        let out = exec_mload(&mut ctx, state).unwrap();
        assert_eq!(out[0].state.mstate().peek(0).unwrap(), &bv(0xfeed, 256));
    }

    #[test]
    fn keccak_of_concrete_memory_is_concrete() {
        exec_ctx!(ctx, fix);
        // Store a word then hash those 32 bytes.
        let state = state_with_stack(vec![bv(2, 256), bv(0, 256)]);
        let out = exec_mstore(&mut ctx, state).unwrap();
        let mut state = out.into_iter().next().unwrap().state;
        state.mstate_mut().push(bv(32, 256)).unwrap();
        state.mstate_mut().push(bv(0, 256)).unwrap();
        let out = exec_keccak256(&mut ctx, state).unwrap();
        let digest = out[0].state.mstate().peek(0).unwrap().clone();
        assert!(digest.is_concrete());
        // keccak256(abi.encode(uint256(2)))
        assert_eq!(
            hex::encode(digest.to_be_bytes().unwrap()),
            "405787fa12a823e0f2b7631cc41b3ba8828b3321ca811111fa75cd3aa3bb5ace"
        );
    }

    #[test]
    fn keccak_of_symbolic_memory_is_interned() {
        exec_ctx!(ctx, fix);
        let mut state = state_with_stack(vec![]);
        state.mstate_mut().memory.write_byte(0, bv_sym("b", 8));
        state.mstate_mut().push(bv(1, 256)).unwrap();
        state.mstate_mut().push(bv(0, 256)).unwrap();
        let out = exec_keccak256(&mut ctx, state).unwrap();
        let first = out[0].state.mstate().peek(0).unwrap().clone();

        let mut state = state_with_stack(vec![]);
        state.mstate_mut().memory.write_byte(0, bv_sym("b", 8));
        state.mstate_mut().push(bv(1, 256)).unwrap();
        state.mstate_mut().push(bv(0, 256)).unwrap();
        let out = exec_keccak256(&mut ctx, state).unwrap();
        let second = out[0].state.mstate().peek(0).unwrap().clone();
        assert_eq!(first, second);
        assert!(!first.is_concrete());
    }
}
