// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::error::Result;
use crate::instructions::{bool_to_word, cont, truthy, ExecCtx, Successor};
use crate::smt::{bv, Term};
use crate::state::GlobalState;

fn comparison(
    state: &mut GlobalState,
    f: impl FnOnce(&Term, &Term) -> Term,
) -> Result<()> {
    let m = state.mstate_mut();
    let a = m.pop()?;
    let b = m.pop()?;
    m.push(bool_to_word(&f(&a, &b)))
}

pub fn exec_lt(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    comparison(&mut state, |a, b| a.ult(b))?;
    cont(state)
}

pub fn exec_gt(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    comparison(&mut state, |a, b| a.ugt(b))?;
    cont(state)
}

pub fn exec_slt(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    comparison(&mut state, |a, b| a.slt(b))?;
    cont(state)
}

pub fn exec_sgt(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    comparison(&mut state, |a, b| a.sgt(b))?;
    cont(state)
}

pub fn exec_eq(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    comparison(&mut state, |a, b| a.eq_term(b))?;
    cont(state)
}

pub fn exec_iszero(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let a = m.pop()?;
    m.push(bool_to_word(&truthy(&a).not()))?;
    cont(state)
}

fn bitop(state: &mut GlobalState, f: impl FnOnce(&Term, &Term) -> Term) -> Result<()> {
    let m = state.mstate_mut();
    let a = m.pop()?;
    let b = m.pop()?;
    m.push(f(&a, &b))
}

pub fn exec_and(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    bitop(&mut state, |a, b| a.bvand(b))?;
    cont(state)
}

pub fn exec_or(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    bitop(&mut state, |a, b| a.bvor(b))?;
    cont(state)
}

pub fn exec_xor(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    bitop(&mut state, |a, b| a.bvxor(b))?;
    cont(state)
}

pub fn exec_not(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let a = m.pop()?;
    m.push(a.bvnot())?;
    cont(state)
}

/// BYTE pulls byte `i` (0 = most significant) out of a word. A symbolic
/// index degrades to a fresh symbol.
pub fn exec_byte(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let index = m.pop()?;
    let word = m.pop()?;
    let result = match index.as_usize() {
        Some(i) if i < 32 => {
            let high = 255 - 8 * i as u32;
            word.extract(high, high - 7).zero_extend(256)
        }
        Some(_) => bv(0, 256),
        None if index.is_concrete() => bv(0, 256),
        None => ctx.counters.fresh_bv("byte_result", 256),
    };
    state.mstate_mut().push(result)?;
    cont(state)
}

// EVM shift operands arrive shift-first.

pub fn exec_shl(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let shift = m.pop()?;
    let value = m.pop()?;
    m.push(value.shl(&shift))?;
    cont(state)
}

pub fn exec_shr(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let shift = m.pop()?;
    let value = m.pop()?;
    m.push(value.lshr(&shift))?;
    cont(state)
}

pub fn exec_sar(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let shift = m.pop()?;
    let value = m.pop()?;
    m.push(value.ashr(&shift))?;
    cont(state)
}
