// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use num_bigint::BigUint;

use crate::error::Result;
use crate::instructions::{cont, ExecCtx, Successor};
use crate::smt::{bv_from_biguint, Term};
use crate::state::GlobalState;

fn binary(state: &mut GlobalState, f: impl FnOnce(&Term, &Term) -> Term) -> Result<()> {
    let m = state.mstate_mut();
    let a = m.pop()?;
    let b = m.pop()?;
    m.push(f(&a, &b))
}

pub fn exec_add(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    binary(&mut state, |a, b| a.add(b))?;
    cont(state)
}

pub fn exec_mul(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    binary(&mut state, |a, b| a.mul(b))?;
    cont(state)
}

pub fn exec_sub(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    binary(&mut state, |a, b| a.sub(b))?;
    cont(state)
}

pub fn exec_div(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    binary(&mut state, |a, b| a.udiv(b))?;
    cont(state)
}

pub fn exec_sdiv(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    binary(&mut state, |a, b| a.sdiv(b))?;
    cont(state)
}

pub fn exec_mod(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    binary(&mut state, |a, b| a.urem(b))?;
    cont(state)
}

pub fn exec_smod(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    binary(&mut state, |a, b| a.srem(b))?;
    cont(state)
}

/// ADDMOD and MULMOD are exact over the 512-bit intermediate, so both
/// operands are widened before the operation and the result reduced.
fn modular(state: &mut GlobalState, mul: bool) -> Result<()> {
    let m = state.mstate_mut();
    let a = m.pop()?.zero_extend(512);
    let b = m.pop()?.zero_extend(512);
    let n = m.pop()?.zero_extend(512);
    let wide = if mul { a.mul(&b) } else { a.add(&b) };
    m.push(wide.urem(&n).extract(255, 0))
}

pub fn exec_addmod(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    modular(&mut state, false)?;
    cont(state)
}

pub fn exec_mulmod(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    modular(&mut state, true)?;
    cont(state)
}

/// EXP folds when both operands are concrete; a symbolic exponent has no
/// finite bit-vector encoding, so the result degrades to a fresh symbol.
pub fn exec_exp(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let base = m.pop()?;
    let exponent = m.pop()?;
    let result = match (base.as_biguint(), exponent.as_biguint()) {
        (Some(b), Some(e)) => {
            let modulus = BigUint::from(1u8) << 256u32;
            bv_from_biguint(b.modpow(e, &modulus), 256)
        }
        _ => ctx.counters.fresh_bv("exp_result", 256),
    };
    state.mstate_mut().push(result)?;
    cont(state)
}

/// SIGNEXTEND with a concrete byte index is an extract + sign-extend; a
/// symbolic index degrades to a fresh symbol.
pub fn exec_signextend(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let index = m.pop()?;
    let value = m.pop()?;
    let result = match index.as_usize() {
        Some(i) if i < 31 => {
            let bits = 8 * (i as u32 + 1);
            value.extract(bits - 1, 0).sign_extend(256)
        }
        Some(_) => value,
        None if index.is_concrete() => value,
        None => ctx.counters.fresh_bv("signextend_result", 256),
    };
    state.mstate_mut().push(result)?;
    cont(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::tests::{exec_ctx, state_with_stack};
    use crate::smt::bv;

    #[test]
    fn addmod_wraps_exactly() {
        exec_ctx!(ctx, fix);
        // (MAX + 2) % 10: the 512-bit intermediate avoids the wrap to 1.
        let max = bv(0, 256).sub(&bv(1, 256));
        let state = state_with_stack(vec![bv(10, 256), bv(2, 256), max]);
        let out = exec_addmod(&mut ctx, state).unwrap();
        assert_eq!(out[0].state.mstate().peek(0).unwrap(), &bv(7, 256));
    }

    #[test]
    fn exp_concrete_and_symbolic() {
        exec_ctx!(ctx, fix);
        let state = state_with_stack(vec![bv(10, 256), bv(2, 256)]);
        let out = exec_exp(&mut ctx, state).unwrap();
        assert_eq!(out[0].state.mstate().peek(0).unwrap(), &bv(1024, 256));

        let state = state_with_stack(vec![crate::smt::bv_sym("e", 256), bv(2, 256)]);
        let out = exec_exp(&mut ctx, state).unwrap();
        assert!(!out[0].state.mstate().peek(0).unwrap().is_concrete());
    }

    #[test]
    fn signextend_byte_zero() {
        exec_ctx!(ctx, fix);
        // Sign-extend the single byte 0xff.
        let state = state_with_stack(vec![bv(0xff, 256), bv(0, 256)]);
        let out = exec_signextend(&mut ctx, state).unwrap();
        assert_eq!(
            out[0].state.mstate().peek(0).unwrap(),
            &bv(0, 256).sub(&bv(1, 256))
        );
    }

    #[test]
    fn division_by_zero_yields_zero() {
        exec_ctx!(ctx, fix);
        let state = state_with_stack(vec![bv(0, 256), bv(7, 256)]);
        let out = exec_div(&mut ctx, state).unwrap();
        assert_eq!(out[0].state.mstate().peek(0).unwrap(), &bv(0, 256));
    }

    #[test]
    fn stack_underflow_is_terminal() {
        exec_ctx!(ctx, fix);
        let state = state_with_stack(vec![bv(1, 256)]);
        assert!(exec_add(&mut ctx, state).is_err());
    }
}
