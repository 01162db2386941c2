// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use std::rc::Rc;

use sha3::{Digest, Keccak256};

use laser_shared::address::Address;
use laser_shared::disasm::Disassembly;
use laser_shared::opcode::Opcode;

use crate::error::{ExecutionError, Result};
use crate::instructions::{concrete_usize, current_op, ExecCtx, Successor, Transition};
use crate::natives;
use crate::smt::{bv, bv_from_biguint, Term};
use crate::state::{Calldata, Environment, Frame, GlobalState, MachineState, ReturnContext};

struct CallArgs {
    to: Term,
    value: Term,
    in_offset: Term,
    in_size: Term,
    out_offset: Term,
    out_size: Term,
}

fn pop_call_args(op: Opcode, state: &mut GlobalState) -> Result<CallArgs> {
    let callvalue = state.env().callvalue.clone();
    let m = state.mstate_mut();
    let _gas = m.pop()?;
    let to = m.pop()?;
    let value = match op {
        Opcode::CALL | Opcode::CALLCODE => m.pop()?,
        // DELEGATECALL runs in the caller's value context; STATICCALL sends
        // nothing.
        Opcode::DELEGATECALL => callvalue,
        _ => bv(0, 256),
    };
    let in_offset = m.pop()?;
    let in_size = m.pop()?;
    let out_offset = m.pop()?;
    let out_size = m.pop()?;
    Ok(CallArgs {
        to,
        value,
        in_offset,
        in_size,
        out_offset,
        out_size,
    })
}

/// CALL/CALLCODE/DELEGATECALL/STATICCALL.
pub fn exec_call(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let (op, address, _) = current_op(&state);
    let args = pop_call_args(op, &mut state)?;

    if op == Opcode::CALL && state.env().static_call {
        if let Some(v) = args.value.as_biguint() {
            if !num_traits::Zero::is_zero(v) {
                return Err(ExecutionError::WriteProtection);
            }
        }
    }

    // The caller resumes after the call instruction regardless of what the
    // callee does.
    state.mstate_mut().pc += 1;

    let out_offset = concrete_usize(ctx, "call out offset", &args.out_offset).unwrap_or(0);
    let out_size = concrete_usize(ctx, "call out size", &args.out_size).unwrap_or(0);

    // Resolve the callee. Anything unresolvable becomes an unmodelled call.
    let callee = match args.to.as_biguint() {
        Some(a) => Address::from(a),
        None => return unmodelled_call(ctx, state, address, "symbolic callee"),
    };

    if let Some(index) = callee.precompile_index() {
        return precompile_call(ctx, state, address, index, &args, out_offset, out_size);
    }

    let (code, callee_name) = match state.world_state.account(&callee) {
        Some(account) if !account.code.is_empty() => {
            (account.code.clone(), account.contract_name.clone())
        }
        // Value transfer to a codeless or unknown account succeeds without
        // running anything.
        _ => {
            transfer_value(&mut state, &callee, &args.value);
            state.mstate_mut().push(bv(1, 256))?;
            state.mstate_mut().last_return_data = Some(Vec::new());
            return Ok(vec![Successor::sequential(state)]);
        }
    };

    if state.call_depth() >= ctx.config.call_depth_limit {
        log::trace!("call depth limit at {:#x}", address);
        state.mstate_mut().push(bv(0, 256))?;
        return Ok(vec![Successor::sequential(state)]);
    }

    let calldata = match (
        concrete_usize(ctx, "call input offset", &args.in_offset),
        concrete_usize(ctx, "call input size", &args.in_size),
    ) {
        (Some(o), Some(s)) => Calldata::terms(state.mstate_mut().memory.read_bytes(o, s)),
        _ => return unmodelled_call(ctx, state, address, "symbolic call input range"),
    };

    let world_snapshot = state.world_state.clone();
    if op == Opcode::CALL {
        // The callee must be fundable; record the solvency fact on the path.
        let caller_addr = bv_from_biguint(state.env().active_account.to_biguint(), 256);
        let caller_balance = state.world_state.balance_of(&caller_addr);
        state
            .world_state
            .constraints
            .push(caller_balance.uge(&args.value));
        transfer_value(&mut state, &callee, &args.value);
    }

    let parent_env = state.env().clone();
    let active_account = match op {
        // DELEGATECALL and CALLCODE run foreign code against our storage.
        Opcode::DELEGATECALL | Opcode::CALLCODE => parent_env.active_account,
        _ => callee,
    };
    let caller_term = match op {
        Opcode::DELEGATECALL => parent_env.caller.clone(),
        _ => bv_from_biguint(parent_env.active_account.to_biguint(), 256),
    };

    let mut env = Environment::new(
        active_account,
        code,
        caller_term,
        parent_env.origin.clone(),
        args.value.clone(),
        parent_env.gasprice.clone(),
        calldata,
    );
    env.active_function_name = callee_name;
    env.static_call = parent_env.static_call || op == Opcode::STATICCALL;

    let depth = state.mstate().depth + 1;
    let gas_limit = ctx.config.tx_gas_limit;
    state.push_frame(Frame {
        env,
        mstate: MachineState::new(depth, gas_limit),
        return_ctx: Some(ReturnContext {
            out_offset,
            out_size,
            world_snapshot,
            create_address: None,
        }),
    });

    Ok(vec![Successor {
        state,
        transition: Transition::CallEnter,
    }])
}

/// A call the engine cannot follow: the result is an unconstrained fresh
/// symbol (it may be 0 or 1, which is exactly what return-value detectors
/// need to reason about).
fn unmodelled_call(
    ctx: &mut ExecCtx<'_>,
    mut state: GlobalState,
    address: usize,
    why: &str,
) -> Result<Vec<Successor>> {
    log::trace!("unmodelled call at {:#x}: {}", address, why);
    let retval = ctx.counters.fresh_bv(&format!("retval_{:x}", address), 256);
    state.mstate_mut().push(retval)?;
    state.mstate_mut().last_return_data = None;
    Ok(vec![Successor::sequential(state)])
}

#[allow(clippy::too_many_arguments)]
fn precompile_call(
    ctx: &mut ExecCtx<'_>,
    mut state: GlobalState,
    address: usize,
    index: u64,
    args: &CallArgs,
    out_offset: usize,
    out_size: usize,
) -> Result<Vec<Successor>> {
    let input = match (
        concrete_usize(ctx, "precompile input offset", &args.in_offset),
        concrete_usize(ctx, "precompile input size", &args.in_size),
    ) {
        (Some(o), Some(s)) => state.mstate_mut().memory.try_concrete(o, s),
        _ => None,
    };
    let input = match input {
        Some(bytes) => bytes,
        // Symbolic payload: treated as an unmodelled success returning
        // symbolic bytes.
        None => return unmodelled_call(ctx, state, address, "symbolic precompile input"),
    };
    match natives::execute(index, &input) {
        Ok(output) => {
            let n = out_size.min(output.len());
            state.mstate_mut().memory.write_concrete(out_offset, &output[..n]);
            state.mstate_mut().last_return_data =
                Some(output.iter().map(|b| bv(*b as u64, 8)).collect());
            state.mstate_mut().push(bv(1, 256))?;
            Ok(vec![Successor::sequential(state)])
        }
        Err(err) => unmodelled_call(ctx, state, address, &err.to_string()),
    }
}

fn transfer_value(state: &mut GlobalState, callee: &Address, value: &Term) {
    if value.as_biguint().map(num_traits::Zero::is_zero) == Some(true) {
        return;
    }
    let caller = state.env().active_account;
    if let Some(account) = state.world_state.account_mut(&caller) {
        account.balance = account.balance.sub(value);
    }
    if let Some(account) = state.world_state.account_mut(callee) {
        account.balance = account.balance.add(value);
    }
}

/// CREATE/CREATE2: run the initialisation code in a child frame; its return
/// value becomes the new account's runtime code.
pub fn exec_create(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    if state.env().static_call {
        return Err(ExecutionError::WriteProtection);
    }
    let (op, address, _) = current_op(&state);
    let m = state.mstate_mut();
    let value = m.pop()?;
    let offset = m.pop()?;
    let size = m.pop()?;
    let salt = if op == Opcode::CREATE2 {
        Some(m.pop()?)
    } else {
        None
    };

    state.mstate_mut().pc += 1;

    let init_code = match (
        concrete_usize(ctx, "CREATE offset", &offset),
        concrete_usize(ctx, "CREATE size", &size),
    ) {
        (Some(o), Some(s)) => state.mstate_mut().memory.try_concrete(o, s),
        _ => None,
    };
    let (init_code, salt_bytes) = match (init_code, &salt) {
        (Some(code), None) => (code, None),
        (Some(code), Some(s)) => match s.to_be_bytes() {
            Some(bytes) => (code, Some(bytes)),
            None => {
                return unmodelled_call(ctx, state, address, "symbolic CREATE2 salt");
            }
        },
        _ => {
            return unmodelled_call(ctx, state, address, "symbolic init code");
        }
    };

    let creator = state.env().active_account;
    let nonce = state
        .world_state
        .account(&creator)
        .map(|a| a.nonce)
        .unwrap_or(0);
    let new_address = match salt_bytes {
        None => create_address(&creator, nonce),
        Some(salt) => create2_address(&creator, &salt, &init_code),
    };
    if let Some(account) = state.world_state.account_mut(&creator) {
        account.nonce += 1;
    }

    let world_snapshot = state.world_state.clone();
    let contract_name = format!("created_{}", new_address);
    let init_disasm = Rc::new(Disassembly::from_bytecode(&init_code));
    state.world_state.create_account(
        new_address,
        contract_name,
        Rc::new(Disassembly::default()),
        value.clone(),
        true,
    );
    transfer_value(&mut state, &new_address, &value);

    let parent_env = state.env().clone();
    let mut env = Environment::new(
        new_address,
        init_disasm,
        bv_from_biguint(creator.to_biguint(), 256),
        parent_env.origin.clone(),
        value,
        parent_env.gasprice.clone(),
        Calldata::concrete(Vec::new()),
    );
    env.active_function_name = "constructor".to_string();

    let depth = state.mstate().depth + 1;
    let gas_limit = ctx.config.tx_gas_limit;
    state.push_frame(Frame {
        env,
        mstate: MachineState::new(depth, gas_limit),
        return_ctx: Some(ReturnContext {
            out_offset: 0,
            out_size: 0,
            world_snapshot,
            create_address: Some(new_address),
        }),
    });

    Ok(vec![Successor {
        state,
        transition: Transition::CallEnter,
    }])
}

/// `keccak256(rlp([sender, nonce]))[12..]`.
fn create_address(creator: &Address, nonce: u64) -> Address {
    let mut payload = Vec::with_capacity(28);
    payload.push(0x94);
    payload.extend_from_slice(creator.as_bytes());
    if nonce == 0 {
        payload.push(0x80);
    } else if nonce < 0x80 {
        payload.push(nonce as u8);
    } else {
        let be = nonce.to_be_bytes();
        let stripped: Vec<u8> = be.iter().copied().skip_while(|b| *b == 0).collect();
        payload.push(0x80 + stripped.len() as u8);
        payload.extend_from_slice(&stripped);
    }
    let mut rlp = Vec::with_capacity(payload.len() + 1);
    rlp.push(0xc0 + payload.len() as u8);
    rlp.extend_from_slice(&payload);
    let digest = Keccak256::digest(&rlp);
    Address::from_word(&digest).expect("32-byte digest")
}

/// `keccak256(0xff ++ sender ++ salt ++ keccak256(init_code))[12..]`.
fn create2_address(creator: &Address, salt: &[u8], init_code: &[u8]) -> Address {
    let mut preimage = Vec::with_capacity(85);
    preimage.push(0xff);
    preimage.extend_from_slice(creator.as_bytes());
    preimage.extend_from_slice(salt);
    preimage.extend_from_slice(&Keccak256::digest(init_code));
    let digest = Keccak256::digest(&preimage);
    Address::from_word(&digest).expect("32-byte digest")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::tests::{exec_ctx, state_with_code};
    use crate::smt::bv_sym;

    fn push_call_args(state: &mut GlobalState, to: Term) {
        // out_size, out_offset, in_size, in_offset, value, to, gas
        for v in [
            bv(0, 256),
            bv(0, 256),
            bv(0, 256),
            bv(0, 256),
            bv(0, 256),
            to,
            bv(100_000, 256),
        ] {
            state.mstate_mut().push(v).unwrap();
        }
    }

    #[test]
    fn symbolic_callee_degrades_to_fresh_retval() {
        exec_ctx!(ctx, fix);
        let mut state = state_with_code(&[0xf1]);
        push_call_args(&mut state, bv_sym("target", 256));
        let out = exec_call(&mut ctx, state).unwrap();
        assert_eq!(out.len(), 1);
        let retval = out[0].state.mstate().peek(0).unwrap();
        assert!(!retval.is_concrete());
        assert!(retval.symbol_name().unwrap().starts_with("retval_"));
    }

    #[test]
    fn identity_precompile_round_trips() {
        exec_ctx!(ctx, fix);
        let mut state = state_with_code(&[0xf1]);
        state.mstate_mut().memory.write_concrete(0, &[0xde, 0xad]);
        // out_size=2, out_offset=32, in_size=2, in_offset=0, value=0, to=4
        for v in [
            bv(2, 256),
            bv(32, 256),
            bv(2, 256),
            bv(0, 256),
            bv(0, 256),
            bv(4, 256),
            bv(100_000, 256),
        ] {
            state.mstate_mut().push(v).unwrap();
        }
        let out = exec_call(&mut ctx, state).unwrap();
        let mut state = out.into_iter().next().unwrap().state;
        assert_eq!(state.mstate().peek(0).unwrap(), &bv(1, 256));
        assert_eq!(
            state.mstate_mut().memory.try_concrete(32, 2).unwrap(),
            vec![0xde, 0xad]
        );
    }

    #[test]
    fn known_callee_pushes_a_frame() {
        exec_ctx!(ctx, fix);
        let mut state = state_with_code(&[0xf1]);
        let callee = Address::from(5);
        state.world_state.create_account(
            callee,
            "Callee",
            Rc::new(Disassembly::from_bytecode(&[0x00])),
            bv(0, 256),
            true,
        );
        push_call_args(&mut state, bv(5, 256));
        let out = exec_call(&mut ctx, state).unwrap();
        assert!(matches!(out[0].transition, Transition::CallEnter));
        let callee_state = &out[0].state;
        assert_eq!(callee_state.call_depth(), 2);
        assert_eq!(callee_state.env().active_account, callee);
        assert!(!callee_state.env().static_call);
    }

    #[test]
    fn create_address_matches_reference_vector() {
        // Address of the first contract deployed by
        // 0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0 (nonce 0).
        let creator: Address = "0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0"
            .parse()
            .unwrap();
        assert_eq!(
            create_address(&creator, 0).to_string(),
            "0xcd234a471b72ba2f1ccf0a70fcaba648a5eecd8d"
        );
    }
}
