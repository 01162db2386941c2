// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::error::{ExecutionError, Result};
use crate::instructions::{cont, ExecCtx, Successor};
use crate::smt::bv_from_biguint;
use crate::state::GlobalState;

/// The active account's address as a 256-bit term, for transient-storage
/// keys.
fn active_address_term(state: &GlobalState) -> crate::smt::Term {
    bv_from_biguint(state.env().active_account.to_biguint(), 256)
}

pub fn exec_sload(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let key = state.mstate_mut().pop()?;
    let address = state.env().active_account;
    let value = match state.world_state.account(&address) {
        Some(account) => account.storage.read(&key),
        None => {
            return Err(ExecutionError::Fatal(anyhow::anyhow!(
                "SLOAD from unmodelled account {}",
                address
            )))
        }
    };
    state.mstate_mut().push(value)?;
    cont(state)
}

pub fn exec_sstore(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    if state.env().static_call {
        return Err(ExecutionError::WriteProtection);
    }
    let m = state.mstate_mut();
    let key = m.pop()?;
    let value = m.pop()?;
    let address = state.env().active_account;
    match state.world_state.account_mut(&address) {
        Some(account) => account.storage.write(&key, &value),
        None => {
            return Err(ExecutionError::Fatal(anyhow::anyhow!(
                "SSTORE to unmodelled account {}",
                address
            )))
        }
    }
    cont(state)
}

pub fn exec_tload(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let key = state.mstate_mut().pop()?;
    let address = active_address_term(&state);
    let value = state.world_state.transient_storage.get(&address, &key);
    state.mstate_mut().push(value)?;
    cont(state)
}

pub fn exec_tstore(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    if state.env().static_call {
        return Err(ExecutionError::WriteProtection);
    }
    let m = state.mstate_mut();
    let key = m.pop()?;
    let value = m.pop()?;
    let address = active_address_term(&state);
    state
        .world_state
        .transient_storage
        .set(&address, &key, value);
    cont(state)
}
