// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Detects reachable assertion violations: the INVALID opcode (pre-0.8
//! assertions and explicit `assert`-style guards) and the Solidity 0.8.x
//! `Panic(0x01)` revert shape.

use laser_shared::issue::{Issue, Severity};
use laser_shared::opcode::Opcode;
use laser_shared::swc;

use crate::executor::transaction::get_transaction_sequence;
use crate::instructions::ExecCtx;
use crate::modules::{DetectionModule, Hook};
use crate::state::GlobalState;

/// `Panic(uint256)` selector.
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];
/// Panic code 0x01: failed `assert`.
const PANIC_ASSERT: u8 = 0x01;

#[derive(Default)]
pub struct Exceptions;

const PRE: &[Opcode] = &[Opcode::INVALID, Opcode::REVERT];

impl DetectionModule for Exceptions {
    fn name(&self) -> &'static str {
        "Assertion violation"
    }

    fn swc_id(&self) -> &'static str {
        swc::ASSERT_VIOLATION
    }

    fn description(&self) -> &'static str {
        "Checks whether any reachable path violates an assertion: a \
         reachable INVALID instruction, or a Panic(0x01) revert emitted by \
         Solidity 0.8.x assert()."
    }

    fn pre_hooks(&self) -> &'static [Opcode] {
        PRE
    }

    fn on_hook(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        hook: Hook,
        state: &mut GlobalState,
    ) -> Vec<Issue> {
        let (opcode, address) = match hook {
            Hook::Pre { opcode, address } => (opcode, address),
            Hook::Post { .. } => return Vec::new(),
        };
        let is_violation = match opcode {
            Opcode::INVALID => true,
            Opcode::REVERT => revert_is_panic_assert(state),
            _ => false,
        };
        if !is_violation {
            return Vec::new();
        }
        let sequence = match get_transaction_sequence(ctx.solver, state, &[]) {
            Some(sequence) => sequence,
            None => return Vec::new(),
        };
        log::debug!("reachable assertion violation at {:#x}", address);
        vec![Issue {
            contract: state
                .world_state
                .account(&state.env().active_account)
                .map(|a| a.contract_name.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            function: state.env().active_function_name.clone(),
            address,
            swc_id: swc::ASSERT_VIOLATION.to_string(),
            severity: Severity::Medium,
            title: "Exception State".to_string(),
            description_head: "An assertion violation was triggered.".to_string(),
            description_tail: "It is possible to trigger an assertion violation. Note that \
                               Solidity assert() statements should only be used to check \
                               invariants; review the transaction sequence to determine \
                               whether the condition is reachable by user input."
                .to_string(),
            gas_used: state.mstate().gas.envelope(),
            transaction_sequence: sequence,
        }]
    }
}

/// Whether the REVERT about to execute carries `Panic(0x01)`: a 36-byte
/// buffer of selector plus code word. Symbolic buffers are not treated as
/// panics.
fn revert_is_panic_assert(state: &mut GlobalState) -> bool {
    let (offset, size) = match (state.mstate().peek(0), state.mstate().peek(1)) {
        (Ok(offset), Ok(size)) => (offset.clone(), size.clone()),
        _ => return false,
    };
    let (offset, size) = match (offset.as_usize(), size.as_usize()) {
        (Some(o), Some(s)) => (o, s),
        _ => return false,
    };
    if size < 36 {
        return false;
    }
    let bytes = match state.mstate_mut().memory.try_concrete(offset, 36) {
        Some(bytes) => bytes,
        None => return false,
    };
    bytes[..4] == PANIC_SELECTOR && bytes[4..35].iter().all(|b| *b == 0) && bytes[35] == PANIC_ASSERT
}
