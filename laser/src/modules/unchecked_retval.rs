// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Detects external calls whose return value is never checked. For direct
//! Solidity calls the compiler inserts an `ISZERO`/revert sequence; for
//! low-level calls it does not, and a callee failure continues silently in
//! the caller.

use std::any::Any;

use laser_shared::issue::{Issue, Severity};
use laser_shared::opcode::Opcode;
use laser_shared::swc;

use crate::executor::transaction::get_transaction_sequence;
use crate::instructions::ExecCtx;
use crate::modules::{DetectionModule, Hook};
use crate::smt::{bv, Term};
use crate::state::{GlobalState, StateAnnotation};

/// One recorded call result on the current path.
#[derive(Debug, Clone)]
struct RetVal {
    /// Byte address just past the call instruction (where the unchecked
    /// value becomes observable).
    address: usize,
    retval: Term,
}

/// Per-path scratchpad: the call results seen so far.
#[derive(Debug, Default)]
struct UncheckedRetvalAnnotation {
    retvals: Vec<RetVal>,
}

impl StateAnnotation for UncheckedRetvalAnnotation {
    fn clone_on_fork(&self) -> Box<dyn StateAnnotation> {
        Box::new(UncheckedRetvalAnnotation {
            retvals: self.retvals.clone(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Default)]
pub struct UncheckedRetval;

const PRE: &[Opcode] = &[Opcode::STOP, Opcode::RETURN];
const POST: &[Opcode] = &[
    Opcode::CALL,
    Opcode::DELEGATECALL,
    Opcode::STATICCALL,
    Opcode::CALLCODE,
];

impl DetectionModule for UncheckedRetval {
    fn name(&self) -> &'static str {
        "Return value of an external call is not checked"
    }

    fn swc_id(&self) -> &'static str {
        swc::UNCHECKED_RET_VAL
    }

    fn description(&self) -> &'static str {
        "Test whether CALL return value is checked. For direct calls the \
         Solidity compiler auto-generates this check; for low-level calls \
         (call/delegatecall/staticcall) it is omitted."
    }

    fn pre_hooks(&self) -> &'static [Opcode] {
        PRE
    }

    fn post_hooks(&self) -> &'static [Opcode] {
        POST
    }

    fn on_hook(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        hook: Hook,
        state: &mut GlobalState,
    ) -> Vec<Issue> {
        match hook {
            Hook::Post { address, .. } => {
                log::debug!("end of call at {:#x}, extracting retval", address);
                let retval = match state.mstate().peek(0) {
                    Ok(term) => term.clone(),
                    Err(_) => return Vec::new(),
                };
                let annotation = state.annotation_or_default::<UncheckedRetvalAnnotation>();
                annotation.retvals.push(RetVal {
                    address: address + 1,
                    retval,
                });
                Vec::new()
            }
            Hook::Pre { .. } => self.check_retvals(ctx, state),
        }
    }
}

impl UncheckedRetval {
    /// At STOP/RETURN: any recorded call result that can still be both 0 and
    /// 1 under the path constraints was never checked.
    fn check_retvals(&self, ctx: &mut ExecCtx<'_>, state: &mut GlobalState) -> Vec<Issue> {
        let retvals = match state.get_annotation::<UncheckedRetvalAnnotation>() {
            Some(annotation) => annotation.retvals.clone(),
            None => return Vec::new(),
        };
        let mut issues = Vec::new();
        for entry in retvals {
            let can_be_one = entry.retval.eq_term(&bv(1, 256));
            let can_be_zero = entry.retval.eq_term(&bv(0, 256));
            if get_transaction_sequence(ctx.solver, state, &[can_be_one]).is_none() {
                continue;
            }
            let sequence = match get_transaction_sequence(ctx.solver, state, &[can_be_zero]) {
                Some(sequence) => sequence,
                None => continue,
            };
            issues.push(Issue {
                contract: contract_name(state),
                function: state.env().active_function_name.clone(),
                address: entry.address,
                swc_id: swc::UNCHECKED_RET_VAL.to_string(),
                severity: Severity::Medium,
                title: "Unchecked return value from external call.".to_string(),
                description_head: "The return value of a message call is not checked."
                    .to_string(),
                description_tail: "External calls return a boolean value. If the callee halts \
                                   with an exception, 'false' is returned and execution \
                                   continues in the caller. The caller should check whether an \
                                   exception happened and react accordingly, e.g. by wrapping \
                                   the call in require()."
                    .to_string(),
                gas_used: state.mstate().gas.envelope(),
                transaction_sequence: sequence,
            });
        }
        issues
    }
}

fn contract_name(state: &GlobalState) -> String {
    state
        .world_state
        .account(&state.env().active_account)
        .map(|a| a.contract_name.clone())
        .unwrap_or_else(|| "unknown".to_string())
}
