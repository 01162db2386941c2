// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use laser_shared::address::Address;
use laser_shared::disasm::Disassembly;

use crate::error::{ExecutionError, Result};
use crate::instructions::{
    concrete_usize, cont, current_op, truthy, ExecCtx, Successor, Transition,
};
use crate::smt::{bv, bv_from_biguint, SatResult, Term};
use crate::state::GlobalState;

pub fn exec_jumpdest(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    cont(state)
}

pub fn exec_pc(_ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let (_, address, _) = current_op(&state);
    state.mstate_mut().push(bv(address as u64, 256))?;
    cont(state)
}

/// Remaining gas is not a single number under an envelope model; GAS pushes
/// a fresh symbol.
pub fn exec_gas(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let value = ctx.counters.fresh_bv("gas", 256);
    state.mstate_mut().push(value)?;
    cont(state)
}

/// Resolves a jump target to instruction indices. A concrete target must be
/// a JUMPDEST; a symbolic target is enumerated through the solver up to the
/// configured bound, one successor per model.
fn jump_targets(
    ctx: &mut ExecCtx<'_>,
    state: &GlobalState,
    target: &Term,
    extra_condition: Option<&Term>,
) -> Result<Vec<(usize, Option<Term>)>> {
    let code = state.env().code.clone();
    if let Some(addr) = target.as_usize() {
        if !code.is_jump_destination(addr) {
            return Err(ExecutionError::InvalidJump(format!("{:#x}", addr)));
        }
        let index = code
            .index_of_address(addr)
            .expect("jump destinations are decoded instructions");
        return Ok(vec![(index, None)]);
    }

    // Symbolic target: ask the solver for concrete candidates, excluding
    // each found value before asking again.
    let mut found: Vec<(usize, Option<Term>)> = Vec::new();
    let mut exclusions: Vec<Term> = extra_condition.cloned().into_iter().collect();
    loop {
        if found.len() >= ctx.config.symbolic_calldata_bound {
            ctx.warn(format!(
                "symbolic jump target: model bound {} reached, discarding remaining targets",
                ctx.config.symbolic_calldata_bound
            ));
            break;
        }
        let model = match ctx
            .solver
            .check_with(&state.world_state.constraints, &exclusions)
        {
            SatResult::Sat(model) => model,
            SatResult::Unsat | SatResult::Unknown => break,
        };
        let value = match model.eval(target).and_then(|t| t.as_biguint().cloned()) {
            Some(v) => v,
            None => break,
        };
        let candidate = bv_from_biguint(value.clone(), 256);
        exclusions.push(target.ne_term(&candidate));
        let addr = match usize::try_from(&value) {
            Ok(a) => a,
            Err(_) => continue,
        };
        if let Some(index) = code.index_of_address(addr) {
            if code.is_jump_destination(addr) {
                found.push((index, Some(target.eq_term(&candidate))));
            }
        }
        // Non-JUMPDEST candidates fail that branch silently; other models
        // may still be valid.
    }
    Ok(found)
}

pub fn exec_jump(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let target = state.mstate_mut().pop()?;
    let targets = jump_targets(ctx, &state, &target, None)?;
    let mut successors = Vec::with_capacity(targets.len());
    for (index, constraint) in targets {
        let mut next = state.clone();
        if let Some(c) = &constraint {
            next.world_state.constraints.push(c.clone());
        }
        next.mstate_mut().pc = index;
        successors.push(Successor {
            state: next,
            transition: Transition::JumpTaken { condition: None },
        });
    }
    Ok(successors)
}

/// JUMPI. The fall-through successor precedes the taken successor, matching
/// the engine's ordering guarantee; both sides carry their branch condition
/// in the path constraints, and structurally dead or solver-refuted sides
/// are dropped.
pub fn exec_jumpi(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let target = m.pop()?;
    let condition = m.pop()?;
    let cond = truthy(&condition);

    let mut successors = Vec::with_capacity(2);

    // Fall-through side.
    let negated = cond.not();
    if negated.as_bool() != Some(false) {
        let mut fall = state.clone();
        fall.world_state.constraints.push(negated.clone());
        if feasible(ctx, &fall) {
            fall.mstate_mut().pc += 1;
            successors.push(Successor {
                state: fall,
                transition: Transition::FallThrough { condition: negated },
            });
        }
    }

    // Taken side. An invalid concrete target kills only this arm; the
    // fall-through above is a different path and stays alive.
    if cond.as_bool() != Some(false) {
        let targets = match jump_targets(ctx, &state, &target, Some(&cond)) {
            Ok(targets) => targets,
            Err(ExecutionError::InvalidJump(t)) => {
                log::trace!("JUMPI to invalid destination {}", t);
                Vec::new()
            }
            Err(other) => return Err(other),
        };
        for (index, target_constraint) in targets {
            let mut taken = state.clone();
            taken.world_state.constraints.push(cond.clone());
            if let Some(c) = &target_constraint {
                taken.world_state.constraints.push(c.clone());
            }
            if feasible(ctx, &taken) {
                taken.mstate_mut().pc = index;
                successors.push(Successor {
                    state: taken,
                    transition: Transition::JumpTaken {
                        condition: Some(cond.clone()),
                    },
                });
            }
        }
    }

    Ok(successors)
}

/// A state is kept unless its constraints are structurally false or the
/// solver proves them unsatisfiable. `Unknown` keeps the state: dropping an
/// undecided path would silently lose coverage.
fn feasible(ctx: &mut ExecCtx<'_>, state: &GlobalState) -> bool {
    if !state.world_state.constraints.is_possible() {
        return false;
    }
    !matches!(
        ctx.solver.check(&state.world_state.constraints),
        SatResult::Unsat
    )
}

pub fn exec_stop(ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    finish_frame(ctx, state, Vec::new(), false)
}

pub fn exec_return(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let offset = m.pop()?;
    let size = m.pop()?;
    let data = match (
        concrete_usize(ctx, "RETURN offset", &offset),
        concrete_usize(ctx, "RETURN size", &size),
    ) {
        (Some(o), Some(s)) => state.mstate_mut().memory.read_bytes(o, s),
        _ => Vec::new(),
    };
    finish_frame(ctx, state, data, false)
}

pub fn exec_revert(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    let m = state.mstate_mut();
    let offset = m.pop()?;
    let size = m.pop()?;
    let data = match (
        concrete_usize(ctx, "REVERT offset", &offset),
        concrete_usize(ctx, "REVERT size", &size),
    ) {
        (Some(o), Some(s)) => state.mstate_mut().memory.read_bytes(o, s),
        _ => Vec::new(),
    };
    finish_frame(ctx, state, data, true)
}

/// INVALID (and any unassigned byte) halts the path: no successors, state
/// dropped. Detection modules interested in reachable INVALIDs observe it
/// through their pre-hooks before the halt.
pub fn exec_invalid(_ctx: &mut ExecCtx<'_>, _state: GlobalState) -> Result<Vec<Successor>> {
    Ok(Vec::new())
}

pub fn exec_unassigned(_ctx: &mut ExecCtx<'_>, state: GlobalState) -> Result<Vec<Successor>> {
    let (op, _, _) = current_op(&state);
    Err(ExecutionError::InvalidOpcode(op.0))
}

pub fn exec_selfdestruct(ctx: &mut ExecCtx<'_>, mut state: GlobalState) -> Result<Vec<Successor>> {
    if state.env().static_call {
        return Err(ExecutionError::WriteProtection);
    }
    let beneficiary = state.mstate_mut().pop()?;
    let address = state.env().active_account;
    let balance = state
        .world_state
        .account(&address)
        .map(|a| a.balance.clone())
        .unwrap_or_else(|| bv(0, 256));
    if let Some(b) = beneficiary.as_biguint() {
        let beneficiary_addr = Address::from(b);
        if let Some(target) = state.world_state.account_mut(&beneficiary_addr) {
            target.balance = target.balance.add(&balance);
        }
    }
    if let Some(account) = state.world_state.account_mut(&address) {
        account.balance = bv(0, 256);
        account.deleted = true;
    }
    finish_frame(ctx, state, Vec::new(), false)
}

/// Pops the finished frame and resumes the caller, or flags transaction
/// completion when the entry frame halts. On revert the world rolls back to
/// the call-time snapshot, except the path constraints and transaction
/// history, which only ever grow.
pub(crate) fn finish_frame(
    _ctx: &mut ExecCtx<'_>,
    mut state: GlobalState,
    return_data: Vec<Term>,
    reverted: bool,
) -> Result<Vec<Successor>> {
    if state.is_entry_frame() {
        state.frame_mut().mstate.last_return_data = Some(return_data);
        return Ok(vec![Successor {
            state,
            transition: Transition::TransactionEnd { reverted },
        }]);
    }

    let finished = state.pop_frame()?;
    let return_ctx = finished
        .return_ctx
        .expect("non-entry frames carry a return context");

    if reverted {
        let constraints = state.world_state.constraints.clone();
        let sequence = state.world_state.transaction_sequence.clone();
        state.world_state = return_ctx.world_snapshot.clone();
        state.world_state.constraints = constraints;
        state.world_state.transaction_sequence = sequence;
    }

    if return_ctx.create_address.is_some() {
        if reverted {
            state.mstate_mut().push(bv(0, 256))?;
        } else {
            let address = return_ctx
                .create_address
                .expect("create frames know their address");
            // The constructor's return value is the runtime code.
            let concrete: Option<Vec<u8>> = return_data
                .iter()
                .map(|t| t.as_u64().map(|v| v as u8))
                .collect();
            if let Some(bytes) = concrete {
                if let Some(account) = state.world_state.account_mut(&address) {
                    account.code = std::rc::Rc::new(Disassembly::from_bytecode(&bytes));
                }
            }
            state
                .mstate_mut()
                .push(bv_from_biguint(address.to_biguint(), 256))?;
        }
    } else {
        let n = return_ctx.out_size.min(return_data.len());
        state
            .mstate_mut()
            .memory
            .write_bytes(return_ctx.out_offset, &return_data[..n]);
        state
            .mstate_mut()
            .push(bv(if reverted { 0 } else { 1 }, 256))?;
    }
    state.mstate_mut().last_return_data = Some(return_data);

    Ok(vec![Successor {
        state,
        transition: Transition::CallReturn,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::tests::{exec_ctx, state_with_code};
    use crate::smt::bv_sym;

    #[test]
    fn concrete_jump_needs_a_jumpdest() {
        exec_ctx!(ctx, fix);
        // PUSH1 0x03 JUMP JUMPDEST STOP
        let mut state = state_with_code(&[0x60, 0x03, 0x56, 0x5b, 0x00]);
        state.mstate_mut().pc = 1;
        state.mstate_mut().push(bv(3, 256)).unwrap();
        let out = exec_jump(&mut ctx, state).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].state.mstate().pc, 2);

        let mut state = state_with_code(&[0x60, 0x04, 0x56, 0x5b, 0x00]);
        state.mstate_mut().pc = 1;
        state.mstate_mut().push(bv(4, 256)).unwrap();
        assert!(matches!(
            exec_jump(&mut ctx, state),
            Err(ExecutionError::InvalidJump(_))
        ));
    }

    #[test]
    fn jumpi_forks_with_fall_through_first() {
        exec_ctx!(ctx, fix);
        // JUMPI ... JUMPDEST at byte 4.
        let mut state = state_with_code(&[0x57, 0x00, 0x00, 0x00, 0x5b, 0x00]);
        state.mstate_mut().push(bv_sym("cond", 256)).unwrap();
        state.mstate_mut().push(bv(4, 256)).unwrap();
        let out = exec_jumpi(&mut ctx, state).unwrap();
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0].transition, Transition::FallThrough { .. }));
        assert!(matches!(out[1].transition, Transition::JumpTaken { .. }));
        assert_eq!(out[0].state.mstate().pc, 1);
        assert_eq!(out[1].state.mstate().pc, 4); // instruction index of the JUMPDEST
        // Both sides extended their constraints.
        assert_eq!(out[0].state.world_state.constraints.len(), 1);
        assert_eq!(out[1].state.world_state.constraints.len(), 1);
    }

    #[test]
    fn jumpi_with_concrete_condition_does_not_fork() {
        exec_ctx!(ctx, fix);
        let mut state = state_with_code(&[0x57, 0x00, 0x00, 0x00, 0x5b, 0x00]);
        state.mstate_mut().push(bv(0, 256)).unwrap();
        state.mstate_mut().push(bv(4, 256)).unwrap();
        let out = exec_jumpi(&mut ctx, state).unwrap();
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].transition, Transition::FallThrough { .. }));
    }

    #[test]
    fn invalid_halts_without_successors() {
        exec_ctx!(ctx, fix);
        let state = state_with_code(&[0xfe]);
        let out = exec_invalid(&mut ctx, state).unwrap();
        assert!(out.is_empty());
    }
}
