// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Transaction records and witness extraction. Each executed transaction
//! leaves a record of its symbolic inputs on the world state; when a
//! detector wants to prove a finding reachable, the records are concretised
//! against a solver model into a replayable [`WitnessTransaction`] sequence.

use num_bigint::BigUint;
use num_traits::Zero;

use laser_shared::address::Address;
use laser_shared::issue::WitnessTransaction;

use crate::smt::solver::Model;
use crate::smt::{SatResult, Solver, Term};
use crate::state::{Calldata, GlobalState};

/// How a transaction entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    /// Constructor execution; the return value becomes runtime code.
    ContractCreation,
    /// A message call against deployed code.
    MessageCall,
}

/// The symbolic inputs of one executed transaction.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    /// Sequence number, also the namespace of the transaction's symbols
    /// (`{id}_calldata_0`, `{id}_caller`, ...).
    pub id: String,
    pub kind: TxKind,
    pub caller: Term,
    pub callee: Address,
    pub call_value: Term,
    pub calldata: Calldata,
}

/// Longest calldata reconstructed from a model; symbolic sizes beyond this
/// are clamped.
const WITNESS_CALLDATA_BOUND: usize = 512;

/// Proves `state`'s path (plus `extra` conditions) reachable and renders the
/// transaction sequence that gets there. `None` means the solver refuted the
/// query; `Unknown` is treated as reachable with a best-effort model, the
/// pessimistic policy for safety detectors.
pub fn get_transaction_sequence(
    solver: &mut Solver,
    state: &GlobalState,
    extra: &[Term],
) -> Option<Vec<WitnessTransaction>> {
    let model = match solver.check_with(&state.world_state.constraints, extra) {
        SatResult::Sat(model) => model,
        SatResult::Unknown => Model::default(),
        SatResult::Unsat => return None,
    };
    Some(
        state
            .world_state
            .transaction_sequence
            .iter()
            .map(|record| concretise(record, &model))
            .collect(),
    )
}

fn concretise(record: &TransactionRecord, model: &Model) -> WitnessTransaction {
    let caller = eval_biguint(model, &record.caller);
    let call_value = eval_biguint(model, &record.call_value);
    WitnessTransaction {
        caller: Address::from(&caller),
        callee: record.callee,
        call_value,
        calldata: concretise_calldata(record, model),
    }
}

fn eval_biguint(model: &Model, term: &Term) -> BigUint {
    model
        .eval(term)
        .and_then(|t| t.as_biguint().cloned())
        .unwrap_or_else(BigUint::zero)
}

fn concretise_calldata(record: &TransactionRecord, model: &Model) -> Vec<u8> {
    match &record.calldata {
        Calldata::Concrete { bytes } => bytes.clone(),
        Calldata::Terms { bytes } => bytes
            .iter()
            .map(|t| {
                model
                    .eval(t)
                    .and_then(|t| t.as_u64())
                    .unwrap_or(0) as u8
            })
            .collect(),
        Calldata::Symbolic { tx_id } => {
            let size = model
                .get(&format!("{}_calldatasize", tx_id))
                .and_then(|t| t.as_usize())
                .unwrap_or(0)
                .min(WITNESS_CALLDATA_BOUND);
            (0..size)
                .map(|i| {
                    model
                        .get(&Calldata::byte_symbol_name(tx_id, i))
                        .and_then(|t| t.as_u64())
                        .unwrap_or(0) as u8
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::smt::{bv, bv_sym};

    #[test]
    fn symbolic_calldata_concretises_from_the_model() {
        let record = TransactionRecord {
            id: "2".to_string(),
            kind: TxKind::MessageCall,
            caller: bv_sym("2_caller", 256),
            callee: Address::from(0xaa),
            call_value: bv(0, 256),
            calldata: Calldata::symbolic("2"),
        };
        let mut assignments = HashMap::new();
        assignments.insert("2_calldatasize".to_string(), bv(2, 256));
        assignments.insert("2_calldata_0".to_string(), bv(0xde, 8));
        assignments.insert("2_calldata_1".to_string(), bv(0xad, 8));
        assignments.insert("2_caller".to_string(), bv(0x99, 256));
        let model = Model::new(assignments);
        let witness = concretise(&record, &model);
        assert_eq!(witness.calldata, vec![0xde, 0xad]);
        assert_eq!(witness.caller, Address::from(0x99));
    }

    #[test]
    fn unassigned_symbols_default_to_zero() {
        let record = TransactionRecord {
            id: "1".to_string(),
            kind: TxKind::MessageCall,
            caller: bv_sym("1_caller", 256),
            callee: Address::from(0xaa),
            call_value: bv_sym("1_value", 256),
            calldata: Calldata::symbolic("1"),
        };
        let witness = concretise(&record, &Model::default());
        assert_eq!(witness.caller, Address::ZERO);
        assert_eq!(witness.call_value, BigUint::zero());
        assert!(witness.calldata.is_empty());
    }
}
