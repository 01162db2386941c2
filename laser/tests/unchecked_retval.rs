// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Scenario: a contract forwards a call to an address taken from calldata
//! and never checks the result. The unchecked-return-value module must flag
//! the instruction just past the CALL and attach a witness transaction
//! sequence.

mod dummy;

use laser::AnalysisConfig;
use laser_shared::issue::Severity;
use laser_shared::swc;

use dummy::{asm, executor, push1};

/// `target.call(...)` with the target read from calldata, then STOP.
fn unchecked_call_contract() -> Vec<u8> {
    asm(&[
        &push1(0), // out size
        &push1(0), // out offset
        &push1(0), // in size
        &push1(0), // in offset
        &push1(0), // value
        &push1(0),
        &[0x35],             // CALLDATALOAD: symbolic target
        &[0x61, 0x10, 0x00], // PUSH2 0x1000: gas
        &[0xf1],             // CALL
        &[0x00],             // STOP, retval never inspected
    ])
}

#[test]
fn unchecked_call_is_flagged() {
    let code = unchecked_call_contract();
    let call_address = code.len() - 2;

    let mut executor = executor(AnalysisConfig::default().with_transaction_count(1));
    let result = executor.analyze_runtime(&code, "Caller").unwrap();

    let issue = result
        .issues
        .iter()
        .find(|i| i.swc_id == swc::UNCHECKED_RET_VAL)
        .expect("unchecked-retval issue emitted");
    assert_eq!(issue.severity, Severity::Medium);
    assert_eq!(issue.address, call_address + 1);
    assert_eq!(issue.contract, "Caller");
    assert!(!issue.transaction_sequence.is_empty());
}

#[test]
fn checked_call_is_not_flagged() {
    // Same body, but the result feeds a JUMPI guard that reverts on zero:
    // the taken/fall-through constraints pin the retval, so it can no longer
    // be both 0 and 1 at the path's end.
    let code = asm(&[
        &push1(0),
        &push1(0),
        &push1(0),
        &push1(0),
        &push1(0),
        &push1(0),
        &[0x35],
        &[0x61, 0x10, 0x00],
        &[0xf1],       // CALL
        &push1(25),    // jump target: the JUMPDEST below
        &[0x57],       // JUMPI on the retval
        &push1(0),
        &push1(0),
        &[0xfd],       // REVERT when the call failed
        &[0x5b, 0x00], // JUMPDEST; STOP
    ]);
    assert_eq!(code[25], 0x5b);

    let mut executor = executor(AnalysisConfig::default().with_transaction_count(1));
    let result = executor.analyze_runtime(&code, "Caller").unwrap();

    assert!(
        result
            .issues
            .iter()
            .all(|i| i.swc_id != swc::UNCHECKED_RET_VAL),
        "guarded call must not be flagged: {:?}",
        result.issues
    );
}
