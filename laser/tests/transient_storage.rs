// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Scenario: code that treats TSTORE'd state as persistent. The guard
//! `tload(0) == 1` can never hold at the start of a later transaction
//! because the journal clears at the boundary, so the unguarded branch (an
//! INVALID trap) stays reachable in every transaction.

mod dummy;

use laser::AnalysisConfig;
use laser_shared::swc;

use dummy::{asm, executor, push1};

/// ```text
/// if calldataload(0) == 1 { tstore(0, 1); stop }      // "arm the lock"
/// else if tload(0) == 1 { stop }                       // assumed-armed path
/// else { invalid }                                     // vulnerable branch
/// ```
fn transient_lock_contract() -> Vec<u8> {
    let code = asm(&[
        &push1(0),
        &[0x35], // CALLDATALOAD
        &push1(1),
        &[0x14],     // EQ
        &push1(19),  // SET
        &[0x57],     // JUMPI
        &push1(0),
        &[0x5c], // TLOAD
        &push1(1),
        &[0x14],    // EQ
        &push1(26), // OK
        &[0x57],    // JUMPI
        &[0xfe],    // INVALID: reachable whenever the journal is clear
        &[0x5b],    // SET: JUMPDEST
        &push1(1),
        &push1(0),
        &[0x5d], // TSTORE
        &[0x00], // STOP
        &[0x5b], // OK: JUMPDEST
        &[0x00], // STOP
    ]);
    assert_eq!(code[19], 0x5b);
    assert_eq!(code[26], 0x5b);
    code
}

#[test]
fn transient_lock_does_not_survive_the_boundary() {
    let code = transient_lock_contract();
    let invalid_address = 18;
    assert_eq!(code[invalid_address], 0xfe);

    // Two transactions: the first can arm the lock, the second starts with a
    // cleared journal and must still reach the trap.
    let mut executor = executor(AnalysisConfig::default().with_transaction_count(2));
    let result = executor.analyze_runtime(&code, "TransientLock").unwrap();

    let issue = result
        .issues
        .iter()
        .find(|i| i.swc_id == swc::ASSERT_VIOLATION)
        .expect("the trap behind the transient guard is reachable");
    assert_eq!(issue.address, invalid_address);
    assert!(issue.description_head.contains("assertion violation"));
}
