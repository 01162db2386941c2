// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Scenario: a reachable `assert(false)` compiled by Solidity 0.8.x, i.e. a
//! `Panic(0x01)` revert, must surface as an assertion-violation issue.

mod dummy;

use laser::AnalysisConfig;
use laser_shared::swc;

use dummy::{asm, executor, push1};

/// The code shape solc 0.8.x emits for `assert(false)`: store the
/// `Panic(uint256)` selector and code 0x01, then revert the 36-byte buffer.
fn panic_assert_contract() -> Vec<u8> {
    let mut selector_word = vec![0x7f]; // PUSH32
    selector_word.extend_from_slice(&[0x4e, 0x48, 0x7b, 0x71]);
    selector_word.extend_from_slice(&[0u8; 28]);
    asm(&[
        &selector_word,
        &push1(0),
        &[0x52], // MSTORE: selector at bytes 0..4
        &push1(1),
        &push1(4),
        &[0x52], // MSTORE: panic code 0x01 at bytes 4..36
        &push1(0x24),
        &push1(0),
        &[0xfd], // REVERT(0, 36)
    ])
}

#[test]
fn assertion_violation_is_reported() {
    let code = panic_assert_contract();
    let revert_address = code.len() - 1;

    let mut executor = executor(AnalysisConfig::default().with_transaction_count(1));
    let result = executor.analyze_runtime(&code, "Asserts").unwrap();

    let issue = result
        .issues
        .iter()
        .find(|i| i.swc_id == swc::ASSERT_VIOLATION)
        .expect("assertion-violation issue emitted");
    assert!(issue.description_head.contains("assertion violation"));
    assert_eq!(issue.address, revert_address);
}

#[test]
fn reachable_invalid_opcode_is_reported() {
    // Pre-0.8 assertions compile to INVALID.
    let code = [0xfe];
    let mut executor = executor(AnalysisConfig::default().with_transaction_count(1));
    let result = executor.analyze_runtime(&code, "Asserts").unwrap();
    assert!(result
        .issues
        .iter()
        .any(|i| i.swc_id == swc::ASSERT_VIOLATION));
}

#[test]
fn plain_revert_is_not_an_assertion() {
    // REVERT with an empty buffer: require()-style, no issue.
    let code = asm(&[&push1(0), &push1(0), &[0xfd]]);
    let mut executor = executor(AnalysisConfig::default().with_transaction_count(1));
    let result = executor.analyze_runtime(&code, "Reverts").unwrap();
    assert!(result
        .issues
        .iter()
        .all(|i| i.swc_id != swc::ASSERT_VIOLATION));
}
