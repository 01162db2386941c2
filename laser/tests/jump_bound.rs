// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Scenario: a JUMPI whose target is the sum of two calldata words. Target
//! enumeration must stay within `symbolic_calldata_bound` successors instead
//! of exploding.

mod dummy;

use laser::AnalysisConfig;

use dummy::{asm, executor, push1};

fn symbolic_jump_contract() -> Vec<u8> {
    let code = asm(&[
        &[0x5b], // JUMPDEST at 0, a valid enumeration candidate
        &push1(1), // condition: always taken
        &push1(0),
        &[0x35], // CALLDATALOAD word 0
        &push1(0x20),
        &[0x35],             // CALLDATALOAD word 1
        &[0x01],             // ADD: symbolic target
        &[0x57],             // JUMPI
        &[0x00],             // STOP
        &[0x5b, 0x00],       // JUMPDEST; STOP
        &[0x5b, 0x00],       // JUMPDEST; STOP
    ]);
    assert_eq!(code[0], 0x5b);
    code
}

#[test]
fn symbolic_jump_targets_are_bounded() {
    let code = symbolic_jump_contract();
    let bound = 4;
    let mut executor = executor(
        AnalysisConfig::default()
            .with_transaction_count(1)
            .with_symbolic_calldata_bound(bound),
    );
    let result = executor.analyze_runtime(&code, "SymbolicJump").unwrap();

    // The enumeration may not fan out beyond the bound: the entry node plus
    // at most `bound` jump-target nodes and the fall-through.
    let jump_target_nodes = result
        .cfg
        .nodes()
        .iter()
        .filter(|n| n.flags == Default::default() && n.start_addr != 0)
        .count();
    assert!(
        jump_target_nodes <= bound + 1,
        "jump enumeration exploded: {} successor nodes",
        jump_target_nodes
    );
}

#[test]
fn enumerated_targets_must_be_jump_destinations() {
    // Same shape, but no JUMPDEST anywhere: every enumerated model is
    // rejected and only the fall-through survives.
    let code = asm(&[
        &push1(1),
        &push1(0),
        &[0x35],
        &push1(0x20),
        &[0x35],
        &[0x01],
        &[0x57],
        &[0x00],
    ]);
    let mut executor = executor(AnalysisConfig::default().with_transaction_count(1));
    let result = executor.analyze_runtime(&code, "NoDest").unwrap();
    assert!(result
        .cfg
        .nodes()
        .iter()
        .all(|n| n.start_addr == 0 || n.start_addr == usize::MAX || n.flags.function_entry));
}
