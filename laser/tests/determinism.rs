// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Engine-level properties: identical inputs give identical findings, and
//! the depth bound caps every explored path.

mod dummy;

use laser::{AnalysisConfig, StrategyKind};

use dummy::{asm, executor, push1};

fn sample_contract() -> Vec<u8> {
    // An unchecked forwarded call plus a conditional trap: enough structure
    // to exercise forking, calls and issue emission.
    asm(&[
        &push1(0),
        &push1(0),
        &push1(0),
        &push1(0),
        &push1(0),
        &push1(0),
        &[0x35],
        &[0x61, 0x10, 0x00],
        &[0xf1], // CALL
        &push1(0x20),
        &[0x35], // CALLDATALOAD word 1
        &push1(24),
        &[0x57],       // JUMPI
        &[0x00],       // STOP
        &[0x5b, 0xfe], // JUMPDEST; INVALID
    ])
}

#[test]
fn issue_multiset_is_stable_across_runs() {
    let code = sample_contract();
    let run = || {
        let mut executor = executor(AnalysisConfig::default().with_transaction_count(2));
        let mut result = executor.analyze_runtime(&code, "Sample").unwrap();
        result
            .issues
            .sort_by(|a, b| (&a.swc_id, a.address).cmp(&(&b.swc_id, b.address)));
        result
    };
    let first = run();
    let second = run();

    assert!(!first.issues.is_empty());
    assert_eq!(first.issues, second.issues);
    assert_eq!(first.cfg.nodes().len(), second.cfg.nodes().len());
    assert_eq!(first.cfg.edges().len(), second.cfg.edges().len());
}

#[test]
fn exploration_order_changes_but_findings_do_not() {
    let code = sample_contract();
    let issues_with = |strategy: StrategyKind| {
        let mut executor = executor(
            AnalysisConfig::default()
                .with_transaction_count(1)
                .with_strategy(strategy),
        );
        let mut result = executor.analyze_runtime(&code, "Sample").unwrap();
        result
            .issues
            .sort_by(|a, b| (&a.swc_id, a.address).cmp(&(&b.swc_id, b.address)));
        result.issues
    };
    assert_eq!(
        issues_with(StrategyKind::DepthFirst),
        issues_with(StrategyKind::BreadthFirst)
    );
    assert_eq!(
        issues_with(StrategyKind::DepthFirst),
        issues_with(StrategyKind::DelayConstraint)
    );
}

#[test]
fn depth_bound_caps_every_path() {
    // An unconditional self-loop; without the depth bound this never ends.
    let code = asm(&[&[0x5b], &push1(0), &[0x56]]); // JUMPDEST; PUSH1 0; JUMP
    let max_depth = 40;
    let mut executor = executor(
        AnalysisConfig::default()
            .with_transaction_count(1)
            .with_max_depth(max_depth),
    );
    let result = executor.analyze_runtime(&code, "Loop").unwrap();
    for node in result.cfg.nodes() {
        assert!(
            node.max_path_length <= max_depth,
            "node {} reports path length {}",
            node.id,
            node.max_path_length
        );
    }
}
