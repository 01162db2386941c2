// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use std::time::Duration;

use crate::smt::solver::SolverConfig;
use crate::strategy::StrategyKind;

/// Analysis-level settings. These are engine parameters, not chain
/// parameters; changing them changes coverage and cost, never soundness of
/// emitted witnesses.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Maximum executed instructions per path; longer paths are discarded.
    ///
    /// DEFAULT: 128
    pub max_depth: usize,

    /// Number of symbolic message-call transactions executed after contract
    /// creation.
    ///
    /// DEFAULT: 2
    pub transaction_count: usize,

    /// Maximum call-frame depth inside one transaction.
    ///
    /// DEFAULT: 8
    pub call_depth_limit: usize,

    /// Worklist strategy.
    ///
    /// DEFAULT: depth-first
    pub strategy: StrategyKind,

    /// Per-query solver timeout, in milliseconds.
    ///
    /// DEFAULT: 10_000
    pub solver_timeout_ms: u64,

    /// Budget for the contract-creation transaction, in milliseconds.
    ///
    /// DEFAULT: 10_000
    pub create_timeout_ms: u64,

    /// Budget for the whole analysis, in milliseconds. On expiry the
    /// scheduler drains and partial results are returned with a warning.
    ///
    /// DEFAULT: 86_400_000 (effectively unbounded)
    pub execution_timeout_ms: u64,

    /// How many concrete models to enumerate when a jump target is
    /// symbolic; each model becomes one successor.
    ///
    /// DEFAULT: 4
    pub symbolic_calldata_bound: usize,

    /// Hint forwarded to the solver backend.
    ///
    /// DEFAULT: false
    pub parallel_solving: bool,

    /// Disables the constraint-independence optimisation in the solver
    /// gateway.
    ///
    /// DEFAULT: false
    pub disable_dependency_pruning: bool,

    /// When set, unwritten storage slots read zero (fresh-deployment
    /// posture). Otherwise they are unconstrained symbols (arbitrary
    /// pre-state posture).
    ///
    /// DEFAULT: true
    pub concrete_storage_default: bool,

    /// Gas limit assumed per transaction when building the gas envelope.
    ///
    /// DEFAULT: 8_000_000
    pub tx_gas_limit: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            max_depth: 128,
            transaction_count: 2,
            call_depth_limit: 8,
            strategy: StrategyKind::DepthFirst,
            solver_timeout_ms: 10_000,
            create_timeout_ms: 10_000,
            execution_timeout_ms: 86_400_000,
            symbolic_calldata_bound: 4,
            parallel_solving: false,
            disable_dependency_pruning: false,
            concrete_storage_default: true,
            tx_gas_limit: 8_000_000,
        }
    }
}

impl AnalysisConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_transaction_count(mut self, count: usize) -> Self {
        self.transaction_count = count;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_symbolic_calldata_bound(mut self, bound: usize) -> Self {
        self.symbolic_calldata_bound = bound;
        self
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn solver_config(&self) -> SolverConfig {
        SolverConfig {
            timeout: Duration::from_millis(self.solver_timeout_ms),
            parallel_solving: self.parallel_solving,
            disable_dependency_pruning: self.disable_dependency_pruning,
        }
    }
}
