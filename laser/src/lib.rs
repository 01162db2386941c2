// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! A LASER-style symbolic execution engine for EVM bytecode.
//!
//! The engine explores the reachable states of a contract by running its
//! bytecode over symbolic values: machine words are terms in the
//! quantifier-free bit-vector + array theory ([`smt`]), branches fork the
//! [`state::GlobalState`] with the branch condition appended to the path
//! constraints, and an external SMT solver (behind
//! [`smt::solver::SolverBackend`]) answers reachability questions.
//! Pluggable detection modules ([`modules`]) observe execution through
//! opcode hooks and emit [`laser_shared::issue::Issue`]s with concrete
//! witness transaction sequences.
//!
//! The usual entry point is [`LaserExecutor`]:
//!
//! ```ignore
//! let mut executor = LaserExecutor::new(AnalysisConfig::default(), backend);
//! for module in default_modules() {
//!     executor.register_module(module);
//! }
//! let result = executor.analyze_runtime(&runtime_code, "MyContract")?;
//! ```

pub mod cfg;
pub mod error;
pub mod executor;
pub mod gas;
pub mod instructions;
pub mod machine;
pub mod modules;
pub mod natives;
pub mod smt;
pub mod state;
pub mod strategy;

pub use error::{ExecutionError, Result};
pub use executor::{AnalysisResult, LaserExecutor};
pub use machine::AnalysisConfig;
pub use strategy::StrategyKind;

use modules::DetectionModule;

/// The detection modules shipped with the engine.
pub fn default_modules() -> Vec<Box<dyn DetectionModule>> {
    vec![
        Box::new(modules::unchecked_retval::UncheckedRetval) as Box<dyn DetectionModule>,
        Box::new(modules::exceptions::Exceptions),
    ]
}
