// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Shared scaffolding for the scenario tests: an executor wired to the
//! built-in evaluation backend, plus small bytecode assembly helpers.
#![allow(dead_code)]

use laser::smt::backend::SubstitutionSolver;
use laser::{default_modules, AnalysisConfig, LaserExecutor};

/// An executor with the default detection modules and the in-tree solver
/// backend.
pub fn executor(config: AnalysisConfig) -> LaserExecutor {
    let mut executor = LaserExecutor::new(config, Box::new(SubstitutionSolver::default()));
    for module in default_modules() {
        executor.register_module(module);
    }
    executor
}

/// A tiny assembler: concatenates opcode bytes and immediates.
pub fn asm(chunks: &[&[u8]]) -> Vec<u8> {
    chunks.concat()
}

/// `PUSH1 v`.
pub fn push1(v: u8) -> Vec<u8> {
    vec![0x60, v]
}
