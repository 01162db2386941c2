// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use laser_shared::opcode::Opcode;

use crate::error::{ExecutionError, Result};

/// Single gas charge applied to a path. Carries the name of what the gas was
/// for and the `(min, max)` bound of its cost.
pub struct GasCharge<'a> {
    pub name: &'a str,
    pub min: u64,
    pub max: u64,
}

impl<'a> GasCharge<'a> {
    pub fn new(name: &'a str, min: u64, max: u64) -> Self {
        Self { name, min, max }
    }

    /// The static charge for an opcode, from the shared opcode table.
    pub fn for_opcode(op: Opcode) -> Self {
        match op.info() {
            Some(info) => Self::new(info.name, info.gas_min, info.gas_max),
            None => Self::new("UNKNOWN", 0, 0),
        }
    }
}

/// Tracks gas as a `(min, max)` envelope rather than an economic amount:
/// `min` assumes every dynamic cost at its floor, `max` at its analysis-time
/// ceiling. A path is out of gas when even the optimistic bound exceeds the
/// limit.
#[derive(Debug, Clone, Copy)]
pub struct GasTracker {
    gas_limit: u64,
    min_used: u64,
    max_used: u64,
}

impl GasTracker {
    pub fn new(gas_limit: u64) -> Self {
        Self {
            gas_limit,
            min_used: 0,
            max_used: 0,
        }
    }

    /// Applies a charge, failing the path when the minimum bound no longer
    /// fits in the limit.
    pub fn charge(&mut self, charge: GasCharge) -> Result<()> {
        self.min_used = self.min_used.saturating_add(charge.min);
        self.max_used = self.max_used.saturating_add(charge.max);
        if self.min_used > self.gas_limit {
            log::trace!("out of gas: {}", charge.name);
            return Err(ExecutionError::OutOfGas);
        }
        Ok(())
    }

    pub fn min_used(&self) -> u64 {
        self.min_used
    }

    pub fn max_used(&self) -> u64 {
        self.max_used
    }

    pub fn envelope(&self) -> (u64, u64) {
        (self.min_used, self.max_used.min(self.gas_limit))
    }
}
