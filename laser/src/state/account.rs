// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use std::rc::Rc;

use laser_shared::address::Address;
use laser_shared::disasm::Disassembly;

use crate::smt::{array_sym, bv, const_array, Term};

/// Persistent contract storage for one account: an array base plus the
/// writes applied along the current path. A read selects from the composed
/// store chain, so decidable chains collapse at construction and the rest is
/// left for the solver.
#[derive(Debug, Clone, PartialEq)]
pub struct Storage {
    array: Term,
}

impl Storage {
    /// Fresh storage. With `concrete_default`, unwritten slots read zero;
    /// otherwise the base is an unconstrained array symbol and unwritten
    /// slots are free (the posture for analysing an already-deployed
    /// contract at an arbitrary state).
    pub fn new(address: Address, concrete_default: bool) -> Self {
        let array = if concrete_default {
            const_array(256, bv(0, 256))
        } else {
            array_sym(&format!("storage_{}", address), 256, 256)
        };
        Storage { array }
    }

    pub fn read(&self, key: &Term) -> Term {
        self.array.select(key)
    }

    pub fn write(&mut self, key: &Term, value: &Term) {
        self.array = self.array.store(key, value);
    }
}

/// One account in the world state.
#[derive(Debug, Clone)]
pub struct Account {
    pub address: Address,
    pub balance: Term,
    pub nonce: u64,
    /// Human-readable name used in CFG nodes and issues.
    pub contract_name: String,
    /// The account's runtime code. Immutable once set; shared across forks.
    pub code: Rc<Disassembly>,
    pub storage: Storage,
    /// Set by SELFDESTRUCT; the account is swept at the end of the
    /// transaction.
    pub deleted: bool,
}

impl Account {
    pub fn new(
        address: Address,
        contract_name: impl Into<String>,
        code: Rc<Disassembly>,
        balance: Term,
        concrete_storage: bool,
    ) -> Self {
        Account {
            address,
            balance,
            nonce: 0,
            contract_name: contract_name.into(),
            code,
            storage: Storage::new(address, concrete_storage),
            deleted: false,
        }
    }
}
