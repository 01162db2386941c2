// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;
use std::rc::Rc;

use laser_shared::address::Address;
use laser_shared::disasm::Disassembly;

use crate::executor::transaction::TransactionRecord;
use crate::smt::{array_sym, bv_sym, Constraints, Term};
use crate::state::account::Account;
use crate::state::transient::TransientStorage;

/// Block-level context visible to the executing code. Everything is a term;
/// a default world leaves them unconstrained symbols so detectors can reason
/// about block-value dependence.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockContext {
    pub number: Term,
    pub timestamp: Term,
    pub coinbase: Term,
    pub gaslimit: Term,
    pub basefee: Term,
    pub blobbasefee: Term,
    pub chainid: Term,
    pub prevrandao: Term,
}

impl Default for BlockContext {
    fn default() -> Self {
        BlockContext {
            number: bv_sym("block_number", 256),
            timestamp: bv_sym("block_timestamp", 256),
            coinbase: bv_sym("block_coinbase", 256),
            gaslimit: bv_sym("block_gaslimit", 256),
            basefee: bv_sym("block_basefee", 256),
            blobbasefee: bv_sym("block_blobbasefee", 256),
            chainid: bv_sym("chain_id", 256),
            prevrandao: bv_sym("block_prevrandao", 256),
        }
    }
}

/// The world state carried by one path: accounts, the balance array, block
/// context, the transient-storage journal and the path constraints. The
/// constraint set lives here because it accumulates over a *path*, not a
/// machine frame. Cloning is deep: a forked world never observes the other
/// fork's writes.
#[derive(Debug, Clone)]
pub struct WorldState {
    accounts: BTreeMap<Address, Account>,
    /// Balances of accounts the engine has no [`Account`] entry for, as a
    /// symbolic 256→256 array keyed by address.
    pub balances: Term,
    pub block: BlockContext,
    pub transient_storage: TransientStorage,
    pub constraints: Constraints,
    /// The transactions that produced this world, newest last. Witness
    /// extraction concretises these against a model.
    pub transaction_sequence: Vec<TransactionRecord>,
}

impl Default for WorldState {
    fn default() -> Self {
        WorldState {
            accounts: BTreeMap::new(),
            balances: array_sym("balances", 256, 256),
            block: BlockContext::default(),
            transient_storage: TransientStorage::new(),
            constraints: Constraints::new(),
            transaction_sequence: Vec::new(),
        }
    }
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    pub fn account_mut(&mut self, address: &Address) -> Option<&mut Account> {
        self.accounts.get_mut(address)
    }

    pub fn put_account(&mut self, account: Account) {
        self.accounts.insert(account.address, account);
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    /// Creates and registers an account with the given code, returning its
    /// address.
    pub fn create_account(
        &mut self,
        address: Address,
        contract_name: impl Into<String>,
        code: Rc<Disassembly>,
        balance: Term,
        concrete_storage: bool,
    ) -> &mut Account {
        let account = Account::new(address, contract_name, code, balance, concrete_storage);
        self.accounts.insert(address, account);
        self.accounts.get_mut(&address).expect("just inserted")
    }

    /// The balance of `address`: the account's balance term when the account
    /// is modelled, otherwise a read from the symbolic balance array.
    pub fn balance_of(&self, address: &Term) -> Term {
        if let Some(concrete) = address.as_biguint() {
            let addr = Address::from(concrete);
            if let Some(account) = self.accounts.get(&addr) {
                return account.balance.clone();
            }
        }
        self.balances.select(address)
    }

    /// Removes accounts swept by SELFDESTRUCT. Runs at transaction end.
    pub fn sweep_deleted(&mut self) {
        self.accounts.retain(|_, a| !a.deleted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smt::bv;

    #[test]
    fn modelled_balance_vs_symbolic_balance() {
        let mut world = WorldState::new();
        world.create_account(
            Address::from(5),
            "Target",
            Rc::new(Disassembly::default()),
            bv(100, 256),
            true,
        );
        assert_eq!(world.balance_of(&bv(5, 256)), bv(100, 256));
        assert!(!world.balance_of(&bv(6, 256)).is_concrete());
    }

    #[test]
    fn cloned_worlds_do_not_share_writes() {
        let mut world = WorldState::new();
        world.create_account(
            Address::from(5),
            "Target",
            Rc::new(Disassembly::default()),
            bv(0, 256),
            true,
        );
        let fork = world.clone();
        world
            .account_mut(&Address::from(5))
            .unwrap()
            .storage
            .write(&bv(1, 256), &bv(9, 256));
        let untouched = fork.account(&Address::from(5)).unwrap();
        assert_eq!(untouched.storage.read(&bv(1, 256)), bv(0, 256));
    }
}
