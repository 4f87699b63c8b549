//! Per-layer account store keyed by derived address.

use std::collections::HashMap;

use solana_program::pubkey::Pubkey;

use crate::errors::{AdxError, AdxResult};
use crate::state::{Account, Entity};

/// Which ledger a copy of an account lives on
#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Durable ledger of record
    Base,
    /// Delegated low-latency execution context
    Accelerated,
}

#[derive(Debug, Clone, Default)]
pub struct AccountStore {
    accounts: HashMap<Pubkey, Account>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, address: &Pubkey) -> bool {
        self.accounts.contains_key(address)
    }

    pub fn raw(&self, address: &Pubkey) -> Option<&Account> {
        self.accounts.get(address)
    }

    pub fn get<T: Entity>(&self, address: &Pubkey) -> AdxResult<&T> {
        let account = self.accounts.get(address).ok_or(AdxError::AccountNotFound)?;
        T::as_entity(account).ok_or(AdxError::AccountTypeMismatch)
    }

    pub fn get_mut<T: Entity>(&mut self, address: &Pubkey) -> AdxResult<&mut T> {
        let account = self
            .accounts
            .get_mut(address)
            .ok_or(AdxError::AccountNotFound)?;
        T::as_entity_mut(account).ok_or(AdxError::AccountTypeMismatch)
    }

    /// Like `get` but absent is not an error
    pub fn find<T: Entity>(&self, address: &Pubkey) -> AdxResult<Option<&T>> {
        match self.accounts.get(address) {
            None => Ok(None),
            Some(account) => T::as_entity(account)
                .map(Some)
                .ok_or(AdxError::AccountTypeMismatch),
        }
    }

    pub fn insert<T: Entity>(&mut self, address: Pubkey, value: T) {
        self.accounts.insert(address, value.wrap());
    }

    pub fn put_raw(&mut self, address: Pubkey, account: Account) {
        self.accounts.insert(address, account);
    }

    pub fn remove(&mut self, address: &Pubkey) -> Option<Account> {
        self.accounts.remove(address)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// One ledger: its accounts plus a slot counter that advances per
/// successful transaction
#[derive(Debug, Clone)]
pub struct LayerState {
    pub layer: Layer,
    pub accounts: AccountStore,
    pub slot: u64,
}

impl LayerState {
    pub fn new(layer: Layer) -> Self {
        Self {
            layer,
            accounts: AccountStore::new(),
            slot: 0,
        }
    }

    pub fn advance(&mut self) -> u64 {
        self.slot += 1;
        self.slot
    }
}
