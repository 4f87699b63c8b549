//! # Token Escrow
//!
//! Value moves between a bidder's token account, the shared vault and a
//! publisher's payment account. The ledger itself is a collaborator; the
//! exchange only needs balance queries and an atomic transfer batch.

use std::collections::HashMap;

use solana_program::pubkey::Pubkey;

use crate::errors::{AdxError, AdxResult};

#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTransfer {
    pub from: Pubkey,
    pub to: Pubkey,
    pub amount: u64,
}

impl TokenTransfer {
    pub fn new(from: Pubkey, to: Pubkey, amount: u64) -> Self {
        Self { from, to, amount }
    }
}

/// Token-account balance query and transfer
pub trait TokenLedger {
    /// Balance of the token account owned by `owner`
    fn balance(&self, owner: &Pubkey) -> u64;

    /// Apply every transfer or none of them
    fn apply(&mut self, batch: &[TokenTransfer]) -> AdxResult<()>;

    fn transfer(&mut self, from: Pubkey, to: Pubkey, amount: u64) -> AdxResult<()> {
        self.apply(&[TokenTransfer::new(from, to, amount)])
    }
}

/// Single-mint ledger held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryTokenLedger {
    balances: HashMap<Pubkey, u64>,
}

impl InMemoryTokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fund an account out of thin air (provisioning happens outside the core)
    pub fn credit(&mut self, owner: Pubkey, amount: u64) {
        let entry = self.balances.entry(owner).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    pub fn total_supply(&self) -> u128 {
        self.balances.values().map(|b| *b as u128).sum()
    }
}

impl TokenLedger for InMemoryTokenLedger {
    fn balance(&self, owner: &Pubkey) -> u64 {
        self.balances.get(owner).copied().unwrap_or(0)
    }

    fn apply(&mut self, batch: &[TokenTransfer]) -> AdxResult<()> {
        // Stage against a scratch copy of the touched balances
        let mut staged: HashMap<Pubkey, u64> = HashMap::new();
        for transfer in batch {
            let from = *staged
                .entry(transfer.from)
                .or_insert_with(|| self.balance(&transfer.from));
            let debited = from
                .checked_sub(transfer.amount)
                .ok_or(AdxError::InsufficientFunds)?;
            staged.insert(transfer.from, debited);

            let to = *staged
                .entry(transfer.to)
                .or_insert_with(|| self.balance(&transfer.to));
            let credited = to
                .checked_add(transfer.amount)
                .ok_or(AdxError::MathOverflow)?;
            staged.insert(transfer.to, credited);
        }

        self.balances.extend(staged);
        Ok(())
    }
}
