//! # Settlement Engine
//!
//! Base-layer payout once the cleared request and its record have been
//! committed back. Reconciliation refunds every loser in one atomic token
//! batch; settlement then pays the publisher and books the platform fee.
//! Both steps are permissionless.
//!
//! Vault accounting keeps one invariant across every step:
//! the vault's token balance equals `total_balance + fee_balance`.

use std::collections::BTreeMap;

use solana_program::pubkey::Pubkey;

use crate::clock::Clock;
use crate::constants::RequestId;
use crate::errors::{AdxError, AdxResult};
use crate::events::ExchangeEvent;
use crate::exchange::Exchange;
use crate::lifecycle::hex_id;
use crate::math::{safe_add_u64, safe_sub_u64};
use crate::pda;
use crate::state::{
    AdRequest, AdResponse, AuctionRecord, Dsp, ExchangeVault, ProtocolConfig, Publisher,
    RequestStatus,
};
use crate::token::{TokenLedger, TokenTransfer};

/// Outcome of refunding an auction's losing bids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub refunded_responses: usize,
    pub refunded_amount: u64,
}

impl<T: TokenLedger, C: Clock> Exchange<T, C> {
    /// Refund every losing response and reserve the clearing price for
    /// settlement. This is the only point at which losers' escrow returns
    pub fn process_auction_results(
        &mut self,
        publisher: &Pubkey,
        request_id: RequestId,
    ) -> AdxResult<Reconciliation> {
        let request_address = pda::ad_request_address(self.deriver(), publisher, &request_id);
        let record_address = pda::auction_record_address(self.deriver(), publisher, &request_id);
        let vault_address = pda::vault_address(self.deriver());

        let request = self
            .base_current::<AdRequest>(&request_address)?
            .ok_or(AdxError::RequestNotFound)?;
        match request.status {
            RequestStatus::Cleared => {}
            RequestStatus::Reconciled | RequestStatus::Settled => {
                return Err(AdxError::AlreadyReconciled)
            }
            RequestStatus::Open | RequestStatus::Delegated => return Err(AdxError::NotCleared),
        }
        let record = self
            .base_current::<AuctionRecord>(&record_address)?
            .ok_or(AdxError::NotCleared)?;

        // Responses are immutable, so the base copy is authoritative even
        // while a loser is still delegated
        let mut transfers = Vec::with_capacity(record.losing_responses.len());
        let mut per_dsp: BTreeMap<Pubkey, u64> = BTreeMap::new();
        let mut refunded_amount = 0u64;
        for address in &record.losing_responses {
            let response = self.base.accounts.get::<AdResponse>(address)?;
            transfers.push(TokenTransfer::new(
                vault_address,
                response.dsp,
                response.bid_amount,
            ));
            let owed = per_dsp.entry(response.dsp).or_insert(0);
            *owed = safe_add_u64(*owed, response.bid_amount)?;
            refunded_amount = safe_add_u64(refunded_amount, response.bid_amount)?;
        }

        let mut dsp_balances = Vec::with_capacity(per_dsp.len());
        for (owner, owed) in &per_dsp {
            let dsp_address = pda::dsp_address(self.deriver(), owner);
            let dsp = self.base.accounts.get::<Dsp>(&dsp_address)?;
            dsp_balances.push((dsp_address, safe_sub_u64(dsp.balance, *owed)?));
        }
        let vault = self.vault()?;
        let total_balance = safe_sub_u64(vault.total_balance, refunded_amount)?;
        let pending_settlements = safe_add_u64(vault.pending_settlements, record.clearing_price)?;
        let refunded_responses = transfers.len();

        self.tokens.apply(&transfers)?;
        for (dsp_address, balance) in dsp_balances {
            self.base.accounts.get_mut::<Dsp>(&dsp_address)?.balance = balance;
        }
        let vault = self.base.accounts.get_mut::<ExchangeVault>(&vault_address)?;
        vault.total_balance = total_balance;
        vault.pending_settlements = pending_settlements;
        self.base
            .accounts
            .get_mut::<AdRequest>(&request_address)?
            .status = RequestStatus::Reconciled;
        self.base.advance();

        log::info!(
            "Auction {} reconciled: refunded {} across {} responses",
            hex_id(&request_id),
            refunded_amount,
            refunded_responses
        );
        self.emit(ExchangeEvent::ResultsProcessed {
            request_id,
            refunded_responses,
            refunded_amount,
        });
        Ok(Reconciliation {
            refunded_responses,
            refunded_amount,
        })
    }

    /// Pay the publisher its share and book the platform fee. Exactly once
    /// per record
    pub fn settle_auction(
        &mut self,
        publisher: &Pubkey,
        request_id: RequestId,
    ) -> AdxResult<AuctionRecord> {
        let request_address = pda::ad_request_address(self.deriver(), publisher, &request_id);
        let record_address = pda::auction_record_address(self.deriver(), publisher, &request_id);
        let publisher_address = pda::publisher_address(self.deriver(), publisher);
        let vault_address = pda::vault_address(self.deriver());

        let record = self
            .base_current::<AuctionRecord>(&record_address)?
            .ok_or(AdxError::NotCleared)?
            .clone();
        if record.is_settled {
            return Err(AdxError::AlreadySettled);
        }
        let request = self
            .base_current::<AdRequest>(&request_address)?
            .ok_or(AdxError::RequestNotFound)?;
        match request.status {
            RequestStatus::Reconciled => {}
            RequestStatus::Settled => return Err(AdxError::AlreadySettled),
            RequestStatus::Cleared => return Err(AdxError::NotReconciled),
            RequestStatus::Open | RequestStatus::Delegated => return Err(AdxError::NotCleared),
        }

        let winner_address = pda::dsp_address(self.deriver(), &record.winning_dsp);
        let winner_balance = safe_sub_u64(
            self.base.accounts.get::<Dsp>(&winner_address)?.balance,
            record.clearing_price,
        )?;
        let publisher_account = self.base.accounts.get::<Publisher>(&publisher_address)?;
        let payment_address = publisher_account.payment_address;
        let total_revenue = safe_add_u64(publisher_account.total_revenue, record.publisher_payment)?;
        let vault = self.vault()?;
        let total_balance = safe_sub_u64(vault.total_balance, record.clearing_price)?;
        let fee_balance = safe_add_u64(vault.fee_balance, record.platform_fee)?;
        let pending_settlements = safe_sub_u64(vault.pending_settlements, record.clearing_price)?;

        self.tokens
            .transfer(vault_address, payment_address, record.publisher_payment)?;
        self.base.accounts.get_mut::<Dsp>(&winner_address)?.balance = winner_balance;
        self.base
            .accounts
            .get_mut::<Publisher>(&publisher_address)?
            .total_revenue = total_revenue;
        let vault = self.base.accounts.get_mut::<ExchangeVault>(&vault_address)?;
        vault.total_balance = total_balance;
        vault.fee_balance = fee_balance;
        vault.pending_settlements = pending_settlements;
        self.base
            .accounts
            .get_mut::<AuctionRecord>(&record_address)?
            .is_settled = true;
        self.base
            .accounts
            .get_mut::<AdRequest>(&request_address)?
            .status = RequestStatus::Settled;
        self.base.advance();

        log::info!(
            "Auction {} settled: publisher {} paid {}, fee {}",
            hex_id(&request_id),
            publisher,
            record.publisher_payment,
            record.platform_fee
        );
        self.emit(ExchangeEvent::AuctionSettled {
            request_id,
            publisher_payment: record.publisher_payment,
            platform_fee: record.platform_fee,
        });
        Ok(AuctionRecord {
            is_settled: true,
            ..record
        })
    }

    /// Move collected platform fees out of the vault. Authority only
    pub fn withdraw_fees(
        &mut self,
        signer: &Pubkey,
        amount: u64,
        destination: Pubkey,
    ) -> AdxResult<()> {
        let config_address = pda::config_address(self.deriver());
        let vault_address = pda::vault_address(self.deriver());
        if self.base.accounts.get::<ProtocolConfig>(&config_address)?.authority != *signer {
            return Err(AdxError::Unauthorized);
        }
        if amount == 0 {
            return Err(AdxError::InvalidAmount);
        }
        let fee_balance = self.vault()?.fee_balance;
        if amount > fee_balance {
            return Err(AdxError::ExcessiveWithdrawal);
        }

        self.tokens.transfer(vault_address, destination, amount)?;
        self.base
            .accounts
            .get_mut::<ExchangeVault>(&vault_address)?
            .fee_balance = fee_balance - amount;
        self.base.advance();

        log::info!("Withdrew {} in fees to {}", amount, destination);
        self.emit(ExchangeEvent::FeesWithdrawn {
            destination,
            amount,
        });
        Ok(())
    }
}
