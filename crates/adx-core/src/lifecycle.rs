//! # Request / Response Lifecycle
//!
//! Ask and bid creation on the base layer. A bid escrows its amount into
//! the shared vault in the same call that creates the response; bids below
//! the floor are stored and only filtered out at clearing.

use solana_program::pubkey::Pubkey;

use crate::clock::Clock;
use crate::constants::{CreativeId, RequestId, REQUEST_TTL_SECONDS};
use crate::delegation::Residency;
use crate::errors::{AdxError, AdxResult};
use crate::events::ExchangeEvent;
use crate::exchange::Exchange;
use crate::math::{safe_add_u64, safe_sub_u64};
use crate::pda;
use crate::state::{AdRequest, AdResponse, AuctionRecord, Dsp, ExchangeVault, RequestStatus};
use crate::store::Layer;
use crate::token::TokenLedger;

impl<T: TokenLedger, C: Clock> Exchange<T, C> {
    /// Open an ad request. Returns its address
    pub fn place_ad_ask(
        &mut self,
        signer: &Pubkey,
        request_id: RequestId,
        floor_price: u64,
    ) -> AdxResult<Pubkey> {
        self.ensure_not_paused()?;
        if !self.publisher_exists(signer) {
            return Err(AdxError::Unauthorized);
        }
        let address = pda::ad_request_address(self.deriver(), signer, &request_id);
        if self.base.accounts.contains(&address) || self.delegation.is_tracked(&address) {
            return Err(AdxError::DuplicateRequest);
        }

        let now = self.now();
        let expiration = now.checked_add(REQUEST_TTL_SECONDS).ok_or(AdxError::MathOverflow)?;
        self.base.accounts.insert(
            address,
            AdRequest {
                publisher: *signer,
                request_id,
                floor_price,
                expiration,
                status: RequestStatus::Open,
                created_at: now,
            },
        );
        self.base.advance();

        log::info!(
            "Ask {} placed by {} (floor {}, expires {})",
            hex_id(&request_id),
            signer,
            floor_price,
            expiration
        );
        self.emit(ExchangeEvent::AskPlaced {
            request_id,
            publisher: *signer,
            floor_price,
            expiration,
        });
        Ok(address)
    }

    /// Bid on `publisher`'s request and escrow `bid_amount` into the vault.
    /// Returns the response address
    pub fn place_ad_bid(
        &mut self,
        signer: &Pubkey,
        publisher: &Pubkey,
        request_id: RequestId,
        bid_amount: u64,
        creative_id: CreativeId,
    ) -> AdxResult<Pubkey> {
        self.ensure_not_paused()?;
        if bid_amount == 0 {
            return Err(AdxError::InvalidAmount);
        }
        let dsp_address = pda::dsp_address(self.deriver(), signer);
        let vault_address = pda::vault_address(self.deriver());
        let request_address = pda::ad_request_address(self.deriver(), publisher, &request_id);
        let response_address = pda::ad_response_address(self.deriver(), signer, &creative_id);

        let dsp = self
            .base
            .accounts
            .find::<Dsp>(&dsp_address)?
            .ok_or(AdxError::NotRegistered)?;
        // The base copy stays readable while the request is delegated
        let request = self
            .base
            .accounts
            .find::<AdRequest>(&request_address)?
            .ok_or(AdxError::RequestNotFound)?;
        if request.status != RequestStatus::Open {
            return Err(AdxError::AlreadyCleared);
        }
        let now = self.now();
        if request.is_expired(now) {
            return Err(AdxError::Expired);
        }
        if self.base.accounts.contains(&response_address)
            || self.delegation.is_tracked(&response_address)
        {
            return Err(AdxError::DuplicateResponse);
        }
        if self.tokens.balance(signer) < bid_amount {
            return Err(AdxError::InsufficientFunds);
        }
        let dsp_balance = safe_add_u64(dsp.balance, bid_amount)?;
        let vault_balance = safe_add_u64(self.vault()?.total_balance, bid_amount)?;

        self.tokens.transfer(*signer, vault_address, bid_amount)?;
        self.base.accounts.get_mut::<Dsp>(&dsp_address)?.balance = dsp_balance;
        self.base
            .accounts
            .get_mut::<ExchangeVault>(&vault_address)?
            .total_balance = vault_balance;
        let created_slot = self.base.advance();
        self.base.accounts.insert(
            response_address,
            AdResponse {
                dsp: *signer,
                ad_request: request_address,
                request_id,
                creative_id,
                bid_amount,
                created_at: now,
                created_slot,
            },
        );

        log::info!(
            "Bid {} on {} from {} escrowed",
            bid_amount,
            hex_id(&request_id),
            signer
        );
        self.emit(ExchangeEvent::BidPlaced {
            request_id,
            dsp: *signer,
            creative_id,
            bid_amount,
        });
        Ok(response_address)
    }

    /// Close a response whose escrow can no longer be consumed and return
    /// the bid to the DSP. That is the case when its request expired
    /// uncleared, or when its auction reconciled without it
    pub fn reclaim_bid(&mut self, signer: &Pubkey, creative_id: CreativeId) -> AdxResult<u64> {
        let response_address = pda::ad_response_address(self.deriver(), signer, &creative_id);
        let dsp_address = pda::dsp_address(self.deriver(), signer);
        let vault_address = pda::vault_address(self.deriver());

        let response = self
            .base_current::<AdResponse>(&response_address)?
            .ok_or(AdxError::AccountNotFound)?
            .clone();
        if !self.bid_is_released(&response_address, &response)? {
            return Err(AdxError::BidLocked);
        }

        let dsp = self.base.accounts.get::<Dsp>(&dsp_address)?;
        let dsp_balance = safe_sub_u64(dsp.balance, response.bid_amount)?;
        let vault_balance = safe_sub_u64(self.vault()?.total_balance, response.bid_amount)?;

        self.tokens
            .transfer(vault_address, *signer, response.bid_amount)?;
        self.base.accounts.get_mut::<Dsp>(&dsp_address)?.balance = dsp_balance;
        self.base
            .accounts
            .get_mut::<ExchangeVault>(&vault_address)?
            .total_balance = vault_balance;
        self.base.accounts.remove(&response_address);
        self.delegation.forget(&response_address);
        self.base.advance();

        log::info!(
            "Reclaimed {} from response {} by {}",
            response.bid_amount,
            response_address,
            signer
        );
        self.emit(ExchangeEvent::BidReclaimed {
            dsp: *signer,
            creative_id,
            amount: response.bid_amount,
        });
        Ok(response.bid_amount)
    }

    fn bid_is_released(&self, response_address: &Pubkey, response: &AdResponse) -> AdxResult<bool> {
        let request = match self.base.accounts.find::<AdRequest>(&response.ad_request)? {
            Some(request) => request,
            None => return Ok(false),
        };
        match request.status {
            RequestStatus::Open => Ok(self.residency(&response.ad_request)
                == Residency::Resident(Layer::Base)
                && request.is_expired(self.now())),
            RequestStatus::Reconciled | RequestStatus::Settled => {
                let record_address = pda::auction_record_address(
                    self.deriver(),
                    &request.publisher,
                    &request.request_id,
                );
                let record = self.base.accounts.get::<AuctionRecord>(&record_address)?;
                Ok(record.winning_response != *response_address
                    && !record.losing_responses.contains(response_address))
            }
            RequestStatus::Cleared | RequestStatus::Delegated => Ok(false),
        }
    }
}

/// Short hex prefix of a 32-byte id for log lines
pub(crate) fn hex_id(id: &[u8; 32]) -> String {
    hex::encode(&id[..4])
}
