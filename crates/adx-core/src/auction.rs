//! # Auction Engine
//!
//! First-price clearing inside the accelerated layer. The response list is
//! supplied by the caller and is untrusted: every reference is checked
//! against the request before it counts.

use std::cmp::Reverse;
use std::collections::HashSet;

use solana_program::pubkey::Pubkey;

use crate::clock::Clock;
use crate::constants::RequestId;
use crate::delegation::Residency;
use crate::errors::{AdxError, AdxResult};
use crate::events::ExchangeEvent;
use crate::exchange::Exchange;
use crate::lifecycle::hex_id;
use crate::math::split_clearing_price;
use crate::pda;
use crate::state::{AdRequest, AdResponse, AuctionRecord, Entity, RequestStatus};
use crate::store::Layer;
use crate::token::TokenLedger;

/// A validated response as seen by winner selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub address: Pubkey,
    pub bid_amount: u64,
    pub created_slot: u64,
}

impl Candidate {
    /// Higher bid first, then earlier slot, then lower address bytes
    fn rank(&self) -> (u64, Reverse<u64>, Reverse<[u8; 32]>) {
        (
            self.bid_amount,
            Reverse(self.created_slot),
            Reverse(self.address.to_bytes()),
        )
    }
}

/// Highest eligible bid. Ties go to the earliest created response, and
/// equal slots fall back to address order so the result never depends on
/// input order
pub fn select_winner(candidates: &[Candidate], floor_price: u64) -> Option<&Candidate> {
    candidates
        .iter()
        .filter(|c| c.bid_amount >= floor_price)
        .max_by_key(|c| c.rank())
}

impl<T: TokenLedger, C: Clock> Exchange<T, C> {
    /// Clear a delegated request against the supplied responses. The new
    /// record lives on the accelerated layer until it is committed back
    pub fn process_auction(
        &mut self,
        signer: &Pubkey,
        publisher: &Pubkey,
        request_id: RequestId,
        response_refs: &[Pubkey],
    ) -> AdxResult<AuctionRecord> {
        let request_address = pda::ad_request_address(self.deriver(), publisher, &request_id);
        let record_address = pda::auction_record_address(self.deriver(), publisher, &request_id);
        self.ensure_delegated(&request_address)?;

        let config = self.config()?;
        if *signer != *publisher && *signer != config.authority {
            return Err(AdxError::Unauthorized);
        }
        let fee_pct = config.platform_fee_percentage;

        let accelerated = self.layer(Layer::Accelerated)?;
        let request = accelerated.accounts.get::<AdRequest>(&request_address)?;
        if request.status != RequestStatus::Open
            || accelerated.accounts.contains(&record_address)
            || self.base.accounts.contains(&record_address)
            || self.delegation.is_tracked(&record_address)
        {
            return Err(AdxError::AlreadyCleared);
        }
        let floor_price = request.floor_price;

        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(response_refs.len());
        for address in response_refs {
            if !seen.insert(*address) {
                continue;
            }
            if self.residency(address) != Residency::Resident(Layer::Accelerated) {
                log::warn!("Skipping response {}: not delegated", address);
                continue;
            }
            let response = match accelerated.accounts.find::<AdResponse>(address) {
                Ok(Some(response)) if response.ad_request == request_address => response,
                _ => {
                    log::warn!(
                        "Skipping response {}: not a bid on {}",
                        address,
                        hex_id(&request_id)
                    );
                    continue;
                }
            };
            candidates.push(Candidate {
                address: *address,
                bid_amount: response.bid_amount,
                created_slot: response.created_slot,
            });
        }

        let winner = *select_winner(&candidates, floor_price).ok_or(AdxError::NoEligibleBids)?;
        let winning_dsp = accelerated
            .accounts
            .get::<AdResponse>(&winner.address)?
            .dsp;
        let split = split_clearing_price(winner.bid_amount, fee_pct)?;
        let losing_responses: Vec<Pubkey> = candidates
            .iter()
            .map(|c| c.address)
            .filter(|a| *a != winner.address)
            .collect();

        let cleared_at = self.now();
        let record = AuctionRecord {
            publisher: *publisher,
            ad_request: request_address,
            request_id,
            winning_dsp,
            winning_response: winner.address,
            clearing_price: winner.bid_amount,
            platform_fee: split.platform_fee,
            publisher_payment: split.publisher_payment,
            losing_responses,
            cleared_at,
            is_settled: false,
        };
        self.create_on_accelerated(record_address, record.clone().wrap())?;
        let accelerated = self.accelerated_mut()?;
        accelerated
            .accounts
            .get_mut::<AdRequest>(&request_address)?
            .status = RequestStatus::Cleared;
        accelerated.advance();

        log::info!(
            "Auction {} cleared: winner {} at {} ({} losing)",
            hex_id(&request_id),
            winning_dsp,
            record.clearing_price,
            record.losing_responses.len()
        );
        self.emit(ExchangeEvent::AuctionCleared {
            request_id,
            publisher: *publisher,
            winning_dsp,
            clearing_price: record.clearing_price,
            timestamp: cleared_at,
        });
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use proptest::prelude::*;

    fn candidate(bid_amount: u64, created_slot: u64) -> Candidate {
        Candidate {
            address: Pubkey::new_unique(),
            bid_amount,
            created_slot,
        }
    }

    #[test]
    fn test_select_highest_eligible() {
        let bids = [candidate(3_000_000, 1), candidate(2_000_000, 2), candidate(500, 3)];
        let winner = select_winner(&bids, 1_000_000).unwrap();
        assert_eq!(winner.bid_amount, 3_000_000);
        assert!(select_winner(&bids, 4_000_000).is_none());
    }

    #[test]
    fn test_tie_goes_to_earliest() {
        let early = candidate(100, 1);
        let late = candidate(100, 7);
        assert_eq!(select_winner(&[late, early], 0), Some(&early));
        assert_eq!(select_winner(&[early, late], 0), Some(&early));
    }

    #[test]
    fn test_floor_is_inclusive() {
        let bids = [candidate(1_000, 1)];
        assert!(select_winner(&bids, 1_000).is_some());
    }

    #[test]
    fn test_clear_reference_scenario() {
        let mut h = Harness::new();
        h.open_request(1_000_000);
        let a = h.bid(h.dsp_a, 3_000_000, [1u8; 32]).unwrap();
        let b = h.bid(h.dsp_b, 2_000_000, [2u8; 32]).unwrap();
        h.delegate_all(&[a, b]);

        let record = h.clear(&[a, b]).unwrap();
        assert_eq!(record.winning_dsp, h.dsp_a);
        assert_eq!(record.winning_response, a);
        assert_eq!(record.clearing_price, 3_000_000);
        assert_eq!(record.platform_fee, 600_000);
        assert_eq!(record.publisher_payment, 2_400_000);
        assert_eq!(record.losing_responses, vec![b]);

        let request = h.request_address();
        let cleared = h.exchange.fetch::<AdRequest>(Layer::Accelerated, &request).unwrap();
        assert_eq!(cleared.status, RequestStatus::Cleared);
        // Base copy untouched until commit-back
        let base = h.exchange.fetch::<AdRequest>(Layer::Base, &request).unwrap();
        assert_eq!(base.status, RequestStatus::Open);
    }

    #[test]
    fn test_equal_bids_go_to_earlier_response() {
        let mut h = Harness::new();
        h.open_request(1_000_000);
        let early = h.bid(h.dsp_a, 2_000_000, [1u8; 32]).unwrap();
        let late = h.bid(h.dsp_b, 2_000_000, [2u8; 32]).unwrap();
        h.delegate_all(&[early, late]);

        // Reference order must not matter
        let record = h.clear(&[late, early]).unwrap();
        assert_eq!(record.winning_response, early);
        assert_eq!(record.winning_dsp, h.dsp_a);
        assert_eq!(record.losing_responses, vec![late]);
    }

    #[test]
    fn test_no_eligible_bids_leaves_request_open() {
        let mut h = Harness::new();
        h.open_request(1_000_000);
        let a = h.bid(h.dsp_a, 10, [1u8; 32]).unwrap();
        let b = h.bid(h.dsp_b, 20, [2u8; 32]).unwrap();
        h.delegate_all(&[a, b]);

        assert_eq!(h.clear(&[a, b]), Err(AdxError::NoEligibleBids));
        assert_eq!(
            h.exchange.request_status(&h.publisher, &REQUEST_ID),
            Ok(RequestStatus::Delegated)
        );
        let record = h.record_address();
        assert!(h.exchange.fetch::<AuctionRecord>(Layer::Accelerated, &record).is_err());
        assert!(!h.exchange.delegation.is_tracked(&record));
    }

    #[test]
    fn test_untrusted_refs_are_filtered() {
        let mut h = Harness::new();
        h.open_request(100);
        let a = h.bid(h.dsp_a, 500, [1u8; 32]).unwrap();
        // Not delegated, so never considered
        let b = h.bid(h.dsp_b, 900, [2u8; 32]).unwrap();
        h.delegate_all(&[a]);

        let bogus = Pubkey::new_unique();
        let request = h.request_address();
        let record = h.clear(&[a, a, b, bogus, request]).unwrap();
        assert_eq!(record.winning_response, a);
        assert!(record.losing_responses.is_empty());
    }

    #[test]
    fn test_clear_twice() {
        let mut h = Harness::new();
        h.open_request(100);
        let a = h.bid(h.dsp_a, 500, [1u8; 32]).unwrap();
        h.delegate_all(&[a]);
        h.clear(&[a]).unwrap();
        assert_eq!(h.clear(&[a]), Err(AdxError::AlreadyCleared));
    }

    #[test]
    fn test_clear_requires_delegated_request() {
        let mut h = Harness::new();
        h.open_request(100);
        let a = h.bid(h.dsp_a, 500, [1u8; 32]).unwrap();
        assert_eq!(h.clear(&[a]), Err(AdxError::NotDelegated));
    }

    #[test]
    fn test_clear_signer_check() {
        let mut h = Harness::new();
        h.open_request(100);
        let a = h.bid(h.dsp_a, 500, [1u8; 32]).unwrap();
        h.delegate_all(&[a]);
        let publisher = h.publisher;
        let stranger = Pubkey::new_unique();
        assert_eq!(
            h.exchange.process_auction(&stranger, &publisher, REQUEST_ID, &[a]),
            Err(AdxError::Unauthorized)
        );
        let authority = h.authority;
        assert!(h
            .exchange
            .process_auction(&authority, &publisher, REQUEST_ID, &[a])
            .is_ok());
    }

    proptest! {
        #[test]
        fn prop_winner_is_max_and_order_independent(
            bids in prop::collection::vec((1u64..10_000, 0u64..5), 1..12),
            floor in 0u64..10_000,
        ) {
            let candidates: Vec<Candidate> = bids
                .iter()
                .map(|(bid, slot)| candidate(*bid, *slot))
                .collect();
            let mut reversed = candidates.clone();
            reversed.reverse();

            let winner = select_winner(&candidates, floor).copied();
            prop_assert_eq!(winner, select_winner(&reversed, floor).copied());
            match winner {
                Some(w) => {
                    prop_assert!(w.bid_amount >= floor);
                    let max = candidates
                        .iter()
                        .filter(|c| c.bid_amount >= floor)
                        .map(|c| c.bid_amount)
                        .max();
                    prop_assert_eq!(Some(w.bid_amount), max);
                }
                None => prop_assert!(candidates.iter().all(|c| c.bid_amount < floor)),
            }
        }
    }
}
