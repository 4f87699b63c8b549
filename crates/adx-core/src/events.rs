//! Event definitions

use solana_program::pubkey::Pubkey;

use crate::constants::{CreativeId, RequestId};
use crate::state::EntityKind;
use crate::store::Layer;

/// Emitted by every successful exchange operation
#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEvent {
    ProtocolInitialized {
        authority: Pubkey,
        platform_fee_percentage: u8,
        publisher_rev_share: u8,
    },
    PauseToggled {
        paused: bool,
    },
    PublisherRegistered {
        publisher: Pubkey,
    },
    DspRegistered {
        dsp: Pubkey,
    },
    AskPlaced {
        request_id: RequestId,
        publisher: Pubkey,
        floor_price: u64,
        expiration: i64,
    },
    BidPlaced {
        request_id: RequestId,
        dsp: Pubkey,
        creative_id: CreativeId,
        bid_amount: u64,
    },
    EntityDelegated {
        kind: EntityKind,
        address: Pubkey,
        timestamp: i64,
    },
    CommitScheduled {
        commit_id: u64,
        address: Pubkey,
        undelegate: bool,
    },
    CommitAccepted {
        commit_id: u64,
        address: Pubkey,
        resident: Layer,
    },
    AuctionCleared {
        request_id: RequestId,
        publisher: Pubkey,
        winning_dsp: Pubkey,
        clearing_price: u64,
        timestamp: i64,
    },
    ResultsProcessed {
        request_id: RequestId,
        refunded_responses: usize,
        refunded_amount: u64,
    },
    AuctionSettled {
        request_id: RequestId,
        publisher_payment: u64,
        platform_fee: u64,
    },
    BidReclaimed {
        dsp: Pubkey,
        creative_id: CreativeId,
        amount: u64,
    },
    FeesWithdrawn {
        destination: Pubkey,
        amount: u64,
    },
}
