//! # Exchange Entities
//!
//! Account layouts for every entity the exchange persists. All of them are
//! keyed by a derived address (see `pda`); none carries an auto-increment id.

use solana_program::pubkey::Pubkey;

use crate::constants::{CreativeId, RequestId};

/// Protocol configuration singleton.
/// Seeds: ["adx_config"]
#[cfg_attr(feature = "anchor", derive(anchor_lang::AnchorSerialize, anchor_lang::AnchorDeserialize))]
#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Authority that can pause the protocol and withdraw fees
    pub authority: Pubkey,
    /// Mint of the settlement token
    pub token_mint: Pubkey,
    /// Operator's cut of every clearing price, in percent
    pub platform_fee_percentage: u8,
    /// Publisher's cut, in percent. Always 100 - platform_fee_percentage
    pub publisher_rev_share: u8,
    pub is_paused: bool,
}

/// Shared escrow vault. One per protocol.
/// Seeds: ["adx_vault"]
#[cfg_attr(feature = "anchor", derive(anchor_lang::AnchorSerialize, anchor_lang::AnchorDeserialize))]
#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeVault {
    pub authority: Pubkey,
    /// Token account holding escrowed bids and collected fees
    pub token_account: Pubkey,
    pub token_mint: Pubkey,
    /// Bid escrow currently held
    pub total_balance: u64,
    /// Funds reserved for reconciled but unsettled auctions
    pub pending_settlements: u64,
    /// Platform fees collected and not yet withdrawn
    pub fee_balance: u64,
}

/// Seeds: ["publisher", owner]
#[cfg_attr(feature = "anchor", derive(anchor_lang::AnchorSerialize, anchor_lang::AnchorDeserialize))]
#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publisher {
    pub authority: Pubkey,
    /// Owner of the token account that receives publisher payments
    pub payment_address: Pubkey,
    pub name: String,
    pub domain: String,
    /// Lifetime payments received. Only ever increases
    pub total_revenue: u64,
    pub created_at: i64,
}

/// Seeds: ["dsp", owner]
#[cfg_attr(feature = "anchor", derive(anchor_lang::AnchorSerialize, anchor_lang::AnchorDeserialize))]
#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsp {
    pub authority: Pubkey,
    pub name: String,
    pub domain: String,
    /// Escrow outstanding across all open bids
    pub balance: u64,
    pub created_at: i64,
}

#[cfg_attr(feature = "anchor", derive(anchor_lang::AnchorSerialize, anchor_lang::AnchorDeserialize))]
#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Open,
    /// Reported for an open request whose authority sits with the
    /// accelerated layer. Never stored on the account itself
    Delegated,
    Cleared,
    /// Losing bids have been refunded on the base layer
    Reconciled,
    Settled,
}

/// Seeds: ["ad_request", publisher, request_id]
#[cfg_attr(feature = "anchor", derive(anchor_lang::AnchorSerialize, anchor_lang::AnchorDeserialize))]
#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdRequest {
    pub publisher: Pubkey,
    pub request_id: RequestId,
    /// Minimum clearing-eligible bid
    pub floor_price: u64,
    pub expiration: i64,
    pub status: RequestStatus,
    pub created_at: i64,
}

impl AdRequest {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expiration
    }
}

/// Seeds: ["ad_response", dsp, creative_id]. Immutable once created.
#[cfg_attr(feature = "anchor", derive(anchor_lang::AnchorSerialize, anchor_lang::AnchorDeserialize))]
#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdResponse {
    pub dsp: Pubkey,
    /// Address of the AdRequest this bid targets
    pub ad_request: Pubkey,
    pub request_id: RequestId,
    pub creative_id: CreativeId,
    pub bid_amount: u64,
    pub created_at: i64,
    /// Base-layer slot of creation; orders bids for tie-breaking
    pub created_slot: u64,
}

/// Seeds: ["auction_record", publisher, request_id]
#[cfg_attr(feature = "anchor", derive(anchor_lang::AnchorSerialize, anchor_lang::AnchorDeserialize))]
#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionRecord {
    pub publisher: Pubkey,
    pub ad_request: Pubkey,
    pub request_id: RequestId,
    pub winning_dsp: Pubkey,
    pub winning_response: Pubkey,
    pub clearing_price: u64,
    pub platform_fee: u64,
    pub publisher_payment: u64,
    /// Every other validated response, eligible or not. Refunded on reconcile
    pub losing_responses: Vec<Pubkey>,
    pub cleared_at: i64,
    pub is_settled: bool,
}

/// Tagged account value held by a layer's store
#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Account {
    Config(ProtocolConfig),
    Vault(ExchangeVault),
    Publisher(Publisher),
    Dsp(Dsp),
    AdRequest(AdRequest),
    AdResponse(AdResponse),
    AuctionRecord(AuctionRecord),
}

/// Entity kinds whose residency may move between layers
#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    AdRequest,
    AdResponse,
    AuctionRecord,
}

impl Account {
    /// Kind for delegable accounts, None for base-only ones
    pub fn entity_kind(&self) -> Option<EntityKind> {
        match self {
            Account::AdRequest(_) => Some(EntityKind::AdRequest),
            Account::AdResponse(_) => Some(EntityKind::AdResponse),
            Account::AuctionRecord(_) => Some(EntityKind::AuctionRecord),
            _ => None,
        }
    }

    /// Key allowed to delegate this account on the base layer
    pub fn owner(&self) -> Pubkey {
        match self {
            Account::Config(c) => c.authority,
            Account::Vault(v) => v.authority,
            Account::Publisher(p) => p.authority,
            Account::Dsp(d) => d.authority,
            Account::AdRequest(r) => r.publisher,
            Account::AdResponse(r) => r.dsp,
            Account::AuctionRecord(r) => r.publisher,
        }
    }
}

/// Typed access into the tagged `Account` value
pub trait Entity: Sized + Clone {
    fn wrap(self) -> Account;
    fn as_entity(account: &Account) -> Option<&Self>;
    fn as_entity_mut(account: &mut Account) -> Option<&mut Self>;
}

macro_rules! impl_entity {
    ($ty:ty, $variant:ident) => {
        impl Entity for $ty {
            fn wrap(self) -> Account {
                Account::$variant(self)
            }

            fn as_entity(account: &Account) -> Option<&Self> {
                match account {
                    Account::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn as_entity_mut(account: &mut Account) -> Option<&mut Self> {
                match account {
                    Account::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

impl_entity!(ProtocolConfig, Config);
impl_entity!(ExchangeVault, Vault);
impl_entity!(Publisher, Publisher);
impl_entity!(Dsp, Dsp);
impl_entity!(AdRequest, AdRequest);
impl_entity!(AdResponse, AdResponse);
impl_entity!(AuctionRecord, AuctionRecord);
