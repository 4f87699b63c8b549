//! # AdX Core - Two-Layer Ad Exchange
//!
//! Auction and escrow state machine shared by the on-chain program and
//! off-chain relays. It provides:
//!
//! - Entity layouts and deterministic address derivation
//! - Registry, ask/bid lifecycle, clearing and settlement
//! - The delegation controller that moves mutation authority between the
//!   base layer and the accelerated layer
//! - Collaborator seams for token movement, time and address derivation
//!
//! ## Feature Flags
//!
//! - `anchor`: Enables Anchor serialization for on-chain use
//! - `client`: Enables standard serialization for off-chain use

pub mod clock;
pub mod constants;
pub mod errors;
pub mod events;
pub mod exchange;
pub mod math;
pub mod pda;
pub mod state;
pub mod store;
pub mod token;

pub mod auction;
pub mod delegation;
pub mod lifecycle;
pub mod registry;
pub mod settlement;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used items
pub use auction::{select_winner, Candidate};
pub use clock::{Clock, ManualClock, SystemClock};
pub use constants::*;
pub use delegation::{CommitArtifact, CommitId, Residency};
pub use errors::{AdxError, AdxResult, ErrorCategory};
pub use events::ExchangeEvent;
pub use exchange::Exchange;
pub use math::{split_clearing_price, FeeSplit};
pub use pda::{AddressDeriver, ProgramDerived};
pub use settlement::Reconciliation;
pub use state::*;
pub use store::Layer;
pub use token::{InMemoryTokenLedger, TokenLedger, TokenTransfer};
