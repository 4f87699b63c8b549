pub mod cluster;
pub mod config;
pub mod error;
pub mod relay;

pub use cluster::{
    CommitStatus, Confirmation, ExchangeClient, Freshness, LocalCluster, Operation, Outcome,
    SignedRequest,
};
pub use config::{AuctionConfig, BidConfig, ParticipantConfig, RelayConfig, RetryConfig};
pub use error::{RelayError, RelayResult};
pub use relay::{AuctionOutcome, AuctionReport, Relay};
