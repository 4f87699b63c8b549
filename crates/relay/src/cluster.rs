//! Transaction submission seam and an in-process cluster.
//!
//! `ExchangeClient` is what the relay talks to: signed requests routed to a
//! layer, a freshness token per layer, and commit lookup by accelerated
//! transaction id. `LocalCluster` runs both layers in memory and lands
//! commits on the base layer after a configurable latency, so callers see
//! the same eventual consistency a deployed accelerated layer shows.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_program::pubkey::Pubkey;
use tokio::sync::Mutex;

use adx_core::{
    AuctionRecord, Clock, CommitId, CreativeId, Exchange, InMemoryTokenLedger, Layer,
    ProgramDerived, Reconciliation, RequestId, SystemClock, TokenLedger,
};

use crate::error::{RelayError, RelayResult};

/// Slots a freshness token stays valid for
pub const FRESHNESS_WINDOW: u64 = 150;

/// Proof the request was built against a recent view of the layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Freshness {
    pub layer: Layer,
    pub slot: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confirmation {
    Processed,
    Confirmed,
    Finalized,
}

/// Exchange operation carried by a signed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    RegisterPublisher { name: String, domain: String },
    RegisterDsp { name: String, domain: String },
    PlaceAdAsk { request_id: RequestId, floor_price: u64 },
    PlaceAdBid {
        publisher: Pubkey,
        request_id: RequestId,
        bid_amount: u64,
        creative_id: CreativeId,
    },
    Delegate { address: Pubkey },
    ProcessAuction {
        publisher: Pubkey,
        request_id: RequestId,
        responses: Vec<Pubkey>,
    },
    Undelegate { address: Pubkey },
    ProcessAuctionResults { publisher: Pubkey, request_id: RequestId },
    SettleAuction { publisher: Pubkey, request_id: RequestId },
    ReclaimBid { creative_id: CreativeId },
}

impl Operation {
    /// Layer the operation executes on
    pub fn layer(&self) -> Layer {
        match self {
            Operation::ProcessAuction { .. } | Operation::Undelegate { .. } => Layer::Accelerated,
            _ => Layer::Base,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRequest {
    pub signer: Pubkey,
    pub freshness: Freshness,
    pub confirmation: Confirmation,
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Done,
    Created(Pubkey),
    CommitScheduled(CommitId),
    Cleared(AuctionRecord),
    Reconciled {
        refunded_responses: usize,
        refunded_amount: u64,
    },
    Settled(AuctionRecord),
    Reclaimed(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitStatus {
    /// Artifact produced, base layer has not accepted it yet
    Pending,
    Landed,
    Unknown,
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn freshness(&self, layer: Layer) -> RelayResult<Freshness>;

    async fn submit(&self, request: SignedRequest) -> RelayResult<Outcome>;

    /// Translate an accelerated transaction id into its base-layer state
    async fn lookup_commit(&self, commit_id: CommitId) -> RelayResult<CommitStatus>;

    async fn token_balance(&self, owner: &Pubkey) -> RelayResult<u64>;
}

type LocalExchange<C> = Exchange<InMemoryTokenLedger, C>;

struct ClusterState<C: Clock> {
    exchange: LocalExchange<C>,
    /// Commits the base layer refused. Everything else issued and no longer
    /// pending has landed
    rejected: HashSet<CommitId>,
}

/// Both layers in one process
#[derive(Clone)]
pub struct LocalCluster<C: Clock = SystemClock> {
    state: Arc<Mutex<ClusterState<C>>>,
    commit_latency: Duration,
}

impl LocalCluster {
    pub fn new(program_id: Pubkey, commit_latency: Duration) -> Self {
        Self::with_clock(program_id, commit_latency, SystemClock)
    }
}

impl<C: Clock + Send + 'static> LocalCluster<C> {
    pub fn with_clock(program_id: Pubkey, commit_latency: Duration, clock: C) -> Self {
        let mut exchange = Exchange::new(
            ProgramDerived::new(program_id),
            InMemoryTokenLedger::new(),
            clock,
        );
        exchange.connect_accelerated();
        Self {
            state: Arc::new(Mutex::new(ClusterState {
                exchange,
                rejected: HashSet::new(),
            })),
            commit_latency,
        }
    }

    /// Set up the protocol singleton. Repeat calls are a no-op
    pub async fn bootstrap(
        &self,
        authority: Pubkey,
        token_mint: Pubkey,
        fee_pct: u8,
        rev_share_pct: u8,
    ) -> RelayResult<()> {
        let mut state = self.state.lock().await;
        match state
            .exchange
            .initialize(authority, token_mint, fee_pct, rev_share_pct)
        {
            Ok(()) | Err(adx_core::AdxError::AlreadyInitialized) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Token-account provisioning
    pub async fn fund(&self, owner: Pubkey, amount: u64) {
        self.state.lock().await.exchange.tokens_mut().credit(owner, amount);
    }

    pub async fn vault_balance(&self) -> RelayResult<adx_core::ExchangeVault> {
        Ok(self.state.lock().await.exchange.vault()?.clone())
    }

    /// Accept a commit on the base layer once the latency has elapsed
    fn schedule_commit(&self, commit_id: CommitId) {
        let state = Arc::clone(&self.state);
        let latency = self.commit_latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            let mut state = state.lock().await;
            // Already gone when a newer artifact for the same entity landed
            if state.exchange.lookup_commit(commit_id).is_none() {
                return;
            }
            if let Err(e) = state.exchange.accept_commit_by_id(commit_id) {
                log::warn!("Commit {} was not accepted: {}", commit_id, e);
                state.rejected.insert(commit_id);
            }
        });
    }

    fn execute(exchange: &mut LocalExchange<C>, signer: &Pubkey, operation: Operation) -> RelayResult<Outcome> {
        let outcome = match operation {
            Operation::RegisterPublisher { name, domain } => {
                Outcome::Created(exchange.register_publisher(*signer, &name, &domain, None)?)
            }
            Operation::RegisterDsp { name, domain } => {
                Outcome::Created(exchange.register_dsp(*signer, &name, &domain)?)
            }
            Operation::PlaceAdAsk {
                request_id,
                floor_price,
            } => Outcome::Created(exchange.place_ad_ask(signer, request_id, floor_price)?),
            Operation::PlaceAdBid {
                publisher,
                request_id,
                bid_amount,
                creative_id,
            } => Outcome::Created(exchange.place_ad_bid(
                signer,
                &publisher,
                request_id,
                bid_amount,
                creative_id,
            )?),
            Operation::Delegate { address } => {
                exchange.delegate(signer, &address)?;
                Outcome::Done
            }
            Operation::ProcessAuction {
                publisher,
                request_id,
                responses,
            } => Outcome::Cleared(exchange.process_auction(
                signer,
                &publisher,
                request_id,
                &responses,
            )?),
            Operation::Undelegate { address } => {
                Outcome::CommitScheduled(exchange.undelegate(signer, &address)?)
            }
            Operation::ProcessAuctionResults {
                publisher,
                request_id,
            } => {
                let Reconciliation {
                    refunded_responses,
                    refunded_amount,
                } = exchange.process_auction_results(&publisher, request_id)?;
                Outcome::Reconciled {
                    refunded_responses,
                    refunded_amount,
                }
            }
            Operation::SettleAuction {
                publisher,
                request_id,
            } => Outcome::Settled(exchange.settle_auction(&publisher, request_id)?),
            Operation::ReclaimBid { creative_id } => {
                Outcome::Reclaimed(exchange.reclaim_bid(signer, creative_id)?)
            }
        };
        Ok(outcome)
    }

    fn current_slot(exchange: &LocalExchange<C>, layer: Layer) -> RelayResult<u64> {
        Ok(match layer {
            Layer::Base => exchange.base_slot(),
            Layer::Accelerated => exchange
                .accelerated_slot()
                .ok_or(adx_core::AdxError::NotConnectedToAcceleratedLayer)?,
        })
    }
}

#[async_trait]
impl<C: Clock + Send + Sync + 'static> ExchangeClient for LocalCluster<C> {
    async fn freshness(&self, layer: Layer) -> RelayResult<Freshness> {
        let state = self.state.lock().await;
        let slot = Self::current_slot(&state.exchange, layer)?;
        Ok(Freshness { layer, slot })
    }

    async fn submit(&self, request: SignedRequest) -> RelayResult<Outcome> {
        let layer = request.operation.layer();
        if request.freshness.layer != layer {
            return Err(RelayError::WrongLayer(format!(
                "{:?} targets {:?} but was signed against {:?}",
                request.operation, layer, request.freshness.layer
            )));
        }

        let mut state = self.state.lock().await;
        let slot = Self::current_slot(&state.exchange, layer)?;
        if slot > request.freshness.slot + FRESHNESS_WINDOW {
            return Err(RelayError::StaleFreshness(format!(
                "signed at slot {}, {:?} layer is at {}",
                request.freshness.slot, layer, slot
            )));
        }

        let outcome = Self::execute(&mut state.exchange, &request.signer, request.operation)?;
        let events = state.exchange.drain_events().len();
        drop(state);

        if let Outcome::CommitScheduled(commit_id) = outcome {
            self.schedule_commit(commit_id);
        }
        log::debug!(
            "{:?} request confirmed ({:?}, {} events)",
            layer,
            request.confirmation,
            events
        );
        Ok(outcome)
    }

    async fn lookup_commit(&self, commit_id: CommitId) -> RelayResult<CommitStatus> {
        let state = self.state.lock().await;
        Ok(if state.exchange.lookup_commit(commit_id).is_some() {
            CommitStatus::Pending
        } else if state.exchange.commit_issued(commit_id) && !state.rejected.contains(&commit_id) {
            CommitStatus::Landed
        } else {
            CommitStatus::Unknown
        })
    }

    async fn token_balance(&self, owner: &Pubkey) -> RelayResult<u64> {
        Ok(self.state.lock().await.exchange.tokens().balance(owner))
    }
}
