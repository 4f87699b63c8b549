use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use solana_program::pubkey::Pubkey;

use adx_core::{AdxError, CommitId, RequestId};

use crate::cluster::{CommitStatus, Confirmation, ExchangeClient, Operation, Outcome, SignedRequest};
use crate::config::{AuctionConfig, RelayConfig, RetryConfig};
use crate::error::{RelayError, RelayResult};

/// Where an auction ended up after one relay pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionOutcome {
    Settled {
        winning_dsp: Pubkey,
        clearing_price: u64,
        platform_fee: u64,
        publisher_payment: u64,
        refunded_amount: u64,
    },
    /// Nobody met the floor. Request and bids are back on the base layer and
    /// the escrow can be reclaimed once the request expires
    NoEligibleBids,
    /// Commit-back not observed within the retry budget. Not a failure:
    /// `Relay::resume` picks the auction up from these commits
    InFlight { pending_commits: Vec<CommitId> },
    /// Dry run, nothing submitted
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionReport {
    pub name: String,
    pub request_id: String,
    pub outcome: AuctionOutcome,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

/// Drives configured auctions through ask, bid, delegate, clear,
/// undelegate, commit-wait, reconcile and settle
pub struct Relay<C: ExchangeClient> {
    client: Arc<C>,

    config: RelayConfig,

    /// Signs `process_auction` and every undelegation
    authority: Pubkey,

    /// Participant name to signing key
    keys: HashMap<String, Pubkey>,

    /// Dry run mode flag
    dry_run: bool,
}

impl<C: ExchangeClient> Relay<C> {
    pub fn new(
        client: Arc<C>,
        config: RelayConfig,
        authority: Pubkey,
        keys: HashMap<String, Pubkey>,
        dry_run: bool,
    ) -> Self {
        Self {
            client,
            config,
            authority,
            keys,
            dry_run,
        }
    }

    fn key(&self, name: &str) -> RelayResult<Pubkey> {
        self.keys
            .get(name)
            .copied()
            .ok_or_else(|| RelayError::UnknownParticipant(name.to_string()))
    }

    /// Sign against the latest view of the operation's layer and submit
    async fn send(&self, signer: Pubkey, operation: Operation) -> RelayResult<Outcome> {
        let freshness = self.client.freshness(operation.layer()).await?;
        let request = SignedRequest {
            signer,
            freshness,
            confirmation: Confirmation::Confirmed,
            operation,
        };
        self.client.submit(request).await
    }

    /// Retry residency conditions with backoff. Anything else is returned
    /// to the caller untouched
    async fn send_with_retry(&self, signer: Pubkey, operation: Operation) -> RelayResult<Outcome> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            match self.send(signer, operation.clone()).await {
                Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                    let delay = retry.delay_for_attempt(attempt);
                    log::debug!("Retrying in {}ms after: {}", delay, e);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Register every configured participant. Existing records are kept
    pub async fn register_participants(&self) -> RelayResult<usize> {
        let mut registered = 0;
        let publishers = self.config.publishers.iter().map(|p| (p, true));
        let dsps = self.config.dsps.iter().map(|d| (d, false));
        for (participant, is_publisher) in publishers.chain(dsps) {
            let owner = self.key(&participant.name)?;
            if self.dry_run {
                log::info!("[dry run] would register {}", participant.name);
                continue;
            }
            let operation = if is_publisher {
                Operation::RegisterPublisher {
                    name: participant.name.clone(),
                    domain: participant.domain.clone(),
                }
            } else {
                Operation::RegisterDsp {
                    name: participant.name.clone(),
                    domain: participant.domain.clone(),
                }
            };
            match self.send(owner, operation).await {
                Ok(_) => registered += 1,
                Err(RelayError::Exchange(AdxError::AlreadyRegistered)) => {
                    log::debug!("{} already registered", participant.name);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(registered)
    }

    /// Run every configured auction. A failed auction is logged and the
    /// rest still run
    pub async fn run_all(&self) -> Vec<AuctionReport> {
        let mut reports = Vec::new();
        for auction in &self.config.auctions {
            match self.run_auction(auction).await {
                Ok(report) => reports.push(report),
                Err(e) => log::error!("Auction {} failed: {}", auction.name, e),
            }
        }
        reports
    }

    pub async fn run_auction(&self, auction: &AuctionConfig) -> RelayResult<AuctionReport> {
        let request_id = auction.request_id()?;
        let publisher = self.key(&auction.publisher)?;
        log::info!("Running auction {}", auction.name);

        let outcome = if self.dry_run {
            log::info!(
                "[dry run] would open {} with floor {} and {} bids",
                auction.name,
                auction.floor_price,
                auction.bids.len()
            );
            AuctionOutcome::Skipped
        } else {
            self.drive(auction, publisher, request_id).await?
        };

        Ok(AuctionReport {
            name: auction.name.clone(),
            request_id: auction.request_id.clone(),
            outcome,
            finished_at: chrono::Utc::now(),
        })
    }

    async fn drive(
        &self,
        auction: &AuctionConfig,
        publisher: Pubkey,
        request_id: RequestId,
    ) -> RelayResult<AuctionOutcome> {
        let request = expect_created(
            self.send(
                publisher,
                Operation::PlaceAdAsk {
                    request_id,
                    floor_price: auction.floor_price,
                },
            )
            .await?,
        )?;
        self.send(publisher, Operation::Delegate { address: request })
            .await?;

        // Each DSP bids and delegates its own response
        let mut responses = Vec::with_capacity(auction.bids.len());
        for bid in &auction.bids {
            let dsp = self.key(&bid.dsp)?;
            let placed = self
                .send(
                    dsp,
                    Operation::PlaceAdBid {
                        publisher,
                        request_id,
                        bid_amount: bid.amount,
                        creative_id: bid.creative_id()?,
                    },
                )
                .await;
            let response = match placed {
                Ok(outcome) => expect_created(outcome)?,
                Err(RelayError::Exchange(e)) => {
                    log::warn!("Bid from {} on {} rejected: {}", bid.dsp, auction.name, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.send(dsp, Operation::Delegate { address: response })
                .await?;
            responses.push(response);
        }

        let cleared = self
            .send(
                self.authority,
                Operation::ProcessAuction {
                    publisher,
                    request_id,
                    responses: responses.clone(),
                },
            )
            .await;
        let record_address = match cleared {
            Ok(Outcome::Cleared(_)) => Some(adx_core::pda::auction_record_address(
                &adx_core::ProgramDerived::new(self.config.program_id),
                &publisher,
                &request_id,
            )),
            Ok(other) => return Err(unexpected(other)),
            Err(RelayError::Exchange(AdxError::NoEligibleBids)) => {
                log::info!(
                    "Auction {}: no bid met the floor, returning entities to base",
                    auction.name
                );
                None
            }
            Err(e) => return Err(e),
        };

        let mut commits = Vec::with_capacity(responses.len() + 2);
        for address in std::iter::once(request)
            .chain(responses.iter().copied())
            .chain(record_address)
        {
            match self
                .send(self.authority, Operation::Undelegate { address })
                .await?
            {
                Outcome::CommitScheduled(commit_id) => commits.push(commit_id),
                other => return Err(unexpected(other)),
            }
        }

        self.finish(auction, publisher, request_id, &commits).await
    }

    /// Continue an auction a previous pass left in flight: wait for its
    /// outstanding commits, then reconcile and settle
    pub async fn resume(
        &self,
        auction: &AuctionConfig,
        pending_commits: &[CommitId],
    ) -> RelayResult<AuctionReport> {
        let request_id = auction.request_id()?;
        let publisher = self.key(&auction.publisher)?;
        log::info!(
            "Resuming auction {} with {} pending commits",
            auction.name,
            pending_commits.len()
        );
        let outcome = self
            .finish(auction, publisher, request_id, pending_commits)
            .await?;
        Ok(AuctionReport {
            name: auction.name.clone(),
            request_id: auction.request_id.clone(),
            outcome,
            finished_at: chrono::Utc::now(),
        })
    }

    async fn finish(
        &self,
        auction: &AuctionConfig,
        publisher: Pubkey,
        request_id: RequestId,
        commits: &[CommitId],
    ) -> RelayResult<AuctionOutcome> {
        let pending = self.wait_for_commits(commits).await?;
        if !pending.is_empty() {
            log::warn!(
                "Auction {}: {} commits not observed yet, leaving in flight",
                auction.name,
                pending.len()
            );
            return Ok(AuctionOutcome::InFlight {
                pending_commits: pending,
            });
        }

        let reconciled = self
            .send_with_retry(
                publisher,
                Operation::ProcessAuctionResults {
                    publisher,
                    request_id,
                },
            )
            .await;
        let refunded_amount = match reconciled {
            Ok(Outcome::Reconciled {
                refunded_amount, ..
            }) => refunded_amount,
            Ok(other) => return Err(unexpected(other)),
            Err(RelayError::Exchange(AdxError::NotCleared)) => {
                return Ok(AuctionOutcome::NoEligibleBids)
            }
            Err(RelayError::Exchange(AdxError::AlreadyReconciled)) => {
                log::debug!("Auction {} already reconciled", auction.name);
                0
            }
            Err(e) => return Err(e),
        };
        let record = match self
            .send_with_retry(
                publisher,
                Operation::SettleAuction {
                    publisher,
                    request_id,
                },
            )
            .await?
        {
            Outcome::Settled(record) => record,
            other => return Err(unexpected(other)),
        };

        log::info!(
            "Auction {} settled: {} paid {}, fee {}",
            auction.name,
            record.winning_dsp,
            record.clearing_price,
            record.platform_fee
        );
        Ok(AuctionOutcome::Settled {
            winning_dsp: record.winning_dsp,
            clearing_price: record.clearing_price,
            platform_fee: record.platform_fee,
            publisher_payment: record.publisher_payment,
            refunded_amount,
        })
    }

    /// Return escrow for every configured bid the exchange has released.
    /// Bids still locked are skipped. Returns the total reclaimed
    pub async fn reclaim_bids(&self, auction: &AuctionConfig) -> RelayResult<u64> {
        let mut reclaimed = 0u64;
        for bid in &auction.bids {
            let dsp = self.key(&bid.dsp)?;
            let operation = Operation::ReclaimBid {
                creative_id: bid.creative_id()?,
            };
            match self.send(dsp, operation).await {
                Ok(Outcome::Reclaimed(amount)) => reclaimed = reclaimed.saturating_add(amount),
                Ok(other) => return Err(unexpected(other)),
                Err(RelayError::Exchange(e)) => {
                    log::debug!("Bid from {} on {} not reclaimed: {}", bid.dsp, auction.name, e);
                }
                Err(e) => return Err(e),
            }
        }
        if reclaimed > 0 {
            log::info!("Auction {}: reclaimed {} of escrow", auction.name, reclaimed);
        }
        Ok(reclaimed)
    }

    /// Poll commit lookup with exponential backoff. Returns the commits still
    /// unobserved once the retry budget runs out
    pub async fn wait_for_commits(&self, commits: &[CommitId]) -> RelayResult<Vec<CommitId>> {
        poll_commits(self.client.as_ref(), &self.config.retry, commits).await
    }
}

pub async fn poll_commits<C: ExchangeClient + ?Sized>(
    client: &C,
    retry: &RetryConfig,
    commits: &[CommitId],
) -> RelayResult<Vec<CommitId>> {
    let mut pending: Vec<CommitId> = commits.to_vec();
    for attempt in 0..=retry.max_retries {
        let mut still_pending = Vec::new();
        for commit_id in pending {
            match client.lookup_commit(commit_id).await? {
                CommitStatus::Landed => {}
                CommitStatus::Pending => still_pending.push(commit_id),
                CommitStatus::Unknown => {
                    log::warn!("Commit {} unknown to the base layer", commit_id);
                    still_pending.push(commit_id);
                }
            }
        }
        pending = still_pending;
        if pending.is_empty() || attempt == retry.max_retries {
            break;
        }
        let delay = retry.delay_for_attempt(attempt);
        log::debug!("{} commits pending, polling again in {}ms", pending.len(), delay);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    Ok(pending)
}

fn expect_created(outcome: Outcome) -> RelayResult<Pubkey> {
    match outcome {
        Outcome::Created(address) => Ok(address),
        other => Err(unexpected(other)),
    }
}

fn unexpected(outcome: Outcome) -> RelayError {
    RelayError::UnexpectedOutcome(format!("{:?}", outcome))
}

