//! # Delegation Controller
//!
//! Moves mutation authority for an entity between the base layer and the
//! accelerated layer:
//!
//! ```text
//! Resident(Base) --delegate--> Resident(Accelerated) --undelegate--> InFlight
//!       ^                                                               |
//!       +------------------------- accept_commit -----------------------+
//! ```
//!
//! Delegation is acknowledged synchronously. Commit-back is not: undelegation
//! only produces an artifact, and the base copy stays read-only until that
//! artifact is accepted. Correctness relies on each layer refusing writes to
//! entities it does not currently own, never on a lock.

use std::collections::{BTreeMap, HashMap};

use solana_program::pubkey::Pubkey;

use crate::clock::Clock;
use crate::constants::{CreativeId, RequestId};
use crate::errors::{AdxError, AdxResult};
use crate::events::ExchangeEvent;
use crate::exchange::Exchange;
use crate::pda;
use crate::state::{Account, EntityKind};
use crate::store::Layer;
use crate::token::TokenLedger;

/// Accelerated-layer transaction id of a commit
pub type CommitId = u64;

#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Resident(Layer),
    /// Undelegated on the accelerated layer, commit not yet accepted on base
    InFlight { commit_id: CommitId },
}

#[derive(Debug, Clone)]
struct ResidencyRecord {
    kind: EntityKind,
    residency: Residency,
    /// Sequence of the last artifact issued for this entity
    issued_seq: u64,
    /// Sequence of the last artifact the base layer accepted
    accepted_seq: u64,
}

/// Snapshot of an accelerated-layer copy, ready to replace the base copy
#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitArtifact {
    pub commit_id: CommitId,
    pub address: Pubkey,
    pub kind: EntityKind,
    pub snapshot: Account,
    /// Per-entity ordering; the base layer only accepts newer sequences
    pub seq: u64,
    /// Release authority back to the base layer once accepted
    pub undelegate: bool,
    pub accelerated_slot: u64,
}

#[derive(Debug, Default)]
pub struct DelegationController {
    records: HashMap<Pubkey, ResidencyRecord>,
    /// Artifacts produced on the accelerated layer, not yet accepted
    outbox: BTreeMap<CommitId, CommitArtifact>,
    next_commit_id: CommitId,
}

impl DelegationController {
    pub fn new() -> Self {
        Self {
            next_commit_id: 1,
            ..Self::default()
        }
    }

    /// Entities never delegated are resident on the base layer
    pub fn residency(&self, address: &Pubkey) -> Residency {
        self.records
            .get(address)
            .map(|r| r.residency)
            .unwrap_or(Residency::Resident(Layer::Base))
    }

    pub fn is_tracked(&self, address: &Pubkey) -> bool {
        self.records.contains_key(address)
    }

    pub fn pending_commits(&self) -> impl Iterator<Item = &CommitArtifact> {
        self.outbox.values()
    }

    pub fn lookup(&self, commit_id: CommitId) -> Option<&CommitArtifact> {
        self.outbox.get(&commit_id)
    }

    /// Base-resident → accelerated-resident, guarded on the current state
    fn mark_delegated(&mut self, address: Pubkey, kind: EntityKind) -> AdxResult<()> {
        match self.residency(&address) {
            Residency::Resident(Layer::Base) => {}
            _ => return Err(AdxError::AlreadyDelegated),
        }
        let record = self.records.entry(address).or_insert(ResidencyRecord {
            kind,
            residency: Residency::Resident(Layer::Base),
            issued_seq: 0,
            accepted_seq: 0,
        });
        record.residency = Residency::Resident(Layer::Accelerated);
        Ok(())
    }

    /// Track an entity created directly on the accelerated layer
    fn mark_born_delegated(&mut self, address: Pubkey, kind: EntityKind) {
        self.records.insert(
            address,
            ResidencyRecord {
                kind,
                residency: Residency::Resident(Layer::Accelerated),
                issued_seq: 0,
                accepted_seq: 0,
            },
        );
    }

    fn issue(
        &mut self,
        address: Pubkey,
        snapshot: Account,
        undelegate: bool,
        accelerated_slot: u64,
    ) -> AdxResult<CommitId> {
        let commit_id = self.next_commit_id;
        let record = self.records.get_mut(&address).ok_or(AdxError::NotDelegated)?;
        if record.residency != Residency::Resident(Layer::Accelerated) {
            return Err(AdxError::NotDelegated);
        }
        record.issued_seq += 1;
        if undelegate {
            record.residency = Residency::InFlight { commit_id };
        }
        let artifact = CommitArtifact {
            commit_id,
            address,
            kind: record.kind,
            snapshot,
            seq: record.issued_seq,
            undelegate,
            accelerated_slot,
        };
        self.outbox.insert(commit_id, artifact);
        self.next_commit_id += 1;
        Ok(commit_id)
    }

    /// Validate an artifact against the expected current state
    fn check_acceptable(&self, artifact: &CommitArtifact) -> AdxResult<()> {
        let record = self.records.get(&artifact.address).ok_or(AdxError::StaleCommit)?;
        if artifact.seq <= record.accepted_seq || artifact.kind != record.kind {
            return Err(AdxError::StaleCommit);
        }
        match (artifact.undelegate, record.residency) {
            (true, Residency::InFlight { commit_id }) if commit_id == artifact.commit_id => Ok(()),
            (false, Residency::Resident(Layer::Accelerated)) => Ok(()),
            (false, Residency::InFlight { .. }) => Ok(()),
            _ => Err(AdxError::StaleCommit),
        }
    }

    /// Also drops older artifacts for the same entity, which can never be
    /// accepted once a newer sequence landed
    fn mark_accepted(&mut self, artifact: &CommitArtifact) {
        self.outbox.retain(|_, pending| {
            pending.address != artifact.address || pending.seq > artifact.seq
        });
        if let Some(record) = self.records.get_mut(&artifact.address) {
            record.accepted_seq = artifact.seq;
            if artifact.undelegate {
                record.residency = Residency::Resident(Layer::Base);
            }
        }
    }

    /// Forget an entity that was closed on the base layer
    pub(crate) fn forget(&mut self, address: &Pubkey) {
        self.records.remove(address);
        self.outbox.retain(|_, pending| pending.address != *address);
    }

    /// Whether `commit_id` was ever handed out
    pub fn was_issued(&self, commit_id: CommitId) -> bool {
        commit_id > 0 && commit_id < self.next_commit_id
    }
}

impl<T: TokenLedger, C: Clock> Exchange<T, C> {
    // ========================================================================
    // Base layer: delegate
    // ========================================================================

    /// Hand mutation authority for `address` to the accelerated layer.
    /// Only the entity's base-layer authority may do this
    pub fn delegate(&mut self, signer: &Pubkey, address: &Pubkey) -> AdxResult<()> {
        if self.accelerated.is_none() {
            return Err(AdxError::NotConnectedToAcceleratedLayer);
        }
        let account = self
            .base
            .accounts
            .raw(address)
            .ok_or(AdxError::AccountNotFound)?
            .clone();
        let kind = account.entity_kind().ok_or(AdxError::AccountTypeMismatch)?;
        if account.owner() != *signer {
            return Err(AdxError::Unauthorized);
        }

        self.delegation.mark_delegated(*address, kind)?;
        let accelerated = self.accelerated_mut()?;
        accelerated.accounts.put_raw(*address, account);
        accelerated.advance();

        let timestamp = self.now();
        log::info!("Delegated {:?} {} to accelerated layer", kind, address);
        self.emit(ExchangeEvent::EntityDelegated {
            kind,
            address: *address,
            timestamp,
        });
        Ok(())
    }

    pub fn delegate_ad_request(
        &mut self,
        signer: &Pubkey,
        publisher: &Pubkey,
        request_id: &RequestId,
    ) -> AdxResult<()> {
        let address = pda::ad_request_address(self.deriver(), publisher, request_id);
        self.delegate(signer, &address)
    }

    pub fn delegate_ad_response(
        &mut self,
        signer: &Pubkey,
        dsp: &Pubkey,
        creative_id: &CreativeId,
    ) -> AdxResult<()> {
        let address = pda::ad_response_address(self.deriver(), dsp, creative_id);
        self.delegate(signer, &address)
    }

    pub fn delegate_auction_record(
        &mut self,
        signer: &Pubkey,
        publisher: &Pubkey,
        request_id: &RequestId,
    ) -> AdxResult<()> {
        let address = pda::auction_record_address(self.deriver(), publisher, request_id);
        self.delegate(signer, &address)
    }

    // ========================================================================
    // Accelerated layer: commit / undelegate
    // ========================================================================

    /// Publish the accelerated copy without releasing authority
    pub fn commit(&mut self, signer: &Pubkey, address: &Pubkey) -> AdxResult<CommitId> {
        self.issue_commit(signer, address, false)
    }

    /// Freeze the accelerated copy and schedule it for commit-back.
    /// The entity is in flight until the base layer accepts the artifact
    pub fn undelegate(&mut self, signer: &Pubkey, address: &Pubkey) -> AdxResult<CommitId> {
        self.issue_commit(signer, address, true)
    }

    pub fn undelegate_request_after_auction(
        &mut self,
        signer: &Pubkey,
        publisher: &Pubkey,
        request_id: &RequestId,
    ) -> AdxResult<CommitId> {
        let address = pda::ad_request_address(self.deriver(), publisher, request_id);
        self.undelegate(signer, &address)
    }

    pub fn undelegate_response_after_auction(
        &mut self,
        signer: &Pubkey,
        dsp: &Pubkey,
        creative_id: &CreativeId,
    ) -> AdxResult<CommitId> {
        let address = pda::ad_response_address(self.deriver(), dsp, creative_id);
        self.undelegate(signer, &address)
    }

    pub fn undelegate_auction_record_after_auction(
        &mut self,
        signer: &Pubkey,
        publisher: &Pubkey,
        request_id: &RequestId,
    ) -> AdxResult<CommitId> {
        let address = pda::auction_record_address(self.deriver(), publisher, request_id);
        self.undelegate(signer, &address)
    }

    fn issue_commit(
        &mut self,
        signer: &Pubkey,
        address: &Pubkey,
        undelegate: bool,
    ) -> AdxResult<CommitId> {
        self.ensure_delegated(address)?;
        let authority = self.config()?.authority;
        let accelerated = self.layer(Layer::Accelerated)?;
        let snapshot = accelerated
            .accounts
            .raw(address)
            .ok_or(AdxError::AccountNotFound)?
            .clone();
        if snapshot.owner() != *signer && authority != *signer {
            return Err(AdxError::Unauthorized);
        }

        let slot = self.accelerated_mut()?.advance();
        let commit_id = self.delegation.issue(*address, snapshot, undelegate, slot)?;
        log::info!(
            "Scheduled commit {} for {} (undelegate: {})",
            commit_id,
            address,
            undelegate
        );
        self.emit(ExchangeEvent::CommitScheduled {
            commit_id,
            address: *address,
            undelegate,
        });
        Ok(commit_id)
    }

    // ========================================================================
    // Base layer: commit acceptance
    // ========================================================================

    /// Commit lookup: accelerated transaction id to the artifact the base
    /// layer will accept. None once accepted or if the id is unknown
    pub fn lookup_commit(&self, commit_id: CommitId) -> Option<&CommitArtifact> {
        self.delegation.lookup(commit_id)
    }

    pub fn pending_commits(&self) -> Vec<CommitId> {
        self.delegation.pending_commits().map(|a| a.commit_id).collect()
    }

    /// True for any id the accelerated layer produced, landed or not
    pub fn commit_issued(&self, commit_id: CommitId) -> bool {
        self.delegation.was_issued(commit_id)
    }

    /// Replace the base copy with the artifact's snapshot. For undelegation
    /// artifacts the entity becomes base-resident and the accelerated copy
    /// is dropped
    pub fn accept_commit(&mut self, artifact: &CommitArtifact) -> AdxResult<()> {
        self.delegation.check_acceptable(artifact)?;

        self.base
            .accounts
            .put_raw(artifact.address, artifact.snapshot.clone());
        self.base.advance();
        if artifact.undelegate {
            if let Some(accelerated) = self.accelerated.as_mut() {
                accelerated.accounts.remove(&artifact.address);
            }
        }
        self.delegation.mark_accepted(artifact);

        let resident = if artifact.undelegate {
            Layer::Base
        } else {
            Layer::Accelerated
        };
        log::info!(
            "Accepted commit {} for {:?} {}",
            artifact.commit_id,
            artifact.kind,
            artifact.address
        );
        self.emit(ExchangeEvent::CommitAccepted {
            commit_id: artifact.commit_id,
            address: artifact.address,
            resident,
        });
        Ok(())
    }

    /// Accept a pending artifact by id
    pub fn accept_commit_by_id(&mut self, commit_id: CommitId) -> AdxResult<()> {
        let artifact = self
            .delegation
            .lookup(commit_id)
            .cloned()
            .ok_or(AdxError::StaleCommit)?;
        self.accept_commit(&artifact)
    }

    /// Accept every pending artifact in issue order. Returns how many landed
    pub fn flush_commits(&mut self) -> AdxResult<usize> {
        let mut landed = 0;
        for id in self.pending_commits() {
            // Superseded by an artifact accepted earlier in this pass
            if self.delegation.lookup(id).is_none() {
                continue;
            }
            self.accept_commit_by_id(id)?;
            landed += 1;
        }
        Ok(landed)
    }

    // ========================================================================
    // Accelerated layer: entity birth
    // ========================================================================

    pub(crate) fn create_on_accelerated(&mut self, address: Pubkey, account: Account) -> AdxResult<()> {
        let kind = account.entity_kind().ok_or(AdxError::AccountTypeMismatch)?;
        self.accelerated_mut()?.accounts.put_raw(address, account);
        self.delegation.mark_born_delegated(address, kind);
        Ok(())
    }
}
