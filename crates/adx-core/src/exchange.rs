//! # Exchange
//!
//! Holds both ledgers, the delegation controller and the collaborators.
//! Operations live next to the component they belong to (`registry`,
//! `lifecycle`, `delegation`, `auction`, `settlement`) as `impl` blocks on
//! this type. Every operation validates first and writes last, so a failed
//! call leaves every account and token balance untouched.

use solana_program::pubkey::Pubkey;

use crate::clock::Clock;
use crate::constants::RequestId;
use crate::delegation::{DelegationController, Residency};
use crate::errors::{AdxError, AdxResult};
use crate::events::ExchangeEvent;
use crate::pda::{self, AddressDeriver};
use crate::state::{AdRequest, Entity, ExchangeVault, ProtocolConfig, RequestStatus};
use crate::store::{Layer, LayerState};
use crate::token::TokenLedger;

pub struct Exchange<T: TokenLedger, C: Clock> {
    pub(crate) deriver: Box<dyn AddressDeriver + Send + Sync>,
    pub(crate) base: LayerState,
    /// Attached accelerated session, if any
    pub(crate) accelerated: Option<LayerState>,
    pub(crate) delegation: DelegationController,
    pub(crate) tokens: T,
    pub(crate) clock: C,
    events: Vec<ExchangeEvent>,
}

impl<T: TokenLedger, C: Clock> Exchange<T, C> {
    pub fn new<D>(deriver: D, tokens: T, clock: C) -> Self
    where
        D: AddressDeriver + Send + Sync + 'static,
    {
        Self {
            deriver: Box::new(deriver),
            base: LayerState::new(Layer::Base),
            accelerated: None,
            delegation: DelegationController::new(),
            tokens,
            clock,
            events: Vec::new(),
        }
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Attach an accelerated layer session. Idempotent
    pub fn connect_accelerated(&mut self) {
        if self.accelerated.is_none() {
            log::info!("Accelerated layer session attached");
            self.accelerated = Some(LayerState::new(Layer::Accelerated));
        }
    }

    pub fn is_connected(&self) -> bool {
        self.accelerated.is_some()
    }

    pub fn base_slot(&self) -> u64 {
        self.base.slot
    }

    pub fn accelerated_slot(&self) -> Option<u64> {
        self.accelerated.as_ref().map(|layer| layer.slot)
    }

    // ========================================================================
    // Collaborators
    // ========================================================================

    pub fn tokens(&self) -> &T {
        &self.tokens
    }

    pub fn tokens_mut(&mut self) -> &mut T {
        &mut self.tokens
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn deriver(&self) -> &dyn AddressDeriver {
        self.deriver.as_ref()
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.unix_timestamp()
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub(crate) fn emit(&mut self, event: ExchangeEvent) {
        log::debug!("event: {:?}", event);
        self.events.push(event);
    }

    pub fn events(&self) -> &[ExchangeEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<ExchangeEvent> {
        std::mem::take(&mut self.events)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub(crate) fn layer(&self, layer: Layer) -> AdxResult<&LayerState> {
        match layer {
            Layer::Base => Ok(&self.base),
            Layer::Accelerated => self
                .accelerated
                .as_ref()
                .ok_or(AdxError::NotConnectedToAcceleratedLayer),
        }
    }

    pub(crate) fn accelerated_mut(&mut self) -> AdxResult<&mut LayerState> {
        self.accelerated
            .as_mut()
            .ok_or(AdxError::NotConnectedToAcceleratedLayer)
    }

    /// Copy of an account as a given layer currently holds it.
    /// A record cleared on the accelerated layer reads `AccountNotFound` on
    /// the base layer until its commit is accepted
    pub fn fetch<E: Entity>(&self, layer: Layer, address: &Pubkey) -> AdxResult<E> {
        self.layer(layer)?.accounts.get::<E>(address).cloned()
    }

    pub fn residency(&self, address: &Pubkey) -> Residency {
        self.delegation.residency(address)
    }

    pub fn config(&self) -> AdxResult<&ProtocolConfig> {
        let address = pda::config_address(self.deriver());
        self.base
            .accounts
            .find::<ProtocolConfig>(&address)?
            .ok_or(AdxError::NotInitialized)
    }

    pub fn vault(&self) -> AdxResult<&ExchangeVault> {
        let address = pda::vault_address(self.deriver());
        self.base
            .accounts
            .find::<ExchangeVault>(&address)?
            .ok_or(AdxError::NotInitialized)
    }

    /// Status from the freshest copy of the request, reporting `Delegated`
    /// for an open request held by the accelerated layer
    pub fn request_status(&self, publisher: &Pubkey, request_id: &RequestId) -> AdxResult<RequestStatus> {
        let address = pda::ad_request_address(self.deriver(), publisher, request_id);
        let residency = self.residency(&address);
        let request = match residency {
            Residency::Resident(Layer::Base) => self.base.accounts.get::<AdRequest>(&address)?,
            Residency::Resident(Layer::Accelerated) | Residency::InFlight { .. } => {
                self.layer(Layer::Accelerated)?.accounts.get::<AdRequest>(&address)?
            }
        };
        Ok(match (request.status, residency) {
            (RequestStatus::Open, Residency::Resident(Layer::Accelerated)) => RequestStatus::Delegated,
            (status, _) => status,
        })
    }

    // ========================================================================
    // Guards
    // ========================================================================

    pub(crate) fn ensure_not_paused(&self) -> AdxResult<()> {
        if self.config()?.is_paused {
            return Err(AdxError::ProtocolPaused);
        }
        Ok(())
    }

    /// Base-layer writes require the entity to be resident there
    pub(crate) fn ensure_base_writable(&self, address: &Pubkey) -> AdxResult<()> {
        match self.residency(address) {
            Residency::Resident(Layer::Base) => Ok(()),
            Residency::Resident(Layer::Accelerated) => Err(AdxError::EntityDelegated),
            Residency::InFlight { .. } => Err(AdxError::CommitPending),
        }
    }

    /// Accelerated-layer writes require an active delegation
    pub(crate) fn ensure_delegated(&self, address: &Pubkey) -> AdxResult<()> {
        if self.accelerated.is_none() {
            return Err(AdxError::NotConnectedToAcceleratedLayer);
        }
        match self.residency(address) {
            Residency::Resident(Layer::Accelerated) => Ok(()),
            _ => Err(AdxError::NotDelegated),
        }
    }

    /// Read an entity that must be current on the base layer. Absent with a
    /// pending delegation means the commit has not landed yet
    pub(crate) fn base_current<E: Entity>(&self, address: &Pubkey) -> AdxResult<Option<&E>> {
        match self.base.accounts.find::<E>(address)? {
            Some(entity) => {
                self.ensure_base_writable(address)?;
                Ok(Some(entity))
            }
            None if self.delegation.is_tracked(address) => Err(AdxError::CommitPending),
            None => Ok(None),
        }
    }
}
