//! Deterministic address derivation.
//! Single source of truth for all seeds. Every entity address is a pure
//! function of stable seeds, so the store needs no index or directory.

use solana_program::pubkey::Pubkey;

use crate::constants::{CreativeId, RequestId};

// ============================================================================
// Seed Constants
// ============================================================================

pub const CONFIG_SEED: &[u8] = b"adx_config";
pub const VAULT_SEED: &[u8] = b"adx_vault";
pub const PUBLISHER_SEED: &[u8] = b"publisher";
pub const DSP_SEED: &[u8] = b"dsp";
pub const AD_REQUEST_SEED: &[u8] = b"ad_request";
pub const AD_RESPONSE_SEED: &[u8] = b"ad_response";
pub const AUCTION_RECORD_SEED: &[u8] = b"auction_record";

/// Seed-bytes to address derivation collaborator
pub trait AddressDeriver {
    fn derive(&self, seeds: &[&[u8]]) -> Pubkey;
}

/// Program-derived addresses, the same derivation the on-chain program uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramDerived {
    pub program_id: Pubkey,
}

impl ProgramDerived {
    pub fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }
}

impl AddressDeriver for ProgramDerived {
    fn derive(&self, seeds: &[&[u8]]) -> Pubkey {
        Pubkey::find_program_address(seeds, &self.program_id).0
    }
}

// ============================================================================
// Derivation Functions
// ============================================================================

pub fn config_address(deriver: &dyn AddressDeriver) -> Pubkey {
    deriver.derive(&[CONFIG_SEED])
}

pub fn vault_address(deriver: &dyn AddressDeriver) -> Pubkey {
    deriver.derive(&[VAULT_SEED])
}

pub fn publisher_address(deriver: &dyn AddressDeriver, owner: &Pubkey) -> Pubkey {
    deriver.derive(&[PUBLISHER_SEED, owner.as_ref()])
}

pub fn dsp_address(deriver: &dyn AddressDeriver, owner: &Pubkey) -> Pubkey {
    deriver.derive(&[DSP_SEED, owner.as_ref()])
}

pub fn ad_request_address(
    deriver: &dyn AddressDeriver,
    publisher: &Pubkey,
    request_id: &RequestId,
) -> Pubkey {
    deriver.derive(&[AD_REQUEST_SEED, publisher.as_ref(), request_id])
}

pub fn ad_response_address(
    deriver: &dyn AddressDeriver,
    dsp: &Pubkey,
    creative_id: &CreativeId,
) -> Pubkey {
    deriver.derive(&[AD_RESPONSE_SEED, dsp.as_ref(), creative_id])
}

pub fn auction_record_address(
    deriver: &dyn AddressDeriver,
    publisher: &Pubkey,
    request_id: &RequestId,
) -> Pubkey {
    deriver.derive(&[AUCTION_RECORD_SEED, publisher.as_ref(), request_id])
}
