//! # Registry
//!
//! Protocol configuration singleton, the shared vault, and one-time
//! publisher / DSP onboarding.

use solana_program::pubkey::Pubkey;

use crate::clock::Clock;
use crate::constants::{MAX_DOMAIN_LEN, MAX_NAME_LEN, PERCENT_DENOMINATOR};
use crate::errors::{AdxError, AdxResult};
use crate::events::ExchangeEvent;
use crate::exchange::Exchange;
use crate::pda;
use crate::state::{Dsp, ExchangeVault, ProtocolConfig, Publisher};
use crate::token::TokenLedger;

fn validate_percentages(fee_pct: u8, rev_share_pct: u8) -> AdxResult<()> {
    if fee_pct as u64 + rev_share_pct as u64 != PERCENT_DENOMINATOR {
        return Err(AdxError::InvalidPercentages);
    }
    Ok(())
}

fn validate_profile(name: &str, domain: &str) -> AdxResult<()> {
    if name.len() > MAX_NAME_LEN || domain.len() > MAX_DOMAIN_LEN {
        return Err(AdxError::StringTooLong);
    }
    Ok(())
}

impl<T: TokenLedger, C: Clock> Exchange<T, C> {
    /// Create the protocol config and the shared vault. Runs exactly once
    pub fn initialize(
        &mut self,
        authority: Pubkey,
        token_mint: Pubkey,
        fee_pct: u8,
        rev_share_pct: u8,
    ) -> AdxResult<()> {
        let config_address = pda::config_address(self.deriver());
        let vault_address = pda::vault_address(self.deriver());
        if self.base.accounts.contains(&config_address) {
            return Err(AdxError::AlreadyInitialized);
        }
        validate_percentages(fee_pct, rev_share_pct)?;

        self.base.accounts.insert(
            config_address,
            ProtocolConfig {
                authority,
                token_mint,
                platform_fee_percentage: fee_pct,
                publisher_rev_share: rev_share_pct,
                is_paused: false,
            },
        );
        // The vault's token account is owned by the vault address itself
        self.base.accounts.insert(
            vault_address,
            ExchangeVault {
                authority,
                token_account: vault_address,
                token_mint,
                total_balance: 0,
                pending_settlements: 0,
                fee_balance: 0,
            },
        );
        self.base.advance();

        log::info!(
            "Protocol initialized: fee {}%, publisher share {}%",
            fee_pct,
            rev_share_pct
        );
        self.emit(ExchangeEvent::ProtocolInitialized {
            authority,
            platform_fee_percentage: fee_pct,
            publisher_rev_share: rev_share_pct,
        });
        Ok(())
    }

    pub fn set_paused(&mut self, signer: &Pubkey, paused: bool) -> AdxResult<()> {
        let config_address = pda::config_address(self.deriver());
        let config = self.base.accounts.get_mut::<ProtocolConfig>(&config_address)?;
        if config.authority != *signer {
            return Err(AdxError::Unauthorized);
        }
        config.is_paused = paused;
        self.base.advance();

        log::info!("Protocol {}", if paused { "paused" } else { "unpaused" });
        self.emit(ExchangeEvent::PauseToggled { paused });
        Ok(())
    }

    // ========================================================================
    // Participants
    // ========================================================================

    pub fn publisher_exists(&self, owner: &Pubkey) -> bool {
        let address = pda::publisher_address(self.deriver(), owner);
        self.base.accounts.contains(&address)
    }

    pub fn dsp_exists(&self, owner: &Pubkey) -> bool {
        let address = pda::dsp_address(self.deriver(), owner);
        self.base.accounts.contains(&address)
    }

    pub fn publisher(&self, owner: &Pubkey) -> AdxResult<&Publisher> {
        let address = pda::publisher_address(self.deriver(), owner);
        self.base
            .accounts
            .find::<Publisher>(&address)?
            .ok_or(AdxError::NotRegistered)
    }

    pub fn dsp(&self, owner: &Pubkey) -> AdxResult<&Dsp> {
        let address = pda::dsp_address(self.deriver(), owner);
        self.base
            .accounts
            .find::<Dsp>(&address)?
            .ok_or(AdxError::NotRegistered)
    }

    /// Onboard a publisher. Payments go to `payment_address`, or to the
    /// owner when none is given
    pub fn register_publisher(
        &mut self,
        owner: Pubkey,
        name: &str,
        domain: &str,
        payment_address: Option<Pubkey>,
    ) -> AdxResult<Pubkey> {
        self.ensure_not_paused()?;
        validate_profile(name, domain)?;
        let address = pda::publisher_address(self.deriver(), &owner);
        if self.base.accounts.contains(&address) {
            return Err(AdxError::AlreadyRegistered);
        }

        let created_at = self.now();
        self.base.accounts.insert(
            address,
            Publisher {
                authority: owner,
                payment_address: payment_address.unwrap_or(owner),
                name: name.to_string(),
                domain: domain.to_string(),
                total_revenue: 0,
                created_at,
            },
        );
        self.base.advance();

        log::info!("Registered publisher {} ({})", name, owner);
        self.emit(ExchangeEvent::PublisherRegistered { publisher: owner });
        Ok(address)
    }

    pub fn register_dsp(&mut self, owner: Pubkey, name: &str, domain: &str) -> AdxResult<Pubkey> {
        self.ensure_not_paused()?;
        validate_profile(name, domain)?;
        let address = pda::dsp_address(self.deriver(), &owner);
        if self.base.accounts.contains(&address) {
            return Err(AdxError::AlreadyRegistered);
        }

        let created_at = self.now();
        self.base.accounts.insert(
            address,
            Dsp {
                authority: owner,
                name: name.to_string(),
                domain: domain.to_string(),
                balance: 0,
                created_at,
            },
        );
        self.base.advance();

        log::info!("Registered DSP {} ({})", name, owner);
        self.emit(ExchangeEvent::DspRegistered { dsp: owner });
        Ok(address)
    }
}
