use std::fs;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use solana_program::pubkey::Pubkey;

use adx_core::{CreativeId, RequestId, MAX_DOMAIN_LEN, MAX_NAME_LEN};

use crate::error::{RelayError, RelayResult};

const DEFAULT_PROGRAM_ID: &str = "AdXExchange11111111111111111111111111111111";

/// Relay configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Exchange program ID used for address derivation
    #[serde(with = "pubkey_serde")]
    pub program_id: Pubkey,

    /// Mint of the settlement token
    #[serde(with = "pubkey_serde")]
    pub token_mint: Pubkey,

    /// Operator's cut of every clearing price, in percent
    pub platform_fee_percentage: u8,

    /// Publisher's cut, in percent
    pub publisher_rev_share: u8,

    /// Simulated delay before the base layer accepts a commit (milliseconds)
    pub commit_latency_ms: u64,

    /// Retry configuration, also bounds commit-back polling
    pub retry: RetryConfig,

    pub publishers: Vec<ParticipantConfig>,

    pub dsps: Vec<ParticipantConfig>,

    /// Auctions to drive, in order
    pub auctions: Vec<AuctionConfig>,
}

/// Publisher or DSP to onboard
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParticipantConfig {
    /// Name used to reference this participant elsewhere in the file
    pub name: String,

    pub domain: String,

    /// Tokens provisioned to the participant's account before bidding
    #[serde(default)]
    pub funds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuctionConfig {
    /// Auction name for logging
    pub name: String,

    /// Publisher name from `publishers`
    pub publisher: String,

    /// 32-byte request id, hex encoded
    pub request_id: String,

    pub floor_price: u64,

    pub bids: Vec<BidConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BidConfig {
    /// DSP name from `dsps`
    pub dsp: String,

    pub amount: u64,

    /// 32-byte creative id, hex encoded
    pub creative_id: String,
}

/// Retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum number of retries for retryable operations
    pub max_retries: u32,

    /// Base delay between retries in milliseconds
    pub base_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
}

impl RelayConfig {
    /// Load configuration from TOML file
    pub fn load(path: &str) -> RelayResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| RelayError::Io(format!("Failed to read config file {}: {}", path, e)))?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> RelayResult<Self> {
        let config: RelayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &str) -> RelayResult<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)
            .map_err(|e| RelayError::Io(format!("Failed to write config file {}: {}", path, e)))?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> RelayResult<()> {
        if self.platform_fee_percentage as u16 + self.publisher_rev_share as u16 != 100 {
            return Err(RelayError::InvalidConfig(format!(
                "platform_fee_percentage ({}) + publisher_rev_share ({}) must equal 100",
                self.platform_fee_percentage, self.publisher_rev_share
            )));
        }

        for participant in self.publishers.iter().chain(self.dsps.iter()) {
            participant.validate()?;
        }

        for auction in &self.auctions {
            if !self.publishers.iter().any(|p| p.name == auction.publisher) {
                return Err(RelayError::UnknownParticipant(auction.publisher.clone()));
            }
            auction.request_id()?;
            for bid in &auction.bids {
                if !self.dsps.iter().any(|d| d.name == bid.dsp) {
                    return Err(RelayError::UnknownParticipant(bid.dsp.clone()));
                }
                bid.creative_id()?;
            }
        }

        self.retry.validate()?;

        Ok(())
    }
}

impl ParticipantConfig {
    fn validate(&self) -> RelayResult<()> {
        if self.name.is_empty() {
            return Err(RelayError::InvalidConfig("participant name is empty".to_string()));
        }
        if self.name.len() > MAX_NAME_LEN || self.domain.len() > MAX_DOMAIN_LEN {
            return Err(RelayError::InvalidConfig(format!(
                "participant {} exceeds the {}-byte name/domain limit",
                self.name, MAX_NAME_LEN
            )));
        }
        Ok(())
    }
}

impl AuctionConfig {
    pub fn request_id(&self) -> RelayResult<RequestId> {
        decode_id("request_id", &self.request_id)
    }
}

impl BidConfig {
    pub fn creative_id(&self) -> RelayResult<CreativeId> {
        decode_id("creative_id", &self.creative_id)
    }
}

fn decode_id(field: &str, value: &str) -> RelayResult<[u8; 32]> {
    let bytes = hex::decode(value)
        .map_err(|e| RelayError::InvalidConfig(format!("{} {}: {}", field, value, e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        RelayError::InvalidConfig(format!("{} must be 32 bytes, got {}", field, b.len()))
    })
}

impl RetryConfig {
    /// Validate retry configuration
    fn validate(&self) -> RelayResult<()> {
        if self.max_retries == 0 {
            return Err(RelayError::InvalidConfig("max_retries must be greater than 0".to_string()));
        }

        if self.base_delay_ms == 0 {
            return Err(RelayError::InvalidConfig("base_delay_ms must be greater than 0".to_string()));
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(RelayError::InvalidConfig(format!(
                "max_delay_ms ({}) must be at least base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }

        if self.backoff_multiplier <= 1.0 {
            return Err(RelayError::InvalidConfig(format!(
                "backoff_multiplier ({}) must be greater than 1.0",
                self.backoff_multiplier
            )));
        }

        Ok(())
    }

    /// Calculate delay for retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return self.base_delay_ms;
        }

        let exponential_delay =
            self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        (exponential_delay as u64).min(self.max_delay_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            program_id: Pubkey::from_str(DEFAULT_PROGRAM_ID).unwrap_or_default(),
            token_mint: Pubkey::default(),
            platform_fee_percentage: 20,
            publisher_rev_share: 80,
            commit_latency_ms: 200,
            retry: RetryConfig::default(),
            publishers: vec![],
            dsps: vec![],
            auctions: vec![],
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Create example configuration file
pub fn create_example_config(path: &str) -> RelayResult<()> {
    example_config().save(path)
}

/// Two DSPs bidding on one request, and one auction where nobody meets the floor
pub fn example_config() -> RelayConfig {
    RelayConfig {
        publishers: vec![ParticipantConfig {
            name: "daily-news".to_string(),
            domain: "news.example".to_string(),
            funds: 0,
        }],
        dsps: vec![
            ParticipantConfig {
                name: "dsp-one".to_string(),
                domain: "one.example".to_string(),
                funds: 10_000_000,
            },
            ParticipantConfig {
                name: "dsp-two".to_string(),
                domain: "two.example".to_string(),
                funds: 10_000_000,
            },
        ],
        auctions: vec![
            AuctionConfig {
                name: "homepage-banner".to_string(),
                publisher: "daily-news".to_string(),
                request_id: hex::encode([1u8; 32]),
                floor_price: 1_000_000,
                bids: vec![
                    BidConfig {
                        dsp: "dsp-one".to_string(),
                        amount: 3_000_000,
                        creative_id: hex::encode([11u8; 32]),
                    },
                    BidConfig {
                        dsp: "dsp-two".to_string(),
                        amount: 2_000_000,
                        creative_id: hex::encode([12u8; 32]),
                    },
                ],
            },
            AuctionConfig {
                name: "sidebar".to_string(),
                publisher: "daily-news".to_string(),
                request_id: hex::encode([2u8; 32]),
                floor_price: 5_000_000,
                bids: vec![BidConfig {
                    dsp: "dsp-two".to_string(),
                    amount: 1_000_000,
                    creative_id: hex::encode([21u8; 32]),
                }],
            },
        ],
        ..RelayConfig::default()
    }
}

// Custom serde module for Pubkey
mod pubkey_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(pubkey: &Pubkey, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&pubkey.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Pubkey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Pubkey::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let mut config = example_config();
        assert!(config.validate().is_ok());

        config.publisher_rev_share = 70;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_bidder_rejected() {
        let mut config = example_config();
        config.auctions[0].bids[0].dsp = "nobody".to_string();
        assert!(matches!(
            config.validate(),
            Err(RelayError::UnknownParticipant(name)) if name == "nobody"
        ));
    }

    #[test]
    fn test_short_id_rejected() {
        let mut config = example_config();
        config.auctions[0].request_id = "abcd".to_string();
        assert!(matches!(config.validate(), Err(RelayError::InvalidConfig(_))));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = example_config();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = RelayConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.auctions.len(), 2);
        assert_eq!(parsed.program_id, config.program_id);
        assert_eq!(parsed.auctions[0].request_id().unwrap(), [1u8; 32]);
    }

    #[test]
    fn test_retry_delay_calculation() {
        let retry_config = RetryConfig::default();

        assert_eq!(retry_config.delay_for_attempt(0), 100);
        assert_eq!(retry_config.delay_for_attempt(1), 200);
        assert_eq!(retry_config.delay_for_attempt(2), 400);

        // Should cap at max_delay_ms
        assert_eq!(retry_config.delay_for_attempt(10), 5_000);
    }
}
