//! # Protocol Constants

// ============================================================================
// Lifecycle
// ============================================================================

/// Time an ad request stays open for bidding (12 hours)
pub const REQUEST_TTL_SECONDS: i64 = 60 * 60 * 12;

/// Maximum byte length for participant names and domains
pub const MAX_NAME_LEN: usize = 50;
pub const MAX_DOMAIN_LEN: usize = 50;

// ============================================================================
// Fees
// ============================================================================

/// Fee percentage and publisher revenue share must sum to this
pub const PERCENT_DENOMINATOR: u64 = 100;

// ============================================================================
// Identifiers
// ============================================================================

/// Publisher-chosen reference id for off-chain request details
pub type RequestId = [u8; 32];

/// Hash of the creative content a DSP bids with
pub type CreativeId = [u8; 32];
