//! # Core Error Types
//!
//! Every exchange entry point returns `AdxResult<T>`. Errors are grouped into
//! categories so relays can tell a retryable residency condition apart from a
//! terminal state error.

use thiserror::Error;

/// Exchange errors shared by both layers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
pub enum AdxError {
    // ========================================================================
    // Authorization
    // ========================================================================

    #[error("Signer is not authorized to perform this action")]
    Unauthorized,

    // ========================================================================
    // State
    // ========================================================================

    #[error("Protocol already initialized")]
    AlreadyInitialized,

    #[error("Protocol not initialized")]
    NotInitialized,

    #[error("Participant already registered")]
    AlreadyRegistered,

    #[error("Participant not registered")]
    NotRegistered,

    #[error("Request id already used by this publisher")]
    DuplicateRequest,

    #[error("Creative id already used by this DSP")]
    DuplicateResponse,

    #[error("Ad request not found")]
    RequestNotFound,

    #[error("Auction already cleared")]
    AlreadyCleared,

    #[error("Auction already settled")]
    AlreadySettled,

    #[error("Auction results already reconciled")]
    AlreadyReconciled,

    #[error("Auction not cleared")]
    NotCleared,

    #[error("Losing bids not yet refunded")]
    NotReconciled,

    #[error("Bid escrow is still bound to its auction")]
    BidLocked,

    #[error("The protocol is currently paused")]
    ProtocolPaused,

    #[error("Account not found")]
    AccountNotFound,

    #[error("Account holds a different entity type")]
    AccountTypeMismatch,

    // ========================================================================
    // Temporal
    // ========================================================================

    #[error("The request has expired")]
    Expired,

    // ========================================================================
    // Value
    // ========================================================================

    #[error("Operation exceeds available funds")]
    InsufficientFunds,

    #[error("Fee percentage and revenue share must sum to 100")]
    InvalidPercentages,

    #[error("Invalid amount: must be greater than zero")]
    InvalidAmount,

    #[error("String exceeds maximum allowed length")]
    StringTooLong,

    #[error("Withdrawal exceeds collected fees")]
    ExcessiveWithdrawal,

    #[error("Math overflow")]
    MathOverflow,

    // ========================================================================
    // Eligibility
    // ========================================================================

    #[error("No response meets the floor price")]
    NoEligibleBids,

    // ========================================================================
    // Residency and connectivity
    // ========================================================================

    #[error("No accelerated layer session is attached")]
    NotConnectedToAcceleratedLayer,

    #[error("Entity is not resident on the base layer")]
    AlreadyDelegated,

    #[error("Entity is not delegated to the accelerated layer")]
    NotDelegated,

    #[error("Entity is delegated; the base copy is read-only")]
    EntityDelegated,

    #[error("Commit for this entity has not been observed yet")]
    CommitPending,

    #[error("Commit artifact is stale or out of order")]
    StaleCommit,
}

/// Coarse grouping used by callers to decide between retry and abort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authorization,
    State,
    Temporal,
    Value,
    Eligibility,
    Connectivity,
}

/// Result type using exchange errors
pub type AdxResult<T> = Result<T, AdxError>;

impl AdxError {
    pub fn category(&self) -> ErrorCategory {
        use AdxError::*;
        match self {
            Unauthorized => ErrorCategory::Authorization,
            AlreadyInitialized | NotInitialized | AlreadyRegistered | NotRegistered
            | DuplicateRequest | DuplicateResponse | RequestNotFound | AlreadyCleared
            | AlreadySettled | AlreadyReconciled | NotCleared | NotReconciled | BidLocked
            | ProtocolPaused | AccountNotFound | AccountTypeMismatch => ErrorCategory::State,
            Expired => ErrorCategory::Temporal,
            InsufficientFunds | InvalidPercentages | InvalidAmount | StringTooLong
            | ExcessiveWithdrawal | MathOverflow => ErrorCategory::Value,
            NoEligibleBids => ErrorCategory::Eligibility,
            NotConnectedToAcceleratedLayer | AlreadyDelegated | NotDelegated
            | EntityDelegated | CommitPending | StaleCommit => ErrorCategory::Connectivity,
        }
    }

    /// True when the condition resolves on its own once a pending commit lands.
    /// Callers poll with backoff; the core never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdxError::CommitPending | AdxError::EntityDelegated | AdxError::AccountNotFound
        )
    }
}

#[cfg(feature = "anchor")]
impl From<AdxError> for anchor_lang::error::Error {
    fn from(err: AdxError) -> Self {
        anchor_lang::error::Error::from(anchor_lang::error::AnchorError {
            error_name: format!("{:?}", err),
            error_code_number: 6000,
            error_msg: err.to_string(),
            error_origin: None,
            compared_values: None,
        })
    }
}
