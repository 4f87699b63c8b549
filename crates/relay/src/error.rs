//! Error types for the relay service

use adx_core::AdxError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Exchange rejected request: {0}")]
    Exchange(#[from] AdxError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Request routed to the wrong layer: {0}")]
    WrongLayer(String),

    #[error("Freshness token expired: {0}")]
    StaleFreshness(String),

    #[error("Unexpected outcome: {0}")]
    UnexpectedOutcome(String),

    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /// Exchange errors that clear up once a pending commit lands
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Exchange(err) => err.is_retryable(),
            RelayError::StaleFreshness(_) => true,
            _ => false,
        }
    }

    pub fn exchange_error(&self) -> Option<&AdxError> {
        match self {
            RelayError::Exchange(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        RelayError::InvalidConfig(err.to_string())
    }
}

impl From<toml::ser::Error> for RelayError {
    fn from(err: toml::ser::Error) -> Self {
        RelayError::Serialization(err.to_string())
    }
}
