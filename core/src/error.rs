use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EconomyError {
    #[error("Engine not initialized")]
    NotInitialized,

    #[error("Insufficient funds: need {required}, have {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Upgrade '{id}' not found")]
    UnknownUpgrade { id: String },

    #[error("Invalid snapshot: {reason}")]
    InvalidSnapshot { reason: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Decimal overflow")]
    Overflow,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EconomyResult<T> = Result<T, EconomyError>;

/// Failures of a call to the authority.
/// Never propagated into the frame loop: the session converts them to outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    TransientNetwork(String),

    #[error("Rejected by authority: {message}")]
    AuthorityRejection { message: String },

    #[error("Malformed response: {reason}")]
    MalformedResponse { reason: String },
}

impl RemoteError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse { reason: reason.into() }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::AuthorityRejection { message: message.into() }
    }

    /// Transient failures are retried by the next timer firing.
    /// Malformed responses are treated the same way.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::AuthorityRejection { .. })
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;
