//! Error taxonomy.
//!
//! Infrastructure adapters fail with [`StoreError`] (cache tier),
//! [`RepositoryError`] (durable tier) or [`BrokerError`] (messaging). Services
//! map every failure onto [`SeckillError`], whose variants correspond one to one
//! with the response codes in [`crate::response::ResponseCode`].

use crate::response::ResponseCode;
use thiserror::Error;

/// Business-rule rejection of a purchase. Terminal, never retried by the system.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Not enough stock left for the requested count.
    #[error("insufficient stock")]
    InsufficientStock,
    /// The user already bought in this activity.
    #[error("already participated in this activity")]
    AlreadyParticipated,
    /// The sale window has not opened yet.
    #[error("activity has not started")]
    NotStarted,
    /// The sale window has closed.
    #[error("activity has ended")]
    Ended,
    /// The activity was disabled administratively.
    #[error("activity is unavailable")]
    Unavailable,
}

impl Rejection {
    /// Short snake_case label for metrics and logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::InsufficientStock => "insufficient_stock",
            Self::AlreadyParticipated => "already_participated",
            Self::NotStarted => "not_started",
            Self::Ended => "ended",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Errors surfaced by seckill services.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeckillError {
    /// Malformed or missing input. Never retried.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Activity or order does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Business-rule rejection.
    #[error(transparent)]
    Conflict(#[from] Rejection),

    /// The per-activity lock is held by another caller.
    #[error("system busy, please retry later")]
    LockBusy,

    /// Cache, database or broker failure, or an expired deadline.
    #[error("internal error: {0}")]
    Transient(String),
}

impl SeckillError {
    /// Response code for this error.
    #[must_use]
    pub const fn code(&self) -> ResponseCode {
        match self {
            Self::Validation(_) => ResponseCode::Validation,
            Self::NotFound(_) => ResponseCode::NotFound,
            Self::Conflict(_) => ResponseCode::Conflict,
            Self::LockBusy => ResponseCode::LockBusy,
            Self::Transient(_) => ResponseCode::Internal,
        }
    }

    /// Whether a caller may reasonably retry the same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LockBusy | Self::Transient(_))
    }

    /// Shorthand for a deadline expiry.
    #[must_use]
    pub fn deadline_exceeded() -> Self {
        Self::Transient("deadline exceeded".to_string())
    }
}

/// Errors from the cache tier (stock store, lock, ledger, activity cache).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Could not reach the cache server.
    #[error("Cache connection failed: {0}")]
    ConnectionFailed(String),

    /// A cache command failed.
    #[error("Cache command '{command}' failed: {reason}")]
    CommandFailed {
        /// The command or script that failed
        command: &'static str,
        /// The reason for failure
        reason: String,
    },

    /// The server answered with a value the adapter does not understand.
    #[error("Unexpected cache reply: {0}")]
    UnexpectedReply(String),

    /// A cached value could not be encoded or decoded.
    #[error("Cache serialization failed: {0}")]
    Serialization(String),
}

/// Errors from the durable tier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Could not reach the database.
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    /// A query failed.
    #[error("Database query failed: {0}")]
    QueryFailed(String),

    /// A unique constraint rejected the write.
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// A row could not be mapped onto a domain type.
    #[error("Row decode failed: {0}")]
    Decode(String),
}

/// Errors from the message broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Could not connect to the broker.
    #[error("Broker connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a topic.
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// A message body could not be encoded or decoded.
    #[error("Message serialization failed: {0}")]
    Serialization(String),

    /// Network or transport error while consuming.
    #[error("Transport error: {0}")]
    TransportError(String),
}

impl From<StoreError> for SeckillError {
    fn from(err: StoreError) -> Self {
        Self::Transient(err.to_string())
    }
}

impl From<RepositoryError> for SeckillError {
    fn from(err: RepositoryError) -> Self {
        Self::Transient(err.to_string())
    }
}

impl From<BrokerError> for SeckillError {
    fn from(err: BrokerError) -> Self {
        Self::Transient(err.to_string())
    }
}
