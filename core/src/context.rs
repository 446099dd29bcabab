//! Request-scoped deadline propagation.

use crate::error::SeckillError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Caller context carried through a request.
///
/// Every component call made on behalf of the request is bounded by the
/// time remaining until the deadline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Context without a deadline.
    #[must_use]
    pub const fn background() -> Self {
        Self { deadline: None }
    }

    /// Context expiring `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Context expiring at `deadline`.
    #[must_use]
    pub const fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    /// The deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left, `None` without a deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    /// Run `fut` within the remaining time, mapping its error into [`SeckillError`].
    ///
    /// # Errors
    ///
    /// Returns the future's own error, or [`SeckillError::Transient`] when the
    /// deadline expires first.
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T, SeckillError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<SeckillError>,
    {
        match self.deadline {
            None => fut.await.map_err(Into::into),
            // An expired context never starts the call.
            Some(deadline) if Instant::now() >= deadline => Err(SeckillError::deadline_exceeded()),
            Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(SeckillError::deadline_exceeded()),
            },
        }
    }
}
