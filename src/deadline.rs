//! Deadlines for read-only passes (graph validation, search).
//!
//! Uses `tokio::time::Instant` so paused-clock tests can drive expiry.

use std::time::Duration;

use tokio::time::Instant;

/// Optional point in time after which a pass stops and reports partial results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline.
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    #[must_use]
    pub const fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// Deadline from an optional millisecond timeout.
    #[must_use]
    pub fn from_millis(timeout_ms: Option<u64>) -> Self {
        timeout_ms.map_or_else(Self::none, |ms| Self::after(Duration::from_millis(ms)))
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, or `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_never_expires() {
        assert!(!Deadline::none().is_expired());
        assert_eq!(Deadline::none().remaining(), None);
        assert!(!Deadline::from_millis(None).is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_after_expires() {
        let deadline = Deadline::after(Duration::from_millis(100));
        assert!(!deadline.is_expired());
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_zero_timeout_is_already_expired() {
        assert!(Deadline::from_millis(Some(0)).is_expired());
    }
}
