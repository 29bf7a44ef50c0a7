//! Bounded retry with a flat delay between attempts.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::forge::ForgeError {
    fn is_retryable(&self) -> bool {
        crate::forge::ForgeError::is_retryable(self)
    }
}

impl Retryable for super::store::StoreError {
    /// Rejected transitions and key clashes fail the same way every time
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            super::store::StoreError::InvalidTransition { .. } | super::store::StoreError::Duplicate { .. }
        )
    }
}

/// Every attempt failed (or a non-retryable error stopped early)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. On success returns the value
    /// and the number of attempts used.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<(T, u32), Exhausted<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    warn!(attempt, max_attempts, error = %e, "Attempt failed, retrying");
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
            }
        }
    }
}
