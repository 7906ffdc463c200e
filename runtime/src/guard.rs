//! Caller-side protection around every store call.
//!
//! Each attempt is bounded by a timeout, gated by the circuit breaker, and
//! retried with backoff while the failure is transient. Conflicts,
//! validation errors, and other definite answers are returned immediately.

use crate::circuit_breaker::CircuitBreaker;
use crate::retry::{RetryPolicy, retry_with_predicate};
use clinic_queue_core::ticket_store::{TicketStoreError, TransientKind};
use std::future::Future;
use std::time::Duration;

/// Timeout + retry + circuit breaker for store calls.
#[derive(Debug, Clone)]
pub struct StoreGuard {
    timeout: Duration,
    retry: RetryPolicy,
    breaker: Option<CircuitBreaker>,
}

impl StoreGuard {
    /// Guard with the given per-attempt timeout and retry policy, no breaker.
    #[must_use]
    pub const fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            timeout,
            retry,
            breaker: None,
        }
    }

    /// Put a circuit breaker in front of the store.
    #[must_use]
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Per-attempt timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The breaker, if one is configured.
    #[must_use]
    pub const fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    /// Run `call` under the guard. `op` names the store operation in logs.
    ///
    /// # Errors
    ///
    /// Returns the store's error, a `Transient` `Timeout` if an attempt
    /// overran, or a `Transient` `CircuitOpen` if the breaker rejected it.
    pub async fn run<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, TicketStoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TicketStoreError>>,
    {
        retry_with_predicate(
            &self.retry,
            op,
            || {
                let attempt = call();
                self.attempt(op, attempt)
            },
            |err| {
                matches!(
                    err,
                    TicketStoreError::Transient { kind, .. } if *kind != TransientKind::CircuitOpen
                )
            },
        )
        .await
    }

    async fn attempt<T, Fut>(&self, op: &'static str, attempt: Fut) -> Result<T, TicketStoreError>
    where
        Fut: Future<Output = Result<T, TicketStoreError>>,
    {
        if let Some(breaker) = &self.breaker {
            if !breaker.try_acquire() {
                return Err(TicketStoreError::Transient {
                    kind: TransientKind::CircuitOpen,
                    message: format!("{op} rejected while the store circuit is open"),
                });
            }
        }

        let result = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(op, timeout_ms = self.timeout_ms(), "Store call timed out");
                Err(TicketStoreError::Transient {
                    kind: TransientKind::Timeout,
                    message: format!("{op} exceeded {} ms", self.timeout_ms()),
                })
            }
        };

        if let Some(breaker) = &self.breaker {
            match &result {
                Err(err) if err.is_transient() => breaker.record_failure(),
                _ => breaker.record_success(),
            }
        }
        if let Err(err @ TicketStoreError::Transient { .. }) = &result {
            tracing::error!(op, error = %err, "Store call failed");
        }
        result
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, State};
    use clinic_queue_core::ticket::{TicketId, TicketStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn guard() -> StoreGuard {
        StoreGuard::new(Duration::from_millis(100), RetryPolicy::builder().jitter(false).build())
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out_and_are_retried() {
        let calls = AtomicUsize::new(0);
        let result = guard()
            .run("get", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                    }
                    Ok::<_, TicketStoreError>(n)
                }
            })
            .await;
        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_timeouts_surface_as_transient() {
        let result: Result<(), _> = guard()
            .run("create", || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(TicketStoreError::Transient { kind: TransientKind::Timeout, .. })
        ));
    }

    #[tokio::test]
    async fn conflicts_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = guard()
            .run("transition", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(TicketStoreError::Conflict {
                        id: TicketId::new(),
                        expected: TicketStatus::Waiting,
                        actual: TicketStatus::Called,
                    })
                }
            })
            .await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_fails_fast() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..CircuitBreakerConfig::default()
        });
        let guard = guard().with_breaker(breaker.clone());

        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = guard
            .run("list_active", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TicketStoreError::database("down")) }
            })
            .await;

        // Two real failures open the circuit; the next attempt is rejected without a call.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            result,
            Err(TicketStoreError::Transient { kind: TransientKind::CircuitOpen, .. })
        ));
        assert_eq!(breaker.state(), State::Open);
    }
}
