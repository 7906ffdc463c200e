//! Circuit breaker in front of the ticket store.
//!
//! When the store keeps failing with transient errors the breaker opens and
//! callers fail fast with [`TransientKind::CircuitOpen`] instead of piling
//! retries onto a struggling database. Only transient failures count: a
//! conflict or validation error proves the store is answering.
//!
//! # States
//!
//! - **Closed**: normal operation; consecutive transient failures are counted
//! - **Open**: calls are rejected until `open_timeout` elapses
//! - **HalfOpen**: calls pass; `success_threshold` successes close the circuit,
//!   one transient failure reopens it
//!
//! [`TransientKind::CircuitOpen`]: clinic_queue_core::ticket_store::TransientKind::CircuitOpen

use crate::metrics::CircuitBreakerMetrics;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures before opening the circuit
    pub failure_threshold: usize,
    /// Time spent Open before letting trial calls through
    pub open_timeout: Duration,
    /// Successes in `HalfOpen` state before closing the circuit
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Calls pass through
    Closed,
    /// Calls are rejected
    Open,
    /// Trial calls pass to test recovery
    HalfOpen,
}

impl State {
    const fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: State,
    failure_count: usize,
    success_count: usize,
    opened_at: Option<Instant>,
}

/// Shared circuit breaker; clones observe the same state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    /// Create a closed circuit breaker.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(BreakerState {
                state: State::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
        }
    }

    /// Current state, after applying any due Open → `HalfOpen` move.
    #[must_use]
    pub fn state(&self) -> State {
        let mut state = self.lock();
        self.refresh(&mut state);
        state.state
    }

    /// Whether a call may go to the store now.
    ///
    /// Rejections are counted in metrics.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        self.refresh(&mut state);
        if state.state == State::Open {
            CircuitBreakerMetrics::record_rejection();
            return false;
        }
        true
    }

    /// Record that the store answered (successfully or with a non-transient error).
    pub fn record_success(&self) {
        let mut state = self.lock();
        match state.state {
            State::Closed => state.failure_count = 0,
            State::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    tracing::info!(
                        successes = state.success_count,
                        "Store circuit breaker transitioning HALF_OPEN -> CLOSED"
                    );
                    Self::set_state(&mut state, State::Closed);
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.opened_at = None;
                }
            }
            State::Open => {}
        }
    }

    /// Record a transient store failure.
    pub fn record_failure(&self) {
        let mut state = self.lock();
        match state.state {
            State::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = state.failure_count,
                        threshold = self.config.failure_threshold,
                        "Store circuit breaker transitioning CLOSED -> OPEN"
                    );
                    Self::set_state(&mut state, State::Open);
                    state.opened_at = Some(Instant::now());
                }
            }
            State::HalfOpen => {
                tracing::warn!("Store circuit breaker transitioning HALF_OPEN -> OPEN (recovery failed)");
                Self::set_state(&mut state, State::Open);
                state.opened_at = Some(Instant::now());
                state.success_count = 0;
            }
            State::Open => state.failure_count += 1,
        }
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        let mut state = self.lock();
        tracing::info!("Store circuit breaker manually reset to CLOSED");
        Self::set_state(&mut state, State::Closed);
        state.failure_count = 0;
        state.success_count = 0;
        state.opened_at = None;
    }

    fn refresh(&self, state: &mut BreakerState) {
        if state.state == State::Open
            && state
                .opened_at
                .is_some_and(|opened| opened.elapsed() >= self.config.open_timeout)
        {
            tracing::info!("Store circuit breaker transitioning OPEN -> HALF_OPEN");
            Self::set_state(state, State::HalfOpen);
            state.success_count = 0;
        }
    }

    fn set_state(state: &mut BreakerState, next: State) {
        state.state = next;
        CircuitBreakerMetrics::record_state(next.gauge_value());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
