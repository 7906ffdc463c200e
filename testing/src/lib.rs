//! # Clinic Queue Testing
//!
//! Test doubles and in-memory implementations for the clinic ticket queue.
//!
//! This crate provides:
//! - [`InMemoryTicketStore`]: atomic in-memory [`TicketStore`](clinic_queue_core::TicketStore)
//! - [`InMemoryChangeFeed`]: `tokio::sync::broadcast` change feed with fault injection
//! - [`FlakyTicketStore`]: wrapper injecting transient failures, conflicts, and latency
//! - [`RecordingAnnouncer`]: captures call announcements
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//!
//! ## Example
//!
//! ```ignore
//! use clinic_queue_testing::{InMemoryChangeFeed, InMemoryTicketStore, test_clock};
//! use clinic_queue_runtime::QueueService;
//!
//! #[tokio::test]
//! async fn urgent_goes_first() {
//!     let service = QueueService::builder(InMemoryTicketStore::new(), InMemoryChangeFeed::new())
//!         .clock(test_clock())
//!         .build();
//!     // ...
//! }
//! ```

use chrono::{DateTime, Utc};
use clinic_queue_core::environment::Clock;

/// Recording call announcer
pub mod announcer;

/// In-memory change feed
pub mod feed;

/// Fault-injecting store wrapper
pub mod flaky;

/// In-memory ticket store
pub mod store;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use clinic_queue_testing::mocks::FixedClock;
    /// use clinic_queue_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that only moves when told to.
    ///
    /// Use it where arrival order matters: advance between creates so
    /// `created_at` strictly increases.
    ///
    /// ```
    /// use clinic_queue_testing::mocks::ManualClock;
    /// use clinic_queue_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = ManualClock::new(Utc::now());
    /// let before = clock.now();
    /// clock.advance(Duration::seconds(5));
    /// assert_eq!(clock.now() - before, Duration::seconds(5));
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Clock starting at `start`
        #[must_use]
        pub const fn new(start: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(start),
            }
        }

        /// Clock starting at the same instant as [`test_clock`]
        #[must_use]
        pub fn starting_at_test_epoch() -> Self {
            Self::new(test_clock().now())
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute instant
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }
}

/// Install a test-friendly `tracing` subscriber.
///
/// Output goes through the test writer so it only shows for failing tests.
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use announcer::RecordingAnnouncer;
pub use feed::{DEFAULT_FEED_CAPACITY, DEFAULT_HISTORY_LIMIT, InMemoryChangeFeed};
pub use flaky::{FaultPlan, FlakyTicketStore};
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use store::InMemoryTicketStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::starting_at_test_epoch();
        let start = clock.now();
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::milliseconds(250));
        assert_eq!(clock.now(), start + chrono::Duration::milliseconds(250));
    }
}
