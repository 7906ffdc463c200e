//! # Clinic Queue Runtime
//!
//! Runtime for the clinic ticket queue: the dispatch engine, the
//! [`QueueService`] facade, and the ambient machinery around them.
//!
//! ## Core Components
//!
//! - **`DispatchEngine`**: calls the head-of-line ticket into a room and
//!   advances, cancels, or recalls tickets, all through compare-and-swap
//! - **`QueueService`**: entry point for producers, consoles, and displays;
//!   publishes every committed mutation to the change feed
//! - **`StoreGuard`**: per-call timeout, transient retry, and circuit breaker
//!
//! ## Example
//!
//! ```ignore
//! use clinic_queue_runtime::{QueueConfig, QueueService, telemetry};
//!
//! let config = QueueConfig::from_env()?;
//! telemetry::init_tracing(&config.log_level)?;
//!
//! let service = QueueService::builder(store, feed).config(&config).build();
//! let outcome = service.call_next(&"triage".parse()?, &"room1".parse()?).await?;
//! println!("{}", outcome.user_message());
//! ```

/// Circuit breaker in front of the ticket store
pub mod circuit_breaker;

/// Environment-driven configuration
pub mod config;

/// Dispatch engine and call outcomes
pub mod dispatch;

/// Caller-facing error type
pub mod error;

/// Timeout, retry, and breaker wrapper for store calls
pub mod guard;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

/// Queue service facade
pub mod service;

/// Tracing subscriber setup
pub mod telemetry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use config::{ConfigError, DatabaseConfig, QueueConfig};
pub use dispatch::{CallOutcome, DispatchEngine};
pub use error::QueueError;
pub use guard::StoreGuard;
pub use retry::RetryPolicy;
pub use service::{QueueService, QueueServiceBuilder};
