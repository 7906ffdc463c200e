//! Change feed abstraction for live distribution of ticket mutations.
//!
//! Every committed mutation is published once, after commit. Display panels
//! and staff consoles subscribe and keep their views current from the stream.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ Staff action │
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌─────────────────┐
//! │ 1. CAS write to │
//! │   TicketStore   │◄─── Source of truth
//! └────────┬────────┘
//!          │ Ok(ticket)
//!          ▼
//! ┌─────────────────┐
//! │ 2. Publish to   │
//! │   ChangeFeed    │◄─── At-least-once delivery
//! └────────┬────────┘
//!          │
//!     ┌────┴─────┐
//!     │          │
//!     ▼          ▼
//! ┌───────┐  ┌─────────┐
//! │ Panel │  │ Console │
//! └───────┘  └─────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Store first**: nothing is published for a mutation that did not commit
//! - **At-least-once**: an event may arrive more than once
//! - **No cross-subscriber ordering**: subscribers reconcile using the ticket
//!   `revision`, or by re-reading the store
//! - **Snapshot + stream**: a new subscriber subscribes first, then reads a
//!   `list_active` snapshot, then applies only events newer than the snapshot
//!
//! # Implementations
//!
//! - `InMemoryChangeFeed` (in `clinic-queue-testing`): `tokio::sync::broadcast`

use crate::event::TicketEvent;
use crate::sector::SectorCode;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during change feed operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChangeFeedError {
    /// Failed to publish an event
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Failed to open a subscription
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// The subscriber fell behind and missed this many events; re-snapshot
    #[error("Subscriber lagged behind by {0} events")]
    Lagged(u64),

    /// The feed was shut down
    #[error("Change feed closed")]
    Closed,
}

/// Live stream of ticket events.
///
/// A `Lagged` item means events were dropped for this subscriber; the stream
/// keeps going, but the subscriber must resynchronize from a snapshot.
pub type TicketEventStream = Pin<Box<dyn Stream<Item = Result<TicketEvent, ChangeFeedError>> + Send>>;

/// Trait for change feed implementations.
///
/// # Dyn Compatibility
///
/// Explicit `Pin<Box<dyn Future>>` returns keep the trait usable as
/// `Arc<dyn ChangeFeed>`.
pub trait ChangeFeed: Send + Sync {
    /// Publish one committed mutation.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeFeedError::PublishFailed`] if the transport rejects it.
    fn publish(
        &self,
        event: TicketEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChangeFeedError>> + Send + '_>>;

    /// Subscribe to events for one sector, or all sectors with `None`.
    ///
    /// Only events published after this call returns are delivered.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeFeedError::SubscriptionFailed`] if the subscription cannot be opened.
    fn subscribe(
        &self,
        sector: Option<SectorCode>,
    ) -> Pin<Box<dyn Future<Output = Result<TicketEventStream, ChangeFeedError>> + Send + '_>>;
}
