//! Ticket store trait and its error taxonomy.
//!
//! The store is the durable source of truth for tickets. Its one hard
//! requirement is an atomic conditional write: [`TicketStore::transition`]
//! applies only if the ticket's current status equals the expected one. That
//! compare-and-swap is what prevents two staff consoles from dispatching the
//! same ticket.
//!
//! # Implementations
//!
//! - `InMemoryTicketStore` (in `clinic-queue-testing`): lock-protected maps, fast and deterministic
//! - `PostgresTicketStore` (in `clinic-queue-postgres`): `UPDATE ... WHERE status = $from`
//!
//! The store does not publish change events. Callers publish to the
//! [`ChangeFeed`](crate::change_feed::ChangeFeed) after a mutation returns `Ok`,
//! which makes "publish strictly after commit" structural.

use crate::sector::SectorCode;
use crate::ticket::{NewTicket, RoomId, Ticket, TicketId, TicketStatus, TransitionFields};
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`TicketStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TicketStoreError>> + Send + 'a>>;

/// Category of a transient (retryable) store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// Connection loss, pool exhaustion, serialization failure, ...
    Database,
    /// The caller-side deadline elapsed
    Timeout,
    /// Optimistic sequence allocation kept losing races
    SequenceContention,
    /// A circuit breaker in front of the store is open
    CircuitOpen,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Database => "database",
            Self::Timeout => "timeout",
            Self::SequenceContention => "sequence contention",
            Self::CircuitOpen => "circuit open",
        })
    }
}

/// Errors that can occur during ticket store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TicketStoreError {
    /// The request itself is invalid (unknown sector, missing room, ...).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No ticket with this id.
    #[error("Ticket not found: {0}")]
    NotFound(TicketId),

    /// Optimistic concurrency loss: the status changed since it was read.
    #[error("Concurrency conflict on ticket {id}: expected status {expected}, found {actual}")]
    Conflict {
        /// Ticket the conflict occurred on
        id: TicketId,
        /// Status the caller expected
        expected: TicketStatus,
        /// Status actually stored
        actual: TicketStatus,
    },

    /// The requested edge is not part of the lifecycle.
    #[error("Illegal transition for ticket {id}: {from} -> {to}")]
    InvalidTransition {
        /// Ticket the transition was requested for
        id: TicketId,
        /// Source status
        from: TicketStatus,
        /// Requested target status
        to: TicketStatus,
    },

    /// Another ticket already holds the room.
    #[error("Room {room} is occupied by ticket {occupant}")]
    RoomOccupied {
        /// The contested room
        room: RoomId,
        /// The ticket currently called into or served in the room
        occupant: TicketId,
    },

    /// Infrastructure hiccup; safe to retry.
    #[error("Transient store error ({kind}): {message}")]
    Transient {
        /// Failure category
        kind: TransientKind,
        /// Underlying error text
        message: String,
    },
}

impl TicketStoreError {
    /// Shorthand for a transient database error.
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::Transient {
            kind: TransientKind::Database,
            message: message.into(),
        }
    }

    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether this is a lost compare-and-swap.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Ticket store abstraction.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one store instance is shared by every
/// producer, console, and display in the process.
///
/// # Dyn Compatibility
///
/// Methods return [`StoreFuture`] instead of using `async fn` so the trait can
/// be used as `Arc<dyn TicketStore>`.
pub trait TicketStore: Send + Sync {
    /// Insert a waiting ticket with a freshly allocated sector number.
    ///
    /// Number allocation and insert are one atomic operation.
    ///
    /// # Errors
    ///
    /// - `Validation`: unknown sector
    /// - `Transient`: infrastructure failure or sequence contention
    fn create(&self, request: NewTicket, now: DateTime<Utc>) -> StoreFuture<'_, Ticket>;

    /// Load one ticket.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown id
    /// - `Transient`: infrastructure failure
    fn get(&self, id: TicketId) -> StoreFuture<'_, Ticket>;

    /// Tickets in `waiting`, `called`, or `in_service`, in dispatch order
    /// (priority descending, then arrival ascending).
    ///
    /// `None` lists every sector.
    ///
    /// # Errors
    ///
    /// - `Transient`: infrastructure failure
    fn list_active(&self, sector: Option<SectorCode>) -> StoreFuture<'_, Vec<Ticket>>;

    /// Compare-and-swap status transition.
    ///
    /// Applies only if the stored status equals `from`. Entering `called`
    /// records `fields.room` and `called_at`; leaving `called`/`in_service`
    /// clears the room. The room may hold at most one called/in-service ticket.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown id
    /// - `InvalidTransition`: `from -> to` is not a lifecycle edge
    /// - `Conflict`: stored status differs from `from`
    /// - `RoomOccupied`: another ticket holds the room
    /// - `Transient`: infrastructure failure
    fn transition(
        &self,
        id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
        fields: TransitionFields,
    ) -> StoreFuture<'_, Ticket>;

    /// Tickets that have been called, most recent call first.
    ///
    /// # Errors
    ///
    /// - `Transient`: infrastructure failure
    fn recent_calls(&self, sector: Option<SectorCode>, limit: usize) -> StoreFuture<'_, Vec<Ticket>>;

    /// Cancel from whatever non-terminal status the ticket is in.
    ///
    /// Reads the current status and issues a single CAS transition; a
    /// concurrent change surfaces as `Conflict`.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown id
    /// - `InvalidTransition`: the ticket is already terminal
    /// - `Conflict`: the status changed between the read and the write
    fn cancel(&self, id: TicketId, now: DateTime<Utc>) -> StoreFuture<'_, Ticket> {
        Box::pin(async move {
            let current = self.get(id).await?;
            if current.status.is_terminal() {
                return Err(TicketStoreError::InvalidTransition {
                    id,
                    from: current.status,
                    to: TicketStatus::Cancelled,
                });
            }
            self.transition(id, current.status, TicketStatus::Cancelled, TransitionFields::at(now))
                .await
        })
    }
}
