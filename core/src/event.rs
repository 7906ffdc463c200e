//! Typed change events published after every committed ticket mutation.
//!
//! Each variant carries the full post-commit [`Ticket`], including its
//! `revision`. Subscribers use the revision to drop duplicates and stale
//! reorderings rather than trusting delivery order.
//!
//! # Serialization
//!
//! Events encode with `bincode` so a real transport can carry them as bytes.
//! [`TicketEvent::event_type`] returns a stable, versioned name for routing.
//!
//! ```
//! use clinic_queue_core::event::TicketEvent;
//! # use clinic_queue_core::{Ticket, TicketId, TicketNumber, NewTicket, SectorCode, Priority, Utc};
//! # let ticket = Ticket::waiting(
//! #     TicketId::new(),
//! #     TicketNumber::new("TRI", 1),
//! #     NewTicket::new(SectorCode::new("triage"), Priority::Normal),
//! #     Utc::now(),
//! # );
//!
//! let event = TicketEvent::Created { ticket };
//! assert_eq!(event.event_type(), "TicketCreated.v1");
//!
//! let bytes = event.to_bytes().unwrap();
//! assert_eq!(TicketEvent::from_bytes(&bytes).unwrap(), event);
//! ```

use crate::sector::SectorCode;
use crate::ticket::{Ticket, TicketId, TicketStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for event encoding.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),
}

/// A committed change to one ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketEvent {
    /// A ticket entered the queue.
    Created {
        /// The new ticket
        ticket: Ticket,
    },
    /// A forward lifecycle step (call, start of service, completion).
    Transitioned {
        /// The ticket after the transition
        ticket: Ticket,
        /// Status before the transition
        from: TicketStatus,
        /// Status after the transition
        to: TicketStatus,
    },
    /// A ticket was withdrawn.
    Cancelled {
        /// The ticket after cancellation
        ticket: Ticket,
        /// Status it was cancelled from
        from: TicketStatus,
    },
}

impl TicketEvent {
    /// Build the event describing a committed transition.
    ///
    /// Transitions into `cancelled` become [`TicketEvent::Cancelled`].
    #[must_use]
    pub fn from_transition(ticket: Ticket, from: TicketStatus) -> Self {
        match ticket.status {
            TicketStatus::Cancelled => Self::Cancelled { ticket, from },
            to => Self::Transitioned { ticket, from, to },
        }
    }

    /// Stable, versioned event name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "TicketCreated.v1",
            Self::Transitioned { .. } => "TicketTransitioned.v1",
            Self::Cancelled { .. } => "TicketCancelled.v1",
        }
    }

    /// The post-commit ticket.
    #[must_use]
    pub const fn ticket(&self) -> &Ticket {
        match self {
            Self::Created { ticket }
            | Self::Transitioned { ticket, .. }
            | Self::Cancelled { ticket, .. } => ticket,
        }
    }

    /// Consume the event, keeping the ticket.
    #[must_use]
    pub fn into_ticket(self) -> Ticket {
        match self {
            Self::Created { ticket }
            | Self::Transitioned { ticket, .. }
            | Self::Cancelled { ticket, .. } => ticket,
        }
    }

    /// Id of the affected ticket.
    #[must_use]
    pub const fn ticket_id(&self) -> TicketId {
        self.ticket().id
    }

    /// Sector of the affected ticket.
    #[must_use]
    pub const fn sector(&self) -> &SectorCode {
        &self.ticket().sector
    }

    /// Revision of the ticket after this change.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.ticket().revision
    }

    /// Serialize to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` for corrupt or foreign bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}
