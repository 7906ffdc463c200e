//! Caller-facing errors for queue operations.
//!
//! [`QueueError`] is what producers, staff consoles, and displays see. It
//! folds the store's taxonomy into the distinctions a caller can act on:
//! fix the request, pick another room, or simply try again.

use clinic_queue_core::ticket::{RoomId, TicketId, TicketStatus};
use clinic_queue_core::ticket_store::{TicketStoreError, TransientKind};
use thiserror::Error;

/// Errors returned by [`QueueService`](crate::service::QueueService) and
/// [`DispatchEngine`](crate::dispatch::DispatchEngine).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The request is malformed (unknown sector, missing room, ...).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No ticket with this id.
    #[error("Ticket not found: {0}")]
    NotFound(TicketId),

    /// The ticket's current status cannot move to the requested one.
    #[error("Ticket {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Ticket concerned
        id: TicketId,
        /// Status the ticket is in
        from: TicketStatus,
        /// Requested status
        to: TicketStatus,
    },

    /// The room already has a called or in-service ticket.
    #[error("Room {room} is occupied by ticket {occupant}")]
    RoomOccupied {
        /// Contested room
        room: RoomId,
        /// Ticket holding it
        occupant: TicketId,
    },

    /// Concurrent consoles kept winning the compare-and-swap.
    #[error("Queue busy: {0}")]
    Busy(String),

    /// The store stayed unreachable after all transient retries.
    #[error("Ticket store unavailable: {0}")]
    Unavailable(String),
}

impl QueueError {
    /// Whether the same request may succeed if simply repeated.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_) | Self::Unavailable(_))
    }

    /// Text suitable for a staff console or kiosk.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Busy(_) => "The queue is busy right now, please try again.".to_string(),
            Self::Unavailable(_) => {
                "The queue service is temporarily unavailable, please try again shortly.".to_string()
            }
            Self::Validation(reason) => format!("Request rejected: {reason}"),
            Self::NotFound(_) => "Ticket not found.".to_string(),
            Self::InvalidTransition { from, to, .. } => {
                format!("A ticket that is {from} cannot be marked {to}.")
            }
            Self::RoomOccupied { room, .. } => {
                format!("Room {room} still has a patient; finish or cancel that ticket first.")
            }
        }
    }
}

impl From<TicketStoreError> for QueueError {
    fn from(err: TicketStoreError) -> Self {
        match err {
            TicketStoreError::Validation(reason) => Self::Validation(reason),
            TicketStoreError::NotFound(id) => Self::NotFound(id),
            TicketStoreError::InvalidTransition { id, from, to } => {
                Self::InvalidTransition { id, from, to }
            }
            TicketStoreError::RoomOccupied { room, occupant } => Self::RoomOccupied { room, occupant },
            TicketStoreError::Conflict { id, expected, actual } => Self::Busy(format!(
                "ticket {id} changed concurrently (expected {expected}, found {actual})"
            )),
            TicketStoreError::Transient {
                kind: TransientKind::SequenceContention,
                message,
            } => Self::Busy(message),
            TicketStoreError::Transient { kind, message } => Self::Unavailable(format!("{kind}: {message}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(QueueError::Busy("x".into()).is_retryable());
        assert!(QueueError::Unavailable("x".into()).is_retryable());
        assert!(!QueueError::Validation("x".into()).is_retryable());
        assert!(!QueueError::NotFound(TicketId::new()).is_retryable());
    }

    #[test]
    fn store_errors_fold_into_caller_errors() {
        let id = TicketId::new();
        let conflict = TicketStoreError::Conflict {
            id,
            expected: TicketStatus::Waiting,
            actual: TicketStatus::Called,
        };
        assert!(matches!(QueueError::from(conflict), QueueError::Busy(_)));

        let contention = TicketStoreError::Transient {
            kind: TransientKind::SequenceContention,
            message: "triage".into(),
        };
        assert!(matches!(QueueError::from(contention), QueueError::Busy(_)));

        let db = TicketStoreError::database("connection reset");
        assert_eq!(
            QueueError::from(db),
            QueueError::Unavailable("database: connection reset".into())
        );
    }

    #[test]
    fn user_messages_prompt_retry_only_when_retryable() {
        assert!(QueueError::Busy("x".into()).user_message().contains("try again"));
        let invalid = QueueError::InvalidTransition {
            id: TicketId::new(),
            from: TicketStatus::Completed,
            to: TicketStatus::Completed,
        };
        assert!(!invalid.user_message().contains("try again"));
        assert!(invalid.user_message().contains("completed"));
    }
}
