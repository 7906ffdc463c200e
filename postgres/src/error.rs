//! Mapping from sqlx failures to the store error taxonomy.

use crate::schema::{ROOM_OCCUPANCY_INDEX, SECTOR_SEQ_INDEX};
use clinic_queue_core::ticket_store::TicketStoreError;

/// SQLSTATE `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Which unique constraint a write tripped over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UniqueViolation {
    /// Two writers allocated the same sector number
    SectorSeq,
    /// The target room already holds a called/in-service ticket
    RoomOccupied,
}

pub(crate) fn unique_violation(err: &sqlx::Error) -> Option<UniqueViolation> {
    let db = err.as_database_error()?;
    if db.code().as_deref() != Some(UNIQUE_VIOLATION) {
        return None;
    }
    match db.constraint()? {
        SECTOR_SEQ_INDEX => Some(UniqueViolation::SectorSeq),
        ROOM_OCCUPANCY_INDEX => Some(UniqueViolation::RoomOccupied),
        _ => None,
    }
}

/// Anything sqlx reports that isn't a known constraint is infrastructure.
pub(crate) fn database(context: &str, err: &sqlx::Error) -> TicketStoreError {
    tracing::error!(error = %err, context, "Ticket store query failed");
    metrics::counter!("ticket_store_postgres_errors_total", "context" => context.to_string()).increment(1);
    TicketStoreError::database(format!("{context}: {err}"))
}
