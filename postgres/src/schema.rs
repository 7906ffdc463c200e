//! Table layout and idempotent migration.
//!
//! ```sql
//! CREATE TABLE tickets (
//!     id UUID PRIMARY KEY,
//!     sector TEXT NOT NULL,
//!     seq BIGINT NOT NULL,
//!     number TEXT NOT NULL,
//!     priority SMALLINT NOT NULL,
//!     status TEXT NOT NULL,
//!     room TEXT,
//!     patient_ref TEXT,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL,
//!     called_at TIMESTAMPTZ,
//!     revision BIGINT NOT NULL
//! );
//! ```
//!
//! `priority` stores `Priority::rank`, so `ORDER BY priority DESC` is
//! dispatch order.

use clinic_queue_core::ticket_store::TicketStoreError;
use sqlx::PgPool;

/// Unique index backing per-sector numbering.
pub const SECTOR_SEQ_INDEX: &str = "idx_tickets_sector_seq";

/// Partial unique index: one called/in-service ticket per room.
pub const ROOM_OCCUPANCY_INDEX: &str = "idx_tickets_room_occupied";

/// Statements run by [`migrate`], in order.
pub const STATEMENTS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS ticket_sequences (
        sector TEXT PRIMARY KEY,
        last_seq BIGINT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS tickets (
        id UUID PRIMARY KEY,
        sector TEXT NOT NULL,
        seq BIGINT NOT NULL,
        number TEXT NOT NULL,
        priority SMALLINT NOT NULL,
        status TEXT NOT NULL,
        room TEXT,
        patient_ref TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        called_at TIMESTAMPTZ,
        revision BIGINT NOT NULL,
        CHECK (status IN ('waiting', 'called', 'in_service', 'completed', 'cancelled')),
        CHECK ((room IS NOT NULL) = (status IN ('called', 'in_service')))
    )
    ",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_tickets_sector_seq ON tickets (sector, seq)",
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_tickets_room_occupied ON tickets (room)
    WHERE status IN ('called', 'in_service')
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_tickets_active ON tickets (sector, priority DESC, created_at, seq)
    WHERE status IN ('waiting', 'called', 'in_service')
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_tickets_called_at ON tickets (called_at DESC)
    WHERE called_at IS NOT NULL
    ",
];

/// Create tables and indexes if they don't already exist.
///
/// # Errors
///
/// Returns [`TicketStoreError::Transient`] if a statement fails.
pub async fn migrate(pool: &PgPool) -> Result<(), TicketStoreError> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| TicketStoreError::database(format!("Migration failed: {e}")))?;
    }
    tracing::info!(statements = STATEMENTS.len(), "Ticket schema migrated");
    Ok(())
}
