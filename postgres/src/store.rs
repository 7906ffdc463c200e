//! `PostgresTicketStore`: the durable [`TicketStore`].

use crate::error::{UniqueViolation, database, unique_violation};
use crate::schema;
use clinic_queue_core::sector::{SectorCatalog, SectorCode};
use clinic_queue_core::sequence::{AllocationError, TicketNumber, allocate_with_retry};
use clinic_queue_core::ticket::{
    NewTicket, PatientRef, Priority, RoomId, Ticket, TicketId, TicketStatus, TransitionFields,
};
use clinic_queue_core::ticket_store::{StoreFuture, TicketStore, TicketStoreError};
use clinic_queue_core::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Uuid;
use sqlx::{Postgres, Row, Transaction};
use std::sync::Arc;

/// Fresh-read attempts for sector number allocation.
pub const DEFAULT_SEQUENCE_ATTEMPTS: usize = 3;

const TICKET_COLUMNS: &str =
    "id, sector, seq, number, priority, status, room, patient_ref, created_at, updated_at, called_at, revision";

const ACTIVE_STATUSES: &str = "('waiting', 'called', 'in_service')";

const ROOM_STATUSES: &str = "('called', 'in_service')";

/// `PostgreSQL`-backed ticket store.
///
/// # Concurrency
///
/// - `create` reads the sector's `last_seq`, then moves it with
///   `UPDATE ... WHERE last_seq = $old` in the insert's transaction. A lost
///   race (zero rows, or a `(sector, seq)` unique violation) rolls back and
///   retries with a fresh read.
/// - `transition` is a single `UPDATE ... WHERE id = $1 AND status = $2
///   RETURNING ...`; zero rows means someone else moved the ticket first.
/// - Room exclusivity is the partial unique index on `room`.
///
/// # Example
///
/// ```ignore
/// use clinic_queue_postgres::PostgresTicketStore;
///
/// let store = PostgresTicketStore::connect(&config.database.url, config.database.max_connections)
///     .await?
///     .with_catalog(config.sectors.clone())
///     .with_sequence_attempts(config.sequence_attempts);
/// store.migrate().await?;
/// ```
#[derive(Clone, Debug)]
pub struct PostgresTicketStore {
    pool: PgPool,
    catalog: Arc<SectorCatalog>,
    sequence_attempts: usize,
}

impl PostgresTicketStore {
    /// Store over an existing pool, with the default sector catalog.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            catalog: Arc::new(SectorCatalog::default()),
            sequence_attempts: DEFAULT_SEQUENCE_ATTEMPTS,
        }
    }

    /// Connect a new pool.
    ///
    /// # Errors
    ///
    /// Returns [`TicketStoreError::Transient`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, TicketStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| TicketStoreError::database(format!("Failed to connect: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// Use `catalog` to validate sectors and pick number prefixes.
    #[must_use]
    pub fn with_catalog(mut self, catalog: SectorCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    /// Bound on fresh-read retries when allocating numbers.
    #[must_use]
    pub const fn with_sequence_attempts(mut self, attempts: usize) -> Self {
        self.sequence_attempts = attempts;
        self
    }

    /// Create tables and indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns [`TicketStoreError::Transient`] if migration fails.
    pub async fn migrate(&self) -> Result<(), TicketStoreError> {
        schema::migrate(&self.pool).await
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The sector catalog in use.
    #[must_use]
    pub fn catalog(&self) -> &SectorCatalog {
        &self.catalog
    }

    // One allocation attempt: fresh read, CAS on the high-water mark, insert.
    async fn try_create(
        &self,
        request: &NewTicket,
        prefix: &str,
        now: DateTime<Utc>,
    ) -> Result<Ticket, AllocationError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| database("begin create", &e))?;

        let current: Option<(i64,)> = sqlx::query_as("SELECT last_seq FROM ticket_sequences WHERE sector = $1")
            .bind(request.sector.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| database("read sequence", &e))?;

        let seq = current.map_or(1, |(last,)| last + 1);
        if !advance_sequence(&mut tx, &request.sector, current.map(|(last,)| last), seq).await? {
            metrics::counter!("ticket_store_postgres_sequence_conflicts_total").increment(1);
            return Err(AllocationError::Conflict);
        }

        let number = TicketNumber::new(prefix, u64::try_from(seq).unwrap_or_default());
        let ticket = Ticket::waiting(TicketId::new(), number, request.clone(), now);

        let inserted = sqlx::query(
            r"
            INSERT INTO tickets (
                id, sector, seq, number, priority, status, room, patient_ref,
                created_at, updated_at, called_at, revision
            ) VALUES ($1, $2, $3, $4, $5, $6, NULL, $7, $8, $8, NULL, $9)
            ",
        )
        .bind(ticket.id.as_uuid())
        .bind(ticket.sector.as_str())
        .bind(seq)
        .bind(ticket.number.to_string())
        .bind(ticket.priority.rank())
        .bind(ticket.status.as_str())
        .bind(ticket.patient_ref.as_ref().map(PatientRef::as_str))
        .bind(ticket.created_at)
        .bind(revision_to_db(ticket.revision))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if unique_violation(&e) == Some(UniqueViolation::SectorSeq) => {
                metrics::counter!("ticket_store_postgres_sequence_conflicts_total").increment(1);
                return Err(AllocationError::Conflict);
            }
            Err(e) => return Err(database("insert ticket", &e).into()),
        }

        tx.commit().await.map_err(|e| database("commit create", &e))?;
        Ok(ticket)
    }

    async fn status_of(&self, id: TicketId) -> Result<Option<TicketStatus>, TicketStoreError> {
        let status: Option<(String,)> = sqlx::query_as("SELECT status FROM tickets WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database("read status", &e))?;
        status.map(|(s,)| parse_status(&s)).transpose()
    }

    /// Error for a request that fails before the `UPDATE`, ranked the same
    /// way as an in-process transition: unknown id, illegal edge, stale
    /// `from`, then missing room.
    async fn rejection(&self, id: TicketId, from: TicketStatus, to: TicketStatus) -> TicketStoreError {
        match self.status_of(id).await {
            Err(err) => err,
            Ok(None) => TicketStoreError::NotFound(id),
            Ok(Some(_)) if !from.can_transition_to(to) => TicketStoreError::InvalidTransition { id, from, to },
            Ok(Some(actual)) if actual != from => TicketStoreError::Conflict {
                id,
                expected: from,
                actual,
            },
            Ok(Some(_)) => TicketStoreError::Validation(format!("calling ticket {id} requires a room")),
        }
    }

    async fn room_occupant(&self, room: &RoomId) -> Result<TicketId, TicketStoreError> {
        let occupant: Option<(Uuid,)> = sqlx::query_as(&format!(
            "SELECT id FROM tickets WHERE room = $1 AND status IN {ROOM_STATUSES}"
        ))
        .bind(room.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database("read room occupant", &e))?;

        occupant
            .map(|(id,)| TicketId::from_uuid(id))
            .ok_or_else(|| TicketStoreError::database(format!("room {room} was released during a conflicting call")))
    }
}

impl TicketStore for PostgresTicketStore {
    fn create(&self, request: NewTicket, now: DateTime<Utc>) -> StoreFuture<'_, Ticket> {
        Box::pin(async move {
            let prefix = self.catalog.require(&request.sector)?.prefix.clone();
            let request = &request;
            let prefix = prefix.as_str();

            let ticket = allocate_with_retry(&request.sector, self.sequence_attempts, move |_| {
                self.try_create(request, prefix, now)
            })
            .await?;

            tracing::debug!(
                ticket_id = %ticket.id,
                number = %ticket.number,
                priority = %ticket.priority,
                "Ticket created"
            );
            Ok(ticket)
        })
    }

    fn get(&self, id: TicketId) -> StoreFuture<'_, Ticket> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| database("get ticket", &e))?;
            row.as_ref()
                .map(ticket_from_row)
                .transpose()?
                .ok_or(TicketStoreError::NotFound(id))
        })
    }

    fn list_active(&self, sector: Option<SectorCode>) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets
                 WHERE status IN {ACTIVE_STATUSES} AND ($1::TEXT IS NULL OR sector = $1)
                 ORDER BY priority DESC, created_at ASC, seq ASC, id ASC"
            ))
            .bind(sector.as_ref().map(SectorCode::as_str))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| database("list active", &e))?;
            rows.iter().map(ticket_from_row).collect()
        })
    }

    fn transition(
        &self,
        id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
        fields: TransitionFields,
    ) -> StoreFuture<'_, Ticket> {
        Box::pin(async move {
            let missing_room = to == TicketStatus::Called && fields.room.is_none();
            if !from.can_transition_to(to) || missing_room {
                return Err(self.rejection(id, from, to).await);
            }
            let room = if to == TicketStatus::Called { fields.room.clone() } else { None };

            // Room: set on call, kept while in service, cleared otherwise.
            let updated = sqlx::query(&format!(
                "UPDATE tickets SET
                    status = $3,
                    updated_at = $4,
                    revision = revision + 1,
                    room = CASE WHEN $3 = 'called' THEN $5
                                WHEN $3 = 'in_service' THEN room
                                ELSE NULL END,
                    called_at = CASE WHEN $3 = 'called' THEN $4 ELSE called_at END
                 WHERE id = $1 AND status = $2
                 RETURNING {TICKET_COLUMNS}"
            ))
            .bind(id.as_uuid())
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(fields.now)
            .bind(room.as_ref().map(RoomId::as_str))
            .fetch_optional(&self.pool)
            .await;

            let row = match updated {
                Ok(row) => row,
                Err(e) if unique_violation(&e) == Some(UniqueViolation::RoomOccupied) => {
                    let room = room.unwrap_or_else(|| RoomId::new(""));
                    let occupant = self.room_occupant(&room).await?;
                    metrics::counter!("ticket_store_postgres_room_conflicts_total").increment(1);
                    return Err(TicketStoreError::RoomOccupied { room, occupant });
                }
                Err(e) => return Err(database("transition", &e)),
            };

            let Some(row) = row else {
                return match self.status_of(id).await? {
                    None => Err(TicketStoreError::NotFound(id)),
                    Some(actual) => {
                        metrics::counter!("ticket_store_postgres_cas_conflicts_total").increment(1);
                        tracing::debug!(
                            ticket_id = %id,
                            expected = %from,
                            actual = %actual,
                            "Transition lost compare-and-swap"
                        );
                        Err(TicketStoreError::Conflict {
                            id,
                            expected: from,
                            actual,
                        })
                    }
                };
            };

            let ticket = ticket_from_row(&row)?;
            tracing::debug!(
                ticket_id = %ticket.id,
                from = %from,
                to = %to,
                revision = ticket.revision,
                "Ticket transitioned"
            );
            Ok(ticket)
        })
    }

    fn recent_calls(&self, sector: Option<SectorCode>, limit: usize) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets
                 WHERE called_at IS NOT NULL AND ($1::TEXT IS NULL OR sector = $1)
                 ORDER BY called_at DESC, id ASC
                 LIMIT $2"
            ))
            .bind(sector.as_ref().map(SectorCode::as_str))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| database("recent calls", &e))?;
            rows.iter().map(ticket_from_row).collect()
        })
    }
}

// Move the sector's high-water mark from `last` to `next`; `false` on a lost race.
async fn advance_sequence(
    tx: &mut Transaction<'_, Postgres>,
    sector: &SectorCode,
    last: Option<i64>,
    next: i64,
) -> Result<bool, AllocationError> {
    let result = match last {
        None => {
            sqlx::query(
                "INSERT INTO ticket_sequences (sector, last_seq) VALUES ($1, $2) ON CONFLICT (sector) DO NOTHING",
            )
            .bind(sector.as_str())
            .bind(next)
            .execute(&mut **tx)
            .await
        }
        Some(last) => {
            sqlx::query("UPDATE ticket_sequences SET last_seq = $2 WHERE sector = $1 AND last_seq = $3")
                .bind(sector.as_str())
                .bind(next)
                .bind(last)
                .execute(&mut **tx)
                .await
        }
    };
    let result = result.map_err(|e| database("advance sequence", &e))?;
    Ok(result.rows_affected() == 1)
}

fn revision_to_db(revision: u64) -> i64 {
    i64::try_from(revision).unwrap_or(i64::MAX)
}

fn corrupt(column: &str, detail: impl std::fmt::Display) -> TicketStoreError {
    TicketStoreError::database(format!("corrupt ticket row, column {column}: {detail}"))
}

fn parse_status(s: &str) -> Result<TicketStatus, TicketStoreError> {
    s.parse().map_err(|e| corrupt("status", e))
}

fn ticket_from_row(row: &PgRow) -> Result<Ticket, TicketStoreError> {
    let get_err = |e: sqlx::Error| database("decode ticket row", &e);

    let id: Uuid = row.try_get("id").map_err(get_err)?;
    let sector: String = row.try_get("sector").map_err(get_err)?;
    let number: String = row.try_get("number").map_err(get_err)?;
    let priority: i16 = row.try_get("priority").map_err(get_err)?;
    let status: String = row.try_get("status").map_err(get_err)?;
    let room: Option<String> = row.try_get("room").map_err(get_err)?;
    let patient_ref: Option<String> = row.try_get("patient_ref").map_err(get_err)?;
    let revision: i64 = row.try_get("revision").map_err(get_err)?;

    Ok(Ticket {
        id: TicketId::from_uuid(id),
        number: number.parse().map_err(|e| corrupt("number", e))?,
        sector: SectorCode::new(sector),
        priority: Priority::from_rank(priority).ok_or_else(|| corrupt("priority", priority))?,
        status: parse_status(&status)?,
        room: room.map(RoomId::new),
        patient_ref: patient_ref.map(PatientRef::new),
        created_at: row.try_get("created_at").map_err(get_err)?,
        updated_at: row.try_get("updated_at").map_err(get_err)?,
        called_at: row.try_get("called_at").map_err(get_err)?,
        revision: u64::try_from(revision).map_err(|e| corrupt("revision", e))?,
    })
}
