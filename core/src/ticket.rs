//! Ticket entity, status lifecycle, and the value types around it.
//!
//! A [`Ticket`] is the only shared mutable resource in the queue. Every change
//! to it goes through [`Ticket::apply_transition`], which enforces the status
//! machine and the room/`called_at` invariants. Stores call it inside their
//! atomic write; the room-occupancy rule needs the other tickets and is checked
//! by the store itself.

use crate::sector::SectorCode;
use crate::sequence::TicketNumber;
use crate::ticket_store::TicketStoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error returned when parsing one of the queue's value types from text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {kind}: {value:?}")]
pub struct ParseValueError {
    kind: &'static str,
    value: String,
}

impl ParseValueError {
    pub(crate) fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    /// The kind of value that failed to parse (`"status"`, `"priority"`, ...).
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }
}

/// Opaque ticket identifier.
///
/// # Examples
///
/// ```
/// use clinic_queue_core::ticket::TicketId;
///
/// let id = TicketId::new();
/// let parsed: TicketId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID (e.g. a database column).
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TicketId {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ParseValueError::new("ticket id", s))
    }
}

/// Room (or service desk) a ticket is called into.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomId(String);

impl RoomId {
    /// Create a room identifier without validation (trusted input).
    #[must_use]
    pub fn new(room: impl Into<String>) -> Self {
        Self(room.into())
    }

    /// The room identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RoomId {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseValueError::new("room", s));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Non-owning reference to a patient record held by an external system.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatientRef(String);

impl PatientRef {
    /// Wrap an external patient identifier.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// The reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority band. Declaration order is the ranking: `Normal < Priority < Urgent`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    /// Regular arrival order
    Normal,
    /// Statutory priority (elderly, pregnant, disabled)
    Priority,
    /// Clinical urgency
    Urgent,
}

impl Priority {
    /// All bands, lowest first.
    pub const ALL: [Self; 3] = [Self::Normal, Self::Priority, Self::Urgent];

    /// Canonical string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Priority => "priority",
            Self::Urgent => "urgent",
        }
    }

    /// Numeric rank used for storage ordering (higher is served first).
    #[must_use]
    pub const fn rank(&self) -> i16 {
        match self {
            Self::Normal => 0,
            Self::Priority => 1,
            Self::Urgent => 2,
        }
    }

    /// Inverse of [`Priority::rank`].
    #[must_use]
    pub const fn from_rank(rank: i16) -> Option<Self> {
        match rank {
            0 => Some(Self::Normal),
            1 => Some(Self::Priority),
            2 => Some(Self::Urgent),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseValueError;

    /// Accepts the canonical names plus the legacy Portuguese vocabulary.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "priority" | "prioritario" | "preferencial" => Ok(Self::Priority),
            "urgent" | "urgente" | "emergencia" => Ok(Self::Urgent),
            _ => Err(ParseValueError::new("priority", s)),
        }
    }
}

/// Ticket status.
///
/// The English names are canonical. The legacy Portuguese vocabulary
/// (`aguardando`, `chamado`, `em_atendimento`, `atendido`, `cancelado`) is
/// accepted on input only; output is always canonical.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    /// In the queue, not yet called
    Waiting,
    /// Called into a room, patient on the way
    Called,
    /// Being attended in the room
    InService,
    /// Attendance finished (terminal)
    Completed,
    /// Withdrawn (terminal)
    Cancelled,
}

impl TicketStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Waiting,
        Self::Called,
        Self::InService,
        Self::Completed,
        Self::Cancelled,
    ];

    /// Statuses that appear in the active queue.
    pub const ACTIVE: [Self; 3] = [Self::Waiting, Self::Called, Self::InService];

    /// Canonical string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Called => "called",
            Self::InService => "in_service",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// `true` for `Completed` and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// `true` while the ticket belongs to the active queue.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// `true` for the statuses that hold a room.
    #[must_use]
    pub const fn holds_room(&self) -> bool {
        matches!(self, Self::Called | Self::InService)
    }

    /// Whether `self -> to` is an edge of the lifecycle.
    #[must_use]
    pub const fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            (Self::Waiting, Self::Called)
            | (Self::Called, Self::InService)
            | (Self::InService, Self::Completed) => true,
            (from, Self::Cancelled) => from.is_active(),
            _ => false,
        }
    }

    /// The status that forward-flows into `self`, if any.
    ///
    /// `Called` comes from `Waiting`, `InService` from `Called`, `Completed`
    /// from `InService`. `Waiting` and `Cancelled` have no single predecessor.
    #[must_use]
    pub const fn predecessor(&self) -> Option<Self> {
        match self {
            Self::Called => Some(Self::Waiting),
            Self::InService => Some(Self::Called),
            Self::Completed => Some(Self::InService),
            Self::Waiting | Self::Cancelled => None,
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "waiting" | "aguardando" => Ok(Self::Waiting),
            "called" | "chamado" => Ok(Self::Called),
            "in_service" | "in-service" | "in service" | "em_atendimento" => Ok(Self::InService),
            "completed" | "done" | "atendido" => Ok(Self::Completed),
            "cancelled" | "canceled" | "cancelado" => Ok(Self::Cancelled),
            _ => Err(ParseValueError::new("status", s)),
        }
    }
}

/// A queue ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Opaque identifier
    pub id: TicketId,
    /// Sector-scoped display number
    pub number: TicketNumber,
    /// Sector the ticket queues for
    pub sector: SectorCode,
    /// Priority band
    pub priority: Priority,
    /// Lifecycle status
    pub status: TicketStatus,
    /// Room, present iff status is `Called` or `InService`
    pub room: Option<RoomId>,
    /// Optional back reference to the patient record
    pub patient_ref: Option<PatientRef>,
    /// Arrival time
    pub created_at: DateTime<Utc>,
    /// Time of the last committed mutation
    pub updated_at: DateTime<Utc>,
    /// Time of the waiting → called transition
    pub called_at: Option<DateTime<Utc>>,
    /// Mutation counter, 1 on creation
    pub revision: u64,
}

impl Ticket {
    /// Build a freshly created waiting ticket.
    #[must_use]
    pub fn waiting(id: TicketId, number: TicketNumber, request: NewTicket, now: DateTime<Utc>) -> Self {
        Self {
            id,
            number,
            sector: request.sector,
            priority: request.priority,
            status: TicketStatus::Waiting,
            room: None,
            patient_ref: request.patient_ref,
            created_at: now,
            updated_at: now,
            called_at: None,
            revision: 1,
        }
    }

    /// Dispatch order: priority descending, then arrival ascending.
    ///
    /// Ties on `created_at` fall back to the sequence number, then the id, so
    /// the order is total.
    #[must_use]
    pub fn queue_order(a: &Self, b: &Self) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.number.seq().cmp(&b.number.seq()))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Whether the room and `called_at` fields agree with the status.
    #[must_use]
    pub fn invariants_hold(&self) -> bool {
        let room_ok = self.room.is_some() == self.status.holds_room();
        let called_ok = match self.status {
            TicketStatus::Waiting => self.called_at.is_none(),
            TicketStatus::Called | TicketStatus::InService | TicketStatus::Completed => {
                self.called_at.is_some()
            }
            TicketStatus::Cancelled => true,
        };
        room_ok && called_ok && self.revision >= 1
    }

    /// Compute the ticket after a compare-and-swap transition.
    ///
    /// Checks, in order: the edge is legal, the current status equals `from`,
    /// and a room is supplied when entering `Called`. Room occupancy by other
    /// tickets is the caller's responsibility.
    ///
    /// # Errors
    ///
    /// - [`TicketStoreError::InvalidTransition`] for an edge outside the lifecycle
    /// - [`TicketStoreError::Conflict`] when the current status is not `from`
    /// - [`TicketStoreError::Validation`] when calling without a room
    pub fn apply_transition(
        &self,
        from: TicketStatus,
        to: TicketStatus,
        fields: &TransitionFields,
    ) -> Result<Self, TicketStoreError> {
        if !from.can_transition_to(to) {
            return Err(TicketStoreError::InvalidTransition {
                id: self.id,
                from,
                to,
            });
        }
        if self.status != from {
            return Err(TicketStoreError::Conflict {
                id: self.id,
                expected: from,
                actual: self.status,
            });
        }

        let mut next = self.clone();
        next.status = to;
        next.updated_at = fields.now;
        next.revision = self.revision + 1;

        match to {
            TicketStatus::Called => {
                let room = fields.room.clone().ok_or_else(|| {
                    TicketStoreError::Validation(format!("calling ticket {} requires a room", self.id))
                })?;
                next.room = Some(room);
                next.called_at = Some(fields.now);
            }
            TicketStatus::InService => {}
            TicketStatus::Waiting | TicketStatus::Completed | TicketStatus::Cancelled => {
                next.room = None;
            }
        }

        Ok(next)
    }
}

/// Producer request for a new ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTicket {
    /// Target sector
    pub sector: SectorCode,
    /// Priority band
    pub priority: Priority,
    /// Optional patient back reference
    pub patient_ref: Option<PatientRef>,
}

impl NewTicket {
    /// Request a ticket without a patient reference.
    #[must_use]
    pub const fn new(sector: SectorCode, priority: Priority) -> Self {
        Self {
            sector,
            priority,
            patient_ref: None,
        }
    }

    /// Attach a patient reference.
    #[must_use]
    pub fn with_patient(mut self, patient_ref: PatientRef) -> Self {
        self.patient_ref = Some(patient_ref);
        self
    }
}

/// Field values written alongside a status transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionFields {
    /// Room to assign (required when entering `Called`, ignored otherwise)
    pub room: Option<RoomId>,
    /// Commit time; becomes `updated_at`, and `called_at` on a call
    pub now: DateTime<Utc>,
}

impl TransitionFields {
    /// Fields for a transition at `now` without a room.
    #[must_use]
    pub const fn at(now: DateTime<Utc>) -> Self {
        Self { room: None, now }
    }

    /// Fields for calling a ticket into `room` at `now`.
    #[must_use]
    pub const fn call(room: RoomId, now: DateTime<Utc>) -> Self {
        Self {
            room: Some(room),
            now,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn sample(priority: Priority, offset_secs: i64, seq: u64) -> Ticket {
        let base = DateTime::parse_from_rfc3339("2025-01-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Ticket::waiting(
            TicketId::new(),
            TicketNumber::new("TRI", seq),
            NewTicket::new(SectorCode::new("triage"), priority),
            base + Duration::seconds(offset_secs),
        )
    }

    #[test]
    fn priority_bands_are_ordered() {
        assert!(Priority::Normal < Priority::Priority);
        assert!(Priority::Priority < Priority::Urgent);
        for p in Priority::ALL {
            assert_eq!(Priority::from_rank(p.rank()), Some(p));
        }
    }

    #[test]
    fn legacy_status_words_map_to_canonical() {
        assert_eq!("aguardando".parse::<TicketStatus>().unwrap(), TicketStatus::Waiting);
        assert_eq!("chamado".parse::<TicketStatus>().unwrap(), TicketStatus::Called);
        assert_eq!("em_atendimento".parse::<TicketStatus>().unwrap(), TicketStatus::InService);
        assert_eq!("atendido".parse::<TicketStatus>().unwrap(), TicketStatus::Completed);
        assert_eq!("Cancelado".parse::<TicketStatus>().unwrap(), TicketStatus::Cancelled);
        assert_eq!(TicketStatus::InService.to_string(), "in_service");
        assert!("attended".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn legacy_priority_words_map_to_canonical() {
        assert_eq!("urgente".parse::<Priority>().unwrap(), Priority::Urgent);
        assert_eq!("preferencial".parse::<Priority>().unwrap(), Priority::Priority);
        assert_eq!(" NORMAL ".parse::<Priority>().unwrap(), Priority::Normal);
        let err = "vip".parse::<Priority>().unwrap_err();
        assert_eq!(err.kind(), "priority");
    }

    #[test]
    fn lifecycle_edges() {
        use TicketStatus::*;
        let legal = [
            (Waiting, Called),
            (Called, InService),
            (InService, Completed),
            (Waiting, Cancelled),
            (Called, Cancelled),
            (InService, Cancelled),
        ];
        for from in TicketStatus::ALL {
            for to in TicketStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn call_sets_room_and_called_at_once() {
        let ticket = sample(Priority::Normal, 0, 1);
        let now = ticket.created_at + Duration::minutes(5);
        let called = ticket
            .apply_transition(
                TicketStatus::Waiting,
                TicketStatus::Called,
                &TransitionFields::call(RoomId::new("room1"), now),
            )
            .unwrap();
        assert_eq!(called.room, Some(RoomId::new("room1")));
        assert_eq!(called.called_at, Some(now));
        assert_eq!(called.revision, 2);
        assert!(called.invariants_hold());

        let later = now + Duration::minutes(1);
        let serving = called
            .apply_transition(TicketStatus::Called, TicketStatus::InService, &TransitionFields::at(later))
            .unwrap();
        assert_eq!(serving.room, Some(RoomId::new("room1")));
        assert_eq!(serving.called_at, Some(now));

        let done = serving
            .apply_transition(TicketStatus::InService, TicketStatus::Completed, &TransitionFields::at(later))
            .unwrap();
        assert_eq!(done.room, None);
        assert_eq!(done.called_at, Some(now));
        assert!(done.invariants_hold());
    }

    #[test]
    fn stale_from_status_is_a_conflict() {
        let ticket = sample(Priority::Normal, 0, 1);
        let err = ticket
            .apply_transition(
                TicketStatus::Called,
                TicketStatus::InService,
                &TransitionFields::at(ticket.created_at),
            )
            .unwrap_err();
        assert_eq!(
            err,
            TicketStoreError::Conflict {
                id: ticket.id,
                expected: TicketStatus::Called,
                actual: TicketStatus::Waiting,
            }
        );
    }

    #[test]
    fn calling_without_room_is_rejected() {
        let ticket = sample(Priority::Normal, 0, 1);
        let err = ticket
            .apply_transition(
                TicketStatus::Waiting,
                TicketStatus::Called,
                &TransitionFields::at(ticket.created_at),
            )
            .unwrap_err();
        assert!(matches!(err, TicketStoreError::Validation(_)));
    }

    #[test]
    fn queue_order_is_priority_then_arrival() {
        let a = sample(Priority::Normal, 0, 1);
        let b = sample(Priority::Urgent, 1, 2);
        let c = sample(Priority::Priority, 2, 3);
        let d = sample(Priority::Normal, 3, 4);
        let mut tickets = vec![d.clone(), a.clone(), c.clone(), b.clone()];
        tickets.sort_by(Ticket::queue_order);
        let ids: Vec<_> = tickets.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![b.id, c.id, a.id, d.id]);
    }

    proptest! {
        #[test]
        fn queue_order_never_puts_lower_band_first(
            specs in prop::collection::vec((0usize..3, 0i64..1000), 1..40)
        ) {
            let mut tickets: Vec<Ticket> = specs
                .iter()
                .enumerate()
                .map(|(i, (band, offset))| sample(Priority::ALL[*band], *offset, i as u64 + 1))
                .collect();
            tickets.sort_by(Ticket::queue_order);
            for pair in tickets.windows(2) {
                prop_assert!(pair[0].priority >= pair[1].priority);
                if pair[0].priority == pair[1].priority {
                    prop_assert!(pair[0].created_at <= pair[1].created_at);
                }
            }
        }

        #[test]
        fn only_lifecycle_edges_apply(from_idx in 0usize..5, to_idx in 0usize..5) {
            let from = TicketStatus::ALL[from_idx];
            let to = TicketStatus::ALL[to_idx];
            let mut ticket = sample(Priority::Normal, 0, 1);
            ticket.status = from;
            if from.holds_room() {
                ticket.room = Some(RoomId::new("room1"));
            }
            let result = ticket.apply_transition(
                from,
                to,
                &TransitionFields::call(RoomId::new("room1"), ticket.created_at),
            );
            prop_assert_eq!(result.is_ok(), from.can_transition_to(to));
        }
    }
}
