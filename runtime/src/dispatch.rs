//! Dispatch engine: calls tickets into rooms and moves them through service.
//!
//! Every mutation is a single compare-and-swap on the store. No in-process
//! lock spans the read of candidates and the write; two consoles racing for
//! the same ticket are separated by the store's conditional write, and the
//! loser simply moves on to the next candidate.
//!
//! After a mutation commits the engine publishes the matching
//! [`TicketEvent`] and, for calls, fires the [`CallAnnouncer`]. A publish
//! failure is logged and counted; the committed mutation stands.

use crate::error::QueueError;
use crate::guard::StoreGuard;
use crate::metrics::QueueMetrics;
use clinic_queue_core::announce::{Announcement, AnnouncementKind, CallAnnouncer};
use clinic_queue_core::change_feed::ChangeFeed;
use clinic_queue_core::environment::Clock;
use clinic_queue_core::event::TicketEvent;
use clinic_queue_core::sector::SectorCode;
use clinic_queue_core::ticket::{RoomId, Ticket, TicketId, TicketStatus, TransitionFields};
use clinic_queue_core::ticket_store::{TicketStore, TicketStoreError};
use std::sync::Arc;
use std::time::Instant;

/// Result of [`DispatchEngine::call_next`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallOutcome {
    /// This ticket was called into the room.
    Called(Ticket),
    /// No ticket is waiting in the sector.
    Empty,
}

impl CallOutcome {
    /// The called ticket, if any.
    #[must_use]
    pub const fn ticket(&self) -> Option<&Ticket> {
        match self {
            Self::Called(ticket) => Some(ticket),
            Self::Empty => None,
        }
    }

    /// Whether the queue was empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Text suitable for a staff console.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Called(ticket) => match &ticket.room {
                Some(room) => format!("Calling {} to {room}", ticket.number),
                None => format!("Calling {}", ticket.number),
            },
            Self::Empty => "no ticket available".to_string(),
        }
    }
}

/// Publish a committed change, logging and counting any failure.
pub(crate) async fn publish_committed(feed: &dyn ChangeFeed, event: TicketEvent) {
    let ticket_id = event.ticket_id();
    let event_type = event.event_type();
    if let Err(err) = feed.publish(event).await {
        QueueMetrics::record_publish_error();
        tracing::error!(
            ticket_id = %ticket_id,
            event_type,
            error = %err,
            "Failed to publish committed change; subscribers will reconcile on resync"
        );
    }
}

/// Whether `ticket` holds the write of a `to` transition made with `fields`.
///
/// A guarded retry whose first attempt committed before the reply was lost
/// sees its own write as a conflict. `read_revision` is the revision the
/// writer saw before the attempt, when known.
fn carries_write(ticket: &Ticket, to: TicketStatus, fields: &TransitionFields, read_revision: Option<u64>) -> bool {
    let revision_matches = read_revision.is_none_or(|read| ticket.revision == read + 1);
    let room_matches = to != TicketStatus::Called
        || (ticket.room == fields.room && ticket.called_at == Some(fields.now));
    ticket.status == to && ticket.updated_at == fields.now && revision_matches && room_matches
}

fn acknowledgement_lost(ticket: &Ticket) {
    tracing::warn!(
        ticket_id = %ticket.id,
        status = %ticket.status,
        revision = ticket.revision,
        "Store reply lost after commit; confirmed transition on re-read"
    );
}

/// Staff-side state machine driver.
#[derive(Clone)]
pub struct DispatchEngine {
    store: Arc<dyn TicketStore>,
    feed: Arc<dyn ChangeFeed>,
    announcer: Arc<dyn CallAnnouncer>,
    clock: Arc<dyn Clock>,
    guard: StoreGuard,
    advance_attempts: usize,
}

impl DispatchEngine {
    /// Create an engine over shared collaborators.
    ///
    /// `advance_attempts` bounds the compare-and-swap retries of
    /// [`advance_status`](Self::advance_status) and [`cancel`](Self::cancel).
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        feed: Arc<dyn ChangeFeed>,
        announcer: Arc<dyn CallAnnouncer>,
        clock: Arc<dyn Clock>,
        guard: StoreGuard,
        advance_attempts: usize,
    ) -> Self {
        Self {
            store,
            feed,
            announcer,
            clock,
            guard,
            advance_attempts: advance_attempts.max(1),
        }
    }

    /// Call the head-of-line waiting ticket of `sector` into `room`.
    ///
    /// Candidates are tried in queue order; a candidate taken by another
    /// console is skipped. The loop is bounded by the number of candidates
    /// read at entry.
    ///
    /// # Errors
    ///
    /// - [`QueueError::RoomOccupied`] if `room` already holds a ticket
    /// - [`QueueError::Busy`] if every candidate was taken concurrently
    /// - [`QueueError::Unavailable`] if the store stayed unreachable
    pub async fn call_next(&self, sector: &SectorCode, room: &RoomId) -> Result<CallOutcome, QueueError> {
        let started = Instant::now();
        let result = self.try_call_next(sector, room).await;
        let outcome = match &result {
            Ok(CallOutcome::Called(_)) => "called",
            Ok(CallOutcome::Empty) => "empty",
            Err(err) => QueueMetrics::dispatch_outcome(err),
        };
        QueueMetrics::record_dispatch(outcome, started.elapsed());
        result
    }

    async fn try_call_next(&self, sector: &SectorCode, room: &RoomId) -> Result<CallOutcome, QueueError> {
        let candidates: Vec<Ticket> = self
            .guard
            .run("list_active", || self.store.list_active(Some(sector.clone())))
            .await?
            .into_iter()
            .filter(|t| t.status == TicketStatus::Waiting)
            .collect();

        if candidates.is_empty() {
            tracing::debug!(sector = %sector, room = %room, "No waiting tickets");
            return Ok(CallOutcome::Empty);
        }

        let total = candidates.len();
        for (position, candidate) in candidates.into_iter().enumerate() {
            let fields = TransitionFields::call(room.clone(), self.clock.now());
            let result = self
                .guard
                .run("transition", || {
                    self.store
                        .transition(candidate.id, TicketStatus::Waiting, TicketStatus::Called, fields.clone())
                })
                .await;

            let committed = match result {
                Ok(ticket) => Some(ticket),
                // A retried write whose first attempt committed also lands here.
                Err(TicketStoreError::Conflict { .. }) => {
                    self.own_commit(candidate.id, TicketStatus::Called, &fields, Some(candidate.revision))
                        .await?
                }
                Err(TicketStoreError::NotFound(_)) => None,
                Err(err) => return Err(err.into()),
            };

            if let Some(ticket) = committed {
                tracing::info!(
                    ticket_id = %ticket.id,
                    number = %ticket.number,
                    sector = %sector,
                    room = %room,
                    priority = %ticket.priority,
                    "Ticket called"
                );
                QueueMetrics::record_transition(TicketStatus::Called);
                publish_committed(
                    self.feed.as_ref(),
                    TicketEvent::from_transition(ticket.clone(), TicketStatus::Waiting),
                )
                .await;
                self.announce(&ticket, AnnouncementKind::First);
                return Ok(CallOutcome::Called(ticket));
            }

            // Taken or withdrawn since the read: try the next one.
            QueueMetrics::record_conflict();
            tracing::debug!(
                ticket_id = %candidate.id,
                sector = %sector,
                room = %room,
                attempt = position + 1,
                candidates = total,
                "Candidate taken by another console, trying next"
            );
        }

        tracing::warn!(sector = %sector, room = %room, candidates = total, "Every dispatch candidate was taken concurrently");
        Err(QueueError::Busy(format!(
            "all {total} waiting tickets in {sector} were taken by other consoles"
        )))
    }

    /// Move a ticket forward: `called -> in_service` or `in_service -> completed`.
    ///
    /// `to = Cancelled` is delegated to [`cancel`](Self::cancel).
    ///
    /// # Errors
    ///
    /// - [`QueueError::NotFound`] for an unknown id
    /// - [`QueueError::InvalidTransition`] if the ticket's status cannot reach `to`
    /// - [`QueueError::Busy`] if the compare-and-swap budget is exhausted
    /// - [`QueueError::Unavailable`] if the store stayed unreachable
    pub async fn advance_status(&self, id: TicketId, to: TicketStatus) -> Result<Ticket, QueueError> {
        if to == TicketStatus::Cancelled {
            return self.cancel(id).await;
        }
        let Some(from) = to.predecessor() else {
            let current = self.get(id).await?;
            return Err(QueueError::InvalidTransition {
                id,
                from: current.status,
                to,
            });
        };

        for attempt in 1..=self.advance_attempts {
            let fields = TransitionFields::at(self.clock.now());
            let result = self
                .guard
                .run("transition", || self.store.transition(id, from, to, fields.clone()))
                .await;

            let ticket = match result {
                Ok(ticket) => ticket,
                Err(TicketStoreError::Conflict { .. }) => {
                    let current = self.get(id).await?;
                    if carries_write(&current, to, &fields, None) {
                        acknowledgement_lost(&current);
                        current
                    } else if current.status != from {
                        return Err(QueueError::InvalidTransition {
                            id,
                            from: current.status,
                            to,
                        });
                    } else {
                        tracing::debug!(ticket_id = %id, attempt, to = %to, "Advance lost a race, retrying");
                        continue;
                    }
                }
                Err(err) => return Err(err.into()),
            };

            tracing::info!(ticket_id = %id, from = %from, to = %to, "Ticket advanced");
            QueueMetrics::record_transition(to);
            publish_committed(self.feed.as_ref(), TicketEvent::from_transition(ticket.clone(), from)).await;
            return Ok(ticket);
        }

        tracing::warn!(ticket_id = %id, to = %to, attempts = self.advance_attempts, "Advance retries exhausted");
        Err(QueueError::Busy(format!(
            "ticket {id} kept changing while moving it to {to}"
        )))
    }

    /// Cancel a ticket from whatever non-terminal status it is in.
    ///
    /// # Errors
    ///
    /// - [`QueueError::NotFound`] for an unknown id
    /// - [`QueueError::InvalidTransition`] if the ticket is already terminal
    /// - [`QueueError::Busy`] if the compare-and-swap budget is exhausted
    /// - [`QueueError::Unavailable`] if the store stayed unreachable
    pub async fn cancel(&self, id: TicketId) -> Result<Ticket, QueueError> {
        for attempt in 1..=self.advance_attempts {
            let current = self.get(id).await?;
            if current.status.is_terminal() {
                return Err(QueueError::InvalidTransition {
                    id,
                    from: current.status,
                    to: TicketStatus::Cancelled,
                });
            }

            let fields = TransitionFields::at(self.clock.now());
            let result = self
                .guard
                .run("transition", || {
                    self.store
                        .transition(id, current.status, TicketStatus::Cancelled, fields.clone())
                })
                .await;

            let ticket = match result {
                Ok(ticket) => ticket,
                Err(TicketStoreError::Conflict { .. }) => {
                    match self
                        .own_commit(id, TicketStatus::Cancelled, &fields, Some(current.revision))
                        .await?
                    {
                        Some(ticket) => ticket,
                        None => {
                            tracing::debug!(ticket_id = %id, attempt, "Cancel lost a race, re-reading");
                            continue;
                        }
                    }
                }
                Err(err) => return Err(err.into()),
            };

            tracing::info!(ticket_id = %id, from = %current.status, "Ticket cancelled");
            QueueMetrics::record_transition(TicketStatus::Cancelled);
            publish_committed(
                self.feed.as_ref(),
                TicketEvent::from_transition(ticket.clone(), current.status),
            )
            .await;
            return Ok(ticket);
        }

        tracing::warn!(ticket_id = %id, attempts = self.advance_attempts, "Cancel retries exhausted");
        Err(QueueError::Busy(format!("ticket {id} kept changing while cancelling it")))
    }

    /// Announce a called ticket again. No state change, no change event.
    ///
    /// # Errors
    ///
    /// - [`QueueError::NotFound`] for an unknown id
    /// - [`QueueError::InvalidTransition`] if the ticket is not currently `called`
    pub async fn recall(&self, id: TicketId) -> Result<Ticket, QueueError> {
        let ticket = self.get(id).await?;
        if ticket.status != TicketStatus::Called {
            return Err(QueueError::InvalidTransition {
                id,
                from: ticket.status,
                to: TicketStatus::Called,
            });
        }
        tracing::info!(ticket_id = %id, number = %ticket.number, "Ticket recalled");
        self.announce(&ticket, AnnouncementKind::Recall);
        Ok(ticket)
    }

    async fn get(&self, id: TicketId) -> Result<Ticket, QueueError> {
        Ok(self.guard.run("get", || self.store.get(id)).await?)
    }

    /// After a conflict, re-read `id` and return it if the stored row is the
    /// one this engine wrote with `fields`.
    async fn own_commit(
        &self,
        id: TicketId,
        to: TicketStatus,
        fields: &TransitionFields,
        read_revision: Option<u64>,
    ) -> Result<Option<Ticket>, QueueError> {
        match self.get(id).await {
            Ok(current) if carries_write(&current, to, fields, read_revision) => {
                acknowledgement_lost(&current);
                Ok(Some(current))
            }
            Ok(_) | Err(QueueError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn announce(&self, ticket: &Ticket, kind: AnnouncementKind) {
        if let Some(announcement) = Announcement::for_ticket(ticket, kind, self.clock.now()) {
            self.announcer.announce(&announcement);
        }
    }
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("guard", &self.guard)
            .field("advance_attempts", &self.advance_attempts)
            .finish_non_exhaustive()
    }
}
