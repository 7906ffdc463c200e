//! In-memory [`TicketStore`] implementation.
//!
//! All state lives behind one `tokio::sync::RwLock`. Every operation takes the
//! lock exactly once and releases it before returning, so each call is one
//! atomic step; no lock is ever held across two calls. That matches the
//! contract of a real database offering single-statement conditional writes.

use clinic_queue_core::sector::{SectorCatalog, SectorCode};
use clinic_queue_core::sequence::{SectorSequences, TicketNumber};
use clinic_queue_core::ticket::{NewTicket, RoomId, Ticket, TicketId, TicketStatus, TransitionFields};
use clinic_queue_core::ticket_store::{StoreFuture, TicketStore, TicketStoreError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct StoreState {
    tickets: HashMap<TicketId, Ticket>,
    sequences: SectorSequences,
    /// Room -> ticket currently called into or served in it
    rooms: HashMap<RoomId, TicketId>,
}

/// In-memory ticket store for tests and single-process deployments.
///
/// Cloning is cheap and clones share state.
///
/// # Example
///
/// ```
/// use clinic_queue_testing::InMemoryTicketStore;
/// use clinic_queue_core::{NewTicket, Priority, SectorCode, TicketStore, TicketStatus, Utc};
///
/// # tokio_test::block_on(async {
/// let store = InMemoryTicketStore::new();
/// let ticket = store
///     .create(NewTicket::new(SectorCode::new("triage"), Priority::Normal), Utc::now())
///     .await
///     .unwrap();
/// assert_eq!(ticket.status, TicketStatus::Waiting);
/// assert_eq!(ticket.number.to_string(), "TRI-001");
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryTicketStore {
    state: Arc<RwLock<StoreState>>,
    catalog: Arc<SectorCatalog>,
}

impl InMemoryTicketStore {
    /// Store using the default clinic sector catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::with_catalog(SectorCatalog::default())
    }

    /// Store using a custom sector catalog.
    #[must_use]
    pub fn with_catalog(catalog: SectorCatalog) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            catalog: Arc::new(catalog),
        }
    }

    /// The sector catalog tickets are validated against.
    #[must_use]
    pub fn catalog(&self) -> &SectorCatalog {
        &self.catalog
    }

    /// Number of tickets ever created (any status).
    pub async fn len(&self) -> usize {
        self.state.read().await.tickets.len()
    }

    /// Whether no ticket was ever created.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.tickets.is_empty()
    }

    /// Every ticket, in no particular order.
    pub async fn all_tickets(&self) -> Vec<Ticket> {
        self.state.read().await.tickets.values().cloned().collect()
    }

    /// The ticket currently holding `room`, if any.
    pub async fn occupant(&self, room: &RoomId) -> Option<TicketId> {
        self.state.read().await.rooms.get(room).copied()
    }
}

impl Default for InMemoryTicketStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sector_matches(ticket: &Ticket, sector: Option<&SectorCode>) -> bool {
    sector.is_none_or(|s| &ticket.sector == s)
}

impl TicketStore for InMemoryTicketStore {
    fn create(&self, request: NewTicket, now: DateTime<Utc>) -> StoreFuture<'_, Ticket> {
        Box::pin(async move {
            let prefix = self.catalog.require(&request.sector)?.prefix.clone();

            let mut state = self.state.write().await;
            let seq = state.sequences.next(&request.sector);
            let ticket = Ticket::waiting(TicketId::new(), TicketNumber::new(prefix, seq), request, now);
            state.tickets.insert(ticket.id, ticket.clone());
            drop(state);

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
            self.state
                .read()
                .await
                .tickets
                .get(&id)
                .cloned()
                .ok_or(TicketStoreError::NotFound(id))
        })
    }

    fn list_active(&self, sector: Option<SectorCode>) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let state = self.state.read().await;
            let mut active: Vec<Ticket> = state
                .tickets
                .values()
                .filter(|t| t.status.is_active() && sector_matches(t, sector.as_ref()))
                .cloned()
                .collect();
            drop(state);
            active.sort_by(Ticket::queue_order);
            Ok(active)
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
            let mut state = self.state.write().await;
            let current = state.tickets.get(&id).ok_or(TicketStoreError::NotFound(id))?;
            let next = current.apply_transition(from, to, &fields)?;
            let released_room = current.room.clone();

            if to.holds_room() {
                if let Some(room) = &next.room {
                    if let Some(&occupant) = state.rooms.get(room) {
                        if occupant != id {
                            return Err(TicketStoreError::RoomOccupied {
                                room: room.clone(),
                                occupant,
                            });
                        }
                    }
                    state.rooms.insert(room.clone(), id);
                }
            } else if let Some(room) = released_room {
                if state.rooms.get(&room) == Some(&id) {
                    state.rooms.remove(&room);
                }
            }

            state.tickets.insert(id, next.clone());
            drop(state);

            tracing::debug!(
                ticket_id = %id,
                from = %from,
                to = %to,
                revision = next.revision,
                "Ticket transitioned"
            );
            Ok(next)
        })
    }

    fn recent_calls(&self, sector: Option<SectorCode>, limit: usize) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let state = self.state.read().await;
            let mut called: Vec<Ticket> = state
                .tickets
                .values()
                .filter(|t| t.called_at.is_some() && sector_matches(t, sector.as_ref()))
                .cloned()
                .collect();
            drop(state);
            called.sort_by(|a, b| b.called_at.cmp(&a.called_at).then_with(|| Ticket::queue_order(a, b)));
            called.truncate(limit);
            Ok(called)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use clinic_queue_core::ticket::Priority;

    fn triage() -> SectorCode {
        SectorCode::new("triage")
    }

    #[tokio::test]
    async fn unknown_sector_is_a_validation_error() {
        let store = InMemoryTicketStore::new();
        let err = store
            .create(NewTicket::new(SectorCode::new("radiology"), Priority::Normal), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TicketStoreError::Validation(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn room_is_exclusive_until_released() {
        let store = InMemoryTicketStore::new();
        let now = Utc::now();
        let a = store.create(NewTicket::new(triage(), Priority::Normal), now).await.unwrap();
        let b = store.create(NewTicket::new(triage(), Priority::Normal), now).await.unwrap();
        let room = RoomId::new("room1");

        store
            .transition(a.id, TicketStatus::Waiting, TicketStatus::Called, TransitionFields::call(room.clone(), now))
            .await
            .unwrap();
        let err = store
            .transition(b.id, TicketStatus::Waiting, TicketStatus::Called, TransitionFields::call(room.clone(), now))
            .await
            .unwrap_err();
        assert_eq!(err, TicketStoreError::RoomOccupied { room: room.clone(), occupant: a.id });
        assert_eq!(store.get(b.id).await.unwrap().status, TicketStatus::Waiting);

        store.cancel(a.id, now).await.unwrap();
        assert_eq!(store.occupant(&room).await, None);
        store
            .transition(b.id, TicketStatus::Waiting, TicketStatus::Called, TransitionFields::call(room.clone(), now))
            .await
            .unwrap();
        assert_eq!(store.occupant(&room).await, Some(b.id));
    }

    #[tokio::test]
    async fn cancel_of_terminal_ticket_is_rejected() {
        let store = InMemoryTicketStore::new();
        let now = Utc::now();
        let a = store.create(NewTicket::new(triage(), Priority::Normal), now).await.unwrap();
        store.cancel(a.id, now).await.unwrap();
        let err = store.cancel(a.id, now).await.unwrap_err();
        assert!(matches!(err, TicketStoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn list_active_excludes_terminal_and_other_sectors() {
        let store = InMemoryTicketStore::new();
        let now = Utc::now();
        let a = store.create(NewTicket::new(triage(), Priority::Normal), now).await.unwrap();
        let b = store.create(NewTicket::new(triage(), Priority::Urgent), now).await.unwrap();
        let other = store
            .create(NewTicket::new(SectorCode::new("office-1"), Priority::Urgent), now)
            .await
            .unwrap();
        store.cancel(a.id, now).await.unwrap();

        let triage_active = store.list_active(Some(triage())).await.unwrap();
        assert_eq!(triage_active.iter().map(|t| t.id).collect::<Vec<_>>(), vec![b.id]);

        let all_active = store.list_active(None).await.unwrap();
        assert_eq!(all_active.len(), 2);
        assert!(all_active.iter().any(|t| t.id == other.id));
    }

    #[tokio::test]
    async fn recent_calls_are_most_recent_first() {
        let store = InMemoryTicketStore::new();
        let t0 = Utc::now();
        let a = store.create(NewTicket::new(triage(), Priority::Normal), t0).await.unwrap();
        let b = store.create(NewTicket::new(triage(), Priority::Normal), t0).await.unwrap();
        store
            .transition(a.id, TicketStatus::Waiting, TicketStatus::Called, TransitionFields::call(RoomId::new("r1"), t0))
            .await
            .unwrap();
        store
            .transition(
                b.id,
                TicketStatus::Waiting,
                TicketStatus::Called,
                TransitionFields::call(RoomId::new("r2"), t0 + chrono::Duration::seconds(30)),
            )
            .await
            .unwrap();

        let recent = store.recent_calls(Some(triage()), 10).await.unwrap();
        assert_eq!(recent.iter().map(|t| t.id).collect::<Vec<_>>(), vec![b.id, a.id]);
        assert_eq!(store.recent_calls(None, 1).await.unwrap().len(), 1);
    }
}
