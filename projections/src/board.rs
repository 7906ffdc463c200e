//! `QueueBoard`: the in-memory view behind display panels.
//!
//! The board holds the active tickets of one sector (or all sectors) and the
//! last few calls. It is fed from two sources:
//!
//! - a snapshot ([`QueueBoard::replace`]) read from the store
//! - change events ([`QueueBoard::apply`]) read from the feed
//!
//! Delivery is at-least-once and unordered, so every event is checked
//! against the highest revision already seen for its ticket. Duplicates and
//! stale events are dropped; the board therefore converges to the store's
//! state no matter how the feed shuffles or repeats events.
//!
//! # Example
//!
//! ```
//! use clinic_queue_core::{NewTicket, Priority, SectorCode, Ticket, TicketEvent, TicketId, TicketNumber, Utc};
//! use clinic_queue_projections::QueueBoard;
//!
//! let ticket = Ticket::waiting(
//!     TicketId::new(),
//!     TicketNumber::new("TRI", 1),
//!     NewTicket::new(SectorCode::new("triage"), Priority::Normal),
//!     Utc::now(),
//! );
//! let event = TicketEvent::Created { ticket };
//!
//! let mut board = QueueBoard::new(Some(SectorCode::new("triage")));
//! assert!(board.apply(&event));
//! assert!(!board.apply(&event)); // duplicate
//! assert_eq!(board.waiting().len(), 1);
//! ```

use clinic_queue_core::event::TicketEvent;
use clinic_queue_core::sector::SectorCode;
use clinic_queue_core::ticket::{Ticket, TicketId, TicketStatus};
use std::collections::{HashMap, VecDeque};

/// Number of calls kept for the "last called" strip.
pub const DEFAULT_RECENT_CALLS: usize = 5;

/// Read-side view of a queue.
#[derive(Debug, Clone)]
pub struct QueueBoard {
    sector: Option<SectorCode>,
    active: HashMap<TicketId, Ticket>,
    revisions: HashMap<TicketId, u64>,
    recent: VecDeque<Ticket>,
    recent_limit: usize,
}

impl QueueBoard {
    /// Empty board for one sector, or every sector with `None`.
    #[must_use]
    pub fn new(sector: Option<SectorCode>) -> Self {
        Self {
            sector,
            active: HashMap::new(),
            revisions: HashMap::new(),
            recent: VecDeque::new(),
            recent_limit: DEFAULT_RECENT_CALLS,
        }
    }

    /// Keep `limit` entries in the recent-calls strip.
    #[must_use]
    pub fn with_recent_limit(mut self, limit: usize) -> Self {
        self.recent_limit = limit;
        self.recent.truncate(limit);
        self
    }

    /// Sector this board follows.
    #[must_use]
    pub const fn sector(&self) -> Option<&SectorCode> {
        self.sector.as_ref()
    }

    /// Configured size of the recent-calls strip.
    #[must_use]
    pub const fn recent_limit(&self) -> usize {
        self.recent_limit
    }

    /// Apply one change event.
    ///
    /// Returns `false` when the event was ignored: other sector, duplicate,
    /// or older than what the board already holds.
    pub fn apply(&mut self, event: &TicketEvent) -> bool {
        let ticket = event.ticket();
        if !self.follows(&ticket.sector) {
            return false;
        }
        if !self.observe(ticket) {
            tracing::trace!(
                ticket_id = %ticket.id,
                revision = ticket.revision,
                "Dropping stale or duplicate event"
            );
            return false;
        }

        if let TicketEvent::Transitioned {
            to: TicketStatus::Called,
            ..
        } = event
        {
            self.push_recent(ticket.clone());
        }
        true
    }

    /// Replace the active set with a store snapshot.
    ///
    /// Revisions already seen are kept for tickets in the snapshot, so events
    /// buffered before the snapshot was read are still recognised as stale
    /// afterwards. Revisions of tickets absent from it are forgotten; the
    /// feed delivers in commit order, so a later event for such a ticket
    /// still ends in its latest state.
    pub fn replace(&mut self, snapshot: Vec<Ticket>) {
        self.active.clear();
        for ticket in snapshot {
            if !self.follows(&ticket.sector) || !ticket.status.is_active() {
                continue;
            }
            let seen = self.revisions.get(&ticket.id).copied().unwrap_or(0);
            self.revisions.insert(ticket.id, seen.max(ticket.revision));
            self.active.insert(ticket.id, ticket);
        }
        let active = &self.active;
        self.revisions.retain(|id, _| active.contains_key(id));
    }

    /// Replace the recent-calls strip with a store snapshot (newest first).
    pub fn replace_recent(&mut self, calls: Vec<Ticket>) {
        self.recent = calls
            .into_iter()
            .filter(|t| self.follows(&t.sector) && t.called_at.is_some())
            .take(self.recent_limit)
            .collect();
    }

    /// Active tickets in dispatch order.
    #[must_use]
    pub fn active(&self) -> Vec<&Ticket> {
        let mut tickets: Vec<&Ticket> = self.active.values().collect();
        tickets.sort_by(|a, b| Ticket::queue_order(a, b));
        tickets
    }

    /// Waiting tickets in dispatch order; the first one is called next.
    #[must_use]
    pub fn waiting(&self) -> Vec<&Ticket> {
        self.active()
            .into_iter()
            .filter(|t| t.status == TicketStatus::Waiting)
            .collect()
    }

    /// Tickets currently holding a room, most recently called first.
    #[must_use]
    pub fn now_serving(&self) -> Vec<&Ticket> {
        let mut tickets: Vec<&Ticket> = self.active.values().filter(|t| t.status.holds_room()).collect();
        tickets.sort_by(|a, b| b.called_at.cmp(&a.called_at).then_with(|| a.id.cmp(&b.id)));
        tickets
    }

    /// The last calls, newest first.
    #[must_use]
    pub fn recent_calls(&self) -> Vec<&Ticket> {
        self.recent.iter().collect()
    }

    /// One active ticket.
    #[must_use]
    pub fn get(&self, id: TicketId) -> Option<&Ticket> {
        self.active.get(&id)
    }

    /// Highest revision seen for `id`, active or not.
    #[must_use]
    pub fn revision_of(&self, id: TicketId) -> Option<u64> {
        self.revisions.get(&id).copied()
    }

    /// Number of active tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no ticket is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    fn follows(&self, sector: &SectorCode) -> bool {
        self.sector.as_ref().is_none_or(|own| own == sector)
    }

    // Record `ticket` if it is newer than anything seen for its id.
    fn observe(&mut self, ticket: &Ticket) -> bool {
        let seen = self.revisions.entry(ticket.id).or_insert(0);
        if ticket.revision <= *seen {
            return false;
        }
        *seen = ticket.revision;

        if ticket.status.is_active() {
            self.active.insert(ticket.id, ticket.clone());
        } else {
            self.active.remove(&ticket.id);
        }
        true
    }

    fn push_recent(&mut self, ticket: Ticket) {
        self.recent.retain(|t| t.id != ticket.id);
        self.recent.push_front(ticket);
        self.recent
            .make_contiguous()
            .sort_by(|a, b| b.called_at.cmp(&a.called_at));
        self.recent.truncate(self.recent_limit);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use clinic_queue_core::ticket::{NewTicket, Priority, RoomId, TransitionFields};
    use clinic_queue_core::sequence::TicketNumber;
    use proptest::prelude::*;

    fn triage() -> SectorCode {
        SectorCode::new("triage")
    }

    fn ticket(seq: u64, priority: Priority, minute: i64) -> Ticket {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap() + Duration::minutes(minute);
        Ticket::waiting(
            TicketId::new(),
            TicketNumber::new("TRI", seq),
            NewTicket::new(triage(), priority),
            at,
        )
    }

    fn step(t: &Ticket, to: TicketStatus, room: &str) -> TicketEvent {
        let now = t.updated_at + Duration::minutes(1);
        let fields = if to == TicketStatus::Called {
            TransitionFields::call(RoomId::new(room), now)
        } else {
            TransitionFields::at(now)
        };
        let next = t.apply_transition(t.status, to, &fields).unwrap();
        TicketEvent::from_transition(next, t.status)
    }

    #[test]
    fn orders_waiting_by_priority_then_arrival() {
        let a = ticket(1, Priority::Normal, 0);
        let b = ticket(2, Priority::Urgent, 1);
        let c = ticket(3, Priority::Priority, 2);
        let mut board = QueueBoard::new(Some(triage()));
        for t in [&a, &b, &c] {
            board.apply(&TicketEvent::Created { ticket: t.clone() });
        }

        let order: Vec<_> = board.waiting().into_iter().map(|t| t.id).collect();
        assert_eq!(order, vec![b.id, c.id, a.id]);
    }

    #[test]
    fn ignores_other_sectors() {
        let mut other = ticket(1, Priority::Normal, 0);
        other.sector = SectorCode::new("office-1");
        let mut board = QueueBoard::new(Some(triage()));

        assert!(!board.apply(&TicketEvent::Created { ticket: other }));
        assert!(board.is_empty());
    }

    #[test]
    fn stale_event_does_not_resurrect_finished_ticket() {
        let t = ticket(1, Priority::Normal, 0);
        let created = TicketEvent::Created { ticket: t.clone() };
        let cancelled = step(&t, TicketStatus::Cancelled, "");
        let mut board = QueueBoard::new(None);

        assert!(board.apply(&cancelled));
        assert!(!board.apply(&created));
        assert!(board.is_empty());
        assert_eq!(board.revision_of(t.id), Some(2));
    }

    #[test]
    fn calls_feed_now_serving_and_recent_strip() {
        let t = ticket(1, Priority::Normal, 0);
        let mut board = QueueBoard::new(Some(triage()));
        board.apply(&TicketEvent::Created { ticket: t.clone() });
        let called = step(&t, TicketStatus::Called, "room1");
        board.apply(&called);

        assert!(board.waiting().is_empty());
        assert_eq!(board.now_serving()[0].room, Some(RoomId::new("room1")));
        assert_eq!(board.recent_calls()[0].id, t.id);

        let done = step(called.ticket(), TicketStatus::InService, "");
        board.apply(&done);
        board.apply(&step(done.ticket(), TicketStatus::Completed, ""));
        assert!(board.now_serving().is_empty());
        assert_eq!(board.recent_calls().len(), 1);
    }

    #[test]
    fn recent_strip_is_bounded_and_newest_first() {
        let mut board = QueueBoard::new(None).with_recent_limit(2);
        let tickets: Vec<_> = (1..=3).map(|i| ticket(i, Priority::Normal, i as i64 * 10)).collect();
        for (i, t) in tickets.iter().enumerate() {
            board.apply(&step(t, TicketStatus::Called, &format!("room{i}")));
        }

        let recent: Vec<_> = board.recent_calls().into_iter().map(|t| t.id).collect();
        assert_eq!(recent, vec![tickets[2].id, tickets[1].id]);
    }

    #[test]
    fn replace_keeps_revisions_for_buffered_events() {
        let t = ticket(1, Priority::Normal, 0);
        let called = step(&t, TicketStatus::Called, "room1");
        let mut board = QueueBoard::new(None);

        board.replace(vec![called.ticket().clone()]);
        assert!(!board.apply(&TicketEvent::Created { ticket: t.clone() }));
        assert_eq!(board.get(t.id).map(|t| t.status), Some(TicketStatus::Called));
    }

    #[test]
    fn replace_drops_tickets_missing_from_snapshot() {
        let a = ticket(1, Priority::Normal, 0);
        let b = ticket(2, Priority::Normal, 1);
        let mut board = QueueBoard::new(None);
        board.apply(&TicketEvent::Created { ticket: a.clone() });
        board.apply(&TicketEvent::Created { ticket: b.clone() });

        board.replace(vec![b.clone()]);
        assert_eq!(board.len(), 1);
        assert!(board.get(a.id).is_none());
    }

    #[test]
    fn replace_forgets_revisions_of_finished_tickets() {
        let mut board = QueueBoard::new(None);
        let mut waiting = Vec::new();
        for i in 0..50 {
            let t = ticket(i + 1, Priority::Normal, i as i64);
            board.apply(&TicketEvent::Created { ticket: t.clone() });
            let called = step(&t, TicketStatus::Called, "room1");
            board.apply(&called);
            board.apply(&step(called.ticket(), TicketStatus::Cancelled, "room1"));
            waiting.push(ticket(100 + i, Priority::Normal, 100 + i as i64));
        }
        let kept = waiting[0].clone();
        for t in &waiting {
            board.apply(&TicketEvent::Created { ticket: t.clone() });
        }
        assert_eq!(board.revisions.len(), 100);

        board.replace(vec![kept.clone()]);
        assert_eq!(board.revisions.len(), 1);
        assert_eq!(board.revision_of(kept.id), Some(kept.revision));
    }

    // Full history of a few tickets: created, then walked along a random
    // path through the lifecycle.
    fn history() -> impl Strategy<Value = (Vec<TicketEvent>, Vec<Ticket>)> {
        prop::collection::vec((0u8..3, 0u8..5), 1..8).prop_map(|specs| {
            let mut events = Vec::new();
            let mut finals = Vec::new();
            for (i, (priority, path)) in specs.into_iter().enumerate() {
                let priority = Priority::from_rank(i16::from(priority)).unwrap_or(Priority::Normal);
                let mut t = ticket(i as u64 + 1, priority, i as i64);
                events.push(TicketEvent::Created { ticket: t.clone() });
                let steps: &[TicketStatus] = match path {
                    0 => &[],
                    1 => &[TicketStatus::Called],
                    2 => &[TicketStatus::Called, TicketStatus::InService],
                    3 => &[TicketStatus::Called, TicketStatus::InService, TicketStatus::Completed],
                    _ => &[TicketStatus::Cancelled],
                };
                for to in steps {
                    let event = step(&t, *to, &format!("room{i}"));
                    t = event.ticket().clone();
                    events.push(event);
                }
                finals.push(t);
            }
            (events, finals)
        })
    }

    proptest! {
        #[test]
        fn converges_under_duplication_and_reordering(
            (events, finals) in history(),
            seed in any::<u64>(),
        ) {
            // Deliver everything twice, shuffled deterministically by `seed`.
            let mut delivery: Vec<_> = events.iter().chain(events.iter()).cloned().collect();
            let len = delivery.len();
            let mut state = seed | 1;
            for i in (1..len).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let j = (state % (i as u64 + 1)) as usize;
                delivery.swap(i, j);
            }

            let mut board = QueueBoard::new(Some(triage()));
            for event in &delivery {
                board.apply(event);
            }

            let mut expected: Vec<_> = finals.iter().filter(|t| t.status.is_active()).collect();
            expected.sort_by(|a, b| Ticket::queue_order(a, b));
            let actual = board.active();
            prop_assert_eq!(actual, expected);
        }
    }
}
