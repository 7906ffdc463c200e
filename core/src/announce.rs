//! Call announcements: the hook fired when a ticket is called into a room.
//!
//! Panels typically turn an [`Announcement`] into a chime plus a flashing
//! number. Producing the sound or picture is outside this crate; it only
//! defines the hook and a logging default.

use crate::sector::SectorCode;
use crate::sequence::TicketNumber;
use crate::ticket::{RoomId, Ticket, TicketId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why the announcement fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnouncementKind {
    /// The ticket was just dispatched
    First,
    /// Staff asked to call the same ticket again
    Recall,
}

/// One "ticket X, please go to room Y" announcement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Called ticket
    pub ticket_id: TicketId,
    /// Number shown on the panel
    pub number: TicketNumber,
    /// Sector of the ticket
    pub sector: SectorCode,
    /// Room the patient should go to
    pub room: RoomId,
    /// First call or recall
    pub kind: AnnouncementKind,
    /// When the announcement fired
    pub at: DateTime<Utc>,
}

impl Announcement {
    /// Build an announcement for a ticket holding a room.
    ///
    /// Returns `None` if the ticket has no room (not called).
    #[must_use]
    pub fn for_ticket(ticket: &Ticket, kind: AnnouncementKind, at: DateTime<Utc>) -> Option<Self> {
        let room = ticket.room.clone()?;
        Some(Self {
            ticket_id: ticket.id,
            number: ticket.number.clone(),
            sector: ticket.sector.clone(),
            room,
            kind,
            at,
        })
    }
}

/// Receiver of call announcements.
///
/// Called synchronously right after the dispatch commits; implementations
/// must not block (hand off to a channel if the work is slow).
pub trait CallAnnouncer: Send + Sync {
    /// Deliver one announcement.
    fn announce(&self, announcement: &Announcement);
}

/// Announcer that only writes a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAnnouncer;

impl CallAnnouncer for TracingAnnouncer {
    fn announce(&self, announcement: &Announcement) {
        tracing::info!(
            ticket_id = %announcement.ticket_id,
            number = %announcement.number,
            sector = %announcement.sector,
            room = %announcement.room,
            kind = ?announcement.kind,
            "Calling ticket"
        );
    }
}
