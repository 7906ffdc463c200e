//! Announcer that remembers what it was asked to announce.

use clinic_queue_core::announce::{Announcement, CallAnnouncer};
use std::sync::{Arc, Mutex, PoisonError};

/// Captures every [`Announcement`] for later assertions.
///
/// Clones share the same record.
#[derive(Clone, Debug, Default)]
pub struct RecordingAnnouncer {
    announcements: Arc<Mutex<Vec<Announcement>>>,
}

impl RecordingAnnouncer {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything announced so far, oldest first.
    #[must_use]
    pub fn announcements(&self) -> Vec<Announcement> {
        self.announcements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of announcements so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.announcements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The most recent announcement.
    #[must_use]
    pub fn last(&self) -> Option<Announcement> {
        self.announcements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl CallAnnouncer for RecordingAnnouncer {
    fn announce(&self, announcement: &Announcement) {
        self.announcements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(announcement.clone());
    }
}
