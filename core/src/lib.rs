//! # Clinic Queue Core
//!
//! Domain types and contracts for the clinic ticket queue.
//!
//! This crate provides the fundamental abstractions shared by every other crate
//! in the workspace. It performs no I/O of its own: stores and feeds are traits,
//! implemented elsewhere (in-memory in `clinic-queue-testing`, `PostgreSQL` in
//! `clinic-queue-postgres`).
//!
//! ## Core Concepts
//!
//! - **Ticket**: one queue position for one patient visit to one sector
//! - **Sector**: a service point with its own ticket numbering
//! - **`TicketStore`**: source of truth, mutated only through compare-and-swap transitions
//! - **`ChangeFeed`**: publish/subscribe of every committed mutation
//! - **`TicketEvent`**: typed change notification (`Created`, `Transitioned`, `Cancelled`)
//!
//! ## Lifecycle
//!
//! ```text
//! waiting ──► called ──► in_service ──► completed
//!    │           │            │
//!    └───────────┴────────────┴──────► cancelled
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use clinic_queue_core::*;
//!
//! async fn enqueue(store: &dyn TicketStore, clock: &dyn Clock) -> Result<Ticket, TicketStoreError> {
//!     store
//!         .create(NewTicket::new(SectorCode::new("triage"), Priority::Urgent), clock.now())
//!         .await
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

/// Call announcement hook fired on dispatch and recall
pub mod announce;

/// Change feed trait for live distribution of committed mutations
pub mod change_feed;

/// Typed change events
pub mod event;

/// Sector codes and the sector catalog
pub mod sector;

/// Ticket numbering and per-sector sequence allocation
pub mod sequence;

/// Ticket entity, status lifecycle, and value types
pub mod ticket;

/// Ticket store trait and its error taxonomy
pub mod ticket_store;

/// Environment module - Dependency injection traits
///
/// All time-dependent code reads the clock through [`Clock`](environment::Clock)
/// so tests can pin or step time deterministically.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use clinic_queue_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use announce::{Announcement, AnnouncementKind, CallAnnouncer, TracingAnnouncer};
pub use change_feed::{ChangeFeed, ChangeFeedError, TicketEventStream};
pub use environment::{Clock, SystemClock};
pub use event::{EventError, TicketEvent};
pub use sector::{CatalogError, SectorCatalog, SectorCode, SectorInfo};
pub use sequence::{AllocationError, SectorSequences, TicketNumber, allocate_with_retry};
pub use ticket::{
    NewTicket, ParseValueError, PatientRef, Priority, RoomId, Ticket, TicketId, TicketStatus,
    TransitionFields,
};
pub use ticket_store::{StoreFuture, TicketStore, TicketStoreError, TransientKind};
