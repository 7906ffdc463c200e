//! `QueueService`: the one entry point for producers, consoles, and displays.
//!
//! Wraps a [`TicketStore`], a [`ChangeFeed`], and a [`DispatchEngine`]
//! behind caller-level errors. Every store call goes through the
//! [`StoreGuard`] (timeout, transient retry, circuit breaker); every committed
//! mutation is published after the store returns `Ok`.
//!
//! # Example
//!
//! ```
//! use clinic_queue_runtime::QueueService;
//! use clinic_queue_testing::{InMemoryChangeFeed, InMemoryTicketStore};
//! use clinic_queue_core::{Priority, RoomId, SectorCode};
//!
//! # tokio_test::block_on(async {
//! let service = QueueService::builder(InMemoryTicketStore::new(), InMemoryChangeFeed::new()).build();
//!
//! let ticket = service
//!     .create_ticket(SectorCode::new("triage"), Priority::Urgent, None)
//!     .await
//!     .unwrap();
//! let outcome = service
//!     .call_next(&SectorCode::new("triage"), &RoomId::new("room1"))
//!     .await
//!     .unwrap();
//! assert_eq!(outcome.ticket().map(|t| t.id), Some(ticket.id));
//! # });
//! ```

use crate::circuit_breaker::CircuitBreaker;
use crate::config::QueueConfig;
use crate::dispatch::{CallOutcome, DispatchEngine, publish_committed};
use crate::error::QueueError;
use crate::guard::StoreGuard;
use crate::metrics::QueueMetrics;
use crate::retry::RetryPolicy;
use clinic_queue_core::announce::{CallAnnouncer, TracingAnnouncer};
use clinic_queue_core::change_feed::{ChangeFeed, TicketEventStream};
use clinic_queue_core::environment::{Clock, SystemClock};
use clinic_queue_core::event::TicketEvent;
use clinic_queue_core::sector::SectorCode;
use clinic_queue_core::ticket::{NewTicket, PatientRef, Priority, RoomId, Ticket, TicketId, TicketStatus};
use clinic_queue_core::ticket_store::TicketStore;
use std::sync::Arc;
use std::time::Duration;

/// Queue facade.
///
/// Cloning is cheap; clones share the store, feed, and breaker.
#[derive(Clone)]
pub struct QueueService {
    store: Arc<dyn TicketStore>,
    feed: Arc<dyn ChangeFeed>,
    clock: Arc<dyn Clock>,
    guard: StoreGuard,
    engine: DispatchEngine,
}

impl QueueService {
    /// Start building a service over `store` and `feed`.
    #[must_use]
    pub fn builder<S, F>(store: S, feed: F) -> QueueServiceBuilder
    where
        S: TicketStore + 'static,
        F: ChangeFeed + 'static,
    {
        QueueServiceBuilder::new(Arc::new(store), Arc::new(feed))
    }

    /// Issue a new waiting ticket.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Validation`] for an unknown sector
    /// - [`QueueError::Busy`] if number allocation kept losing races
    /// - [`QueueError::Unavailable`] if the store stayed unreachable
    pub async fn create_ticket(
        &self,
        sector: SectorCode,
        priority: Priority,
        patient_ref: Option<PatientRef>,
    ) -> Result<Ticket, QueueError> {
        let request = NewTicket {
            sector,
            priority,
            patient_ref,
        };
        let now = self.clock.now();
        let ticket = self
            .guard
            .run("create", || self.store.create(request.clone(), now))
            .await?;

        tracing::info!(
            ticket_id = %ticket.id,
            number = %ticket.number,
            sector = %ticket.sector,
            priority = %ticket.priority,
            "Ticket issued"
        );
        QueueMetrics::record_created(&ticket.sector);
        publish_committed(self.feed.as_ref(), TicketEvent::Created { ticket: ticket.clone() }).await;
        Ok(ticket)
    }

    /// Fetch one ticket.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`] or [`QueueError::Unavailable`].
    pub async fn get(&self, id: TicketId) -> Result<Ticket, QueueError> {
        Ok(self.guard.run("get", || self.store.get(id)).await?)
    }

    /// Active tickets in dispatch order, optionally for one sector.
    ///
    /// # Errors
    ///
    /// [`QueueError::Unavailable`] if the store stayed unreachable.
    pub async fn list_active(&self, sector: Option<SectorCode>) -> Result<Vec<Ticket>, QueueError> {
        Ok(self
            .guard
            .run("list_active", || self.store.list_active(sector.clone()))
            .await?)
    }

    /// Most recently called tickets, newest first.
    ///
    /// # Errors
    ///
    /// [`QueueError::Unavailable`] if the store stayed unreachable.
    pub async fn recent_calls(&self, sector: Option<SectorCode>, limit: usize) -> Result<Vec<Ticket>, QueueError> {
        Ok(self
            .guard
            .run("recent_calls", || self.store.recent_calls(sector.clone(), limit))
            .await?)
    }

    /// See [`DispatchEngine::call_next`].
    ///
    /// # Errors
    ///
    /// As [`DispatchEngine::call_next`].
    pub async fn call_next(&self, sector: &SectorCode, room: &RoomId) -> Result<CallOutcome, QueueError> {
        self.engine.call_next(sector, room).await
    }

    /// See [`DispatchEngine::advance_status`].
    ///
    /// # Errors
    ///
    /// As [`DispatchEngine::advance_status`].
    pub async fn advance_status(&self, id: TicketId, to: TicketStatus) -> Result<Ticket, QueueError> {
        self.engine.advance_status(id, to).await
    }

    /// See [`DispatchEngine::cancel`].
    ///
    /// # Errors
    ///
    /// As [`DispatchEngine::cancel`].
    pub async fn cancel(&self, id: TicketId) -> Result<Ticket, QueueError> {
        self.engine.cancel(id).await
    }

    /// See [`DispatchEngine::recall`].
    ///
    /// # Errors
    ///
    /// As [`DispatchEngine::recall`].
    pub async fn recall(&self, id: TicketId) -> Result<Ticket, QueueError> {
        self.engine.recall(id).await
    }

    /// Live change stream, optionally for one sector.
    ///
    /// Pair it with [`list_active`](Self::list_active) (subscribe first) or
    /// use `LiveQueue` from `clinic-queue-projections`.
    ///
    /// # Errors
    ///
    /// [`QueueError::Unavailable`] if the feed refuses the subscription.
    pub async fn subscribe(&self, sector: Option<SectorCode>) -> Result<TicketEventStream, QueueError> {
        self.feed
            .subscribe(sector)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn TicketStore> {
        Arc::clone(&self.store)
    }

    /// The underlying change feed.
    #[must_use]
    pub fn feed(&self) -> Arc<dyn ChangeFeed> {
        Arc::clone(&self.feed)
    }

    /// The dispatch engine.
    #[must_use]
    pub const fn engine(&self) -> &DispatchEngine {
        &self.engine
    }
}

impl std::fmt::Debug for QueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueService")
            .field("guard", &self.guard)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

/// Builder for [`QueueService`].
pub struct QueueServiceBuilder {
    store: Arc<dyn TicketStore>,
    feed: Arc<dyn ChangeFeed>,
    announcer: Arc<dyn CallAnnouncer>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    retry: RetryPolicy,
    breaker: Option<CircuitBreaker>,
    advance_attempts: usize,
}

impl QueueServiceBuilder {
    /// Builder over already shared collaborators.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, feed: Arc<dyn ChangeFeed>) -> Self {
        let defaults = QueueConfig::default();
        Self {
            store,
            feed,
            announcer: Arc::new(TracingAnnouncer),
            clock: Arc::new(SystemClock),
            store_timeout: defaults.store_timeout,
            retry: defaults.retry,
            breaker: None,
            advance_attempts: defaults.advance_attempts,
        }
    }

    /// Apply timeouts, retry, breaker, and CAS budgets from configuration.
    ///
    /// Settings that belong to collaborators built before the service are
    /// not applied here: `sectors` and `sequence_attempts` go to the store,
    /// `feed_capacity` goes to the change feed.
    #[must_use]
    pub fn config(mut self, config: &QueueConfig) -> Self {
        self.store_timeout = config.store_timeout;
        self.retry = config.retry.clone();
        self.breaker = Some(CircuitBreaker::new(config.breaker.clone()));
        self.advance_attempts = config.advance_attempts;
        self
    }

    /// Use `clock` for all timestamps.
    #[must_use]
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Use a shared clock.
    #[must_use]
    pub fn shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Deliver call announcements to `announcer`.
    #[must_use]
    pub fn announcer(mut self, announcer: impl CallAnnouncer + 'static) -> Self {
        self.announcer = Arc::new(announcer);
        self
    }

    /// Per-attempt store timeout.
    #[must_use]
    pub const fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Backoff for transient store failures.
    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Compare-and-swap budget for advance and cancel.
    #[must_use]
    pub const fn advance_attempts(mut self, attempts: usize) -> Self {
        self.advance_attempts = attempts;
        self
    }

    /// Build the service.
    #[must_use]
    pub fn build(self) -> QueueService {
        let mut guard = StoreGuard::new(self.store_timeout, self.retry);
        if let Some(breaker) = self.breaker {
            guard = guard.with_breaker(breaker);
        }
        let engine = DispatchEngine::new(
            Arc::clone(&self.store),
            Arc::clone(&self.feed),
            self.announcer,
            Arc::clone(&self.clock),
            guard.clone(),
            self.advance_attempts,
        );
        QueueService {
            store: self.store,
            feed: self.feed,
            clock: self.clock,
            guard,
            engine,
        }
    }
}
