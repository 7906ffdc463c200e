//! Fault-injecting [`TicketStore`] wrapper.
//!
//! Wraps any store and, according to a [`FaultPlan`], fails calls with
//! transient errors, forces compare-and-swap conflicts, drops the
//! acknowledgement of committed transitions, or delays every call.
//! Used to exercise retry, timeout, and conflict-handling paths without a
//! real database.

use clinic_queue_core::sector::SectorCode;
use clinic_queue_core::ticket::{NewTicket, Ticket, TicketId, TicketStatus, TransitionFields};
use clinic_queue_core::ticket_store::{StoreFuture, TicketStore, TicketStoreError, TransientKind};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What to inject. Counters are consumed one per affected call.
#[derive(Debug, Default)]
pub struct FaultPlan {
    /// Fail this many upcoming calls (any method) with a transient error
    pub transient_failures: AtomicUsize,
    /// Turn this many upcoming `transition` calls into conflicts
    pub forced_conflicts: AtomicUsize,
    /// Commit this many upcoming `transition` calls, then report a transient error
    pub lost_acks: AtomicUsize,
    /// Sleep this long before every call
    pub latency: Option<Duration>,
}

impl FaultPlan {
    /// Plan that injects nothing.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls with a transient error.
    #[must_use]
    pub fn transient(count: usize) -> Self {
        Self {
            transient_failures: AtomicUsize::new(count),
            ..Self::default()
        }
    }

    /// Force the next `count` transitions to lose their compare-and-swap.
    #[must_use]
    pub fn conflicts(count: usize) -> Self {
        Self {
            forced_conflicts: AtomicUsize::new(count),
            ..Self::default()
        }
    }

    /// Let the next `count` transitions commit but fail their reply, as a
    /// connection reset after `COMMIT` would.
    #[must_use]
    pub fn lost_acks(count: usize) -> Self {
        Self {
            lost_acks: AtomicUsize::new(count),
            ..Self::default()
        }
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub fn slow(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }
}

fn consume(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Store wrapper that misbehaves on purpose.
#[derive(Clone, Debug)]
pub struct FlakyTicketStore<S> {
    inner: S,
    plan: Arc<FaultPlan>,
    calls: Arc<AtomicUsize>,
}

impl<S: TicketStore> FlakyTicketStore<S> {
    /// Wrap `inner` with `plan`.
    #[must_use]
    pub fn new(inner: S, plan: FaultPlan) -> Self {
        Self {
            inner,
            plan: Arc::new(plan),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The wrapped store.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Calls received so far, including failed ones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Add more transient failures to the plan.
    pub fn inject_transient(&self, count: usize) {
        self.plan.transient_failures.fetch_add(count, Ordering::SeqCst);
    }

    /// Add more forced conflicts to the plan.
    pub fn inject_conflicts(&self, count: usize) {
        self.plan.forced_conflicts.fetch_add(count, Ordering::SeqCst);
    }

    /// Add more lost acknowledgements to the plan.
    pub fn inject_lost_acks(&self, count: usize) {
        self.plan.lost_acks.fetch_add(count, Ordering::SeqCst);
    }

    async fn before_call(&self, op: &'static str) -> Result<(), TicketStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.plan.latency {
            tokio::time::sleep(latency).await;
        }
        if consume(&self.plan.transient_failures) {
            tracing::debug!(op, "Injecting transient store failure");
            return Err(TicketStoreError::Transient {
                kind: TransientKind::Database,
                message: format!("injected failure in {op}"),
            });
        }
        Ok(())
    }
}

impl<S: TicketStore> TicketStore for FlakyTicketStore<S> {
    fn create(&self, request: NewTicket, now: DateTime<Utc>) -> StoreFuture<'_, Ticket> {
        Box::pin(async move {
            self.before_call("create").await?;
            self.inner.create(request, now).await
        })
    }

    fn get(&self, id: TicketId) -> StoreFuture<'_, Ticket> {
        Box::pin(async move {
            self.before_call("get").await?;
            self.inner.get(id).await
        })
    }

    fn list_active(&self, sector: Option<SectorCode>) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            self.before_call("list_active").await?;
            self.inner.list_active(sector).await
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
            self.before_call("transition").await?;
            if consume(&self.plan.forced_conflicts) {
                tracing::debug!(ticket_id = %id, "Injecting transition conflict");
                return Err(TicketStoreError::Conflict {
                    id,
                    expected: from,
                    actual: to,
                });
            }
            let ticket = self.inner.transition(id, from, to, fields).await?;
            if consume(&self.plan.lost_acks) {
                tracing::debug!(ticket_id = %id, "Dropping acknowledgement of committed transition");
                return Err(TicketStoreError::Transient {
                    kind: TransientKind::Database,
                    message: "connection reset after commit".to_string(),
                });
            }
            Ok(ticket)
        })
    }

    fn recent_calls(&self, sector: Option<SectorCode>, limit: usize) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            self.before_call("recent_calls").await?;
            self.inner.recent_calls(sector, limit).await
        })
    }
}
