//! In-memory [`ChangeFeed`] backed by `tokio::sync::broadcast`.
//!
//! Every subscriber gets its own bounded buffer of `capacity` events. A
//! subscriber that falls further behind sees one
//! [`ChangeFeedError::Lagged`] item and then continues with the newest
//! events; it is expected to re-snapshot.
//!
//! Tests can also:
//! - inspect the most recent published events ([`InMemoryChangeFeed::published`])
//! - re-deliver arbitrary events to simulate duplicates or reordering
//!   ([`InMemoryChangeFeed::inject`])
//! - make the next publishes fail ([`InMemoryChangeFeed::fail_next_publishes`])
//! - shut the feed down ([`InMemoryChangeFeed::close`])

use clinic_queue_core::change_feed::{ChangeFeed, ChangeFeedError, TicketEventStream};
use clinic_queue_core::event::TicketEvent;
use clinic_queue_core::sector::SectorCode;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

/// Per-subscriber buffer used by [`InMemoryChangeFeed::new`].
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Published events kept for inspection by [`InMemoryChangeFeed::new`].
pub const DEFAULT_HISTORY_LIMIT: usize = 4096;

#[derive(Debug)]
struct FeedInner {
    sender: Mutex<Option<broadcast::Sender<TicketEvent>>>,
    history: Mutex<VecDeque<TicketEvent>>,
    history_limit: usize,
    published_total: AtomicUsize,
    failures_pending: AtomicUsize,
}

/// Broadcast change feed for a single process.
///
/// Clones share the same channel.
#[derive(Clone, Debug)]
pub struct InMemoryChangeFeed {
    inner: Arc<FeedInner>,
}

impl InMemoryChangeFeed {
    /// Feed with [`DEFAULT_FEED_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Feed with a custom per-subscriber buffer.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_limits(capacity, DEFAULT_HISTORY_LIMIT)
    }

    /// Feed with a custom per-subscriber buffer that keeps at most
    /// `history_limit` published events for [`published`](Self::published).
    ///
    /// Older events are dropped from the history first; a limit of zero keeps
    /// none. [`published_count`](Self::published_count) is unaffected.
    #[must_use]
    pub fn with_limits(capacity: usize, history_limit: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(FeedInner {
                sender: Mutex::new(Some(sender)),
                history: Mutex::new(VecDeque::with_capacity(history_limit.min(DEFAULT_HISTORY_LIMIT))),
                history_limit,
                published_total: AtomicUsize::new(0),
                failures_pending: AtomicUsize::new(0),
            }),
        }
    }

    /// The most recent successfully published events, oldest first.
    ///
    /// Holds at most the configured history limit.
    #[must_use]
    pub fn published(&self) -> Vec<TicketEvent> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Number of events successfully published since the feed was created.
    #[must_use]
    pub fn published_count(&self) -> usize {
        self.inner.published_total.load(Ordering::SeqCst)
    }

    /// Deliver `event` to current subscribers without recording it.
    ///
    /// Used to simulate at-least-once redelivery and out-of-order arrival.
    pub fn inject(&self, event: TicketEvent) {
        if let Some(sender) = self.sender() {
            let _ = sender.send(event);
        }
    }

    /// Make the next `count` publishes fail with [`ChangeFeedError::PublishFailed`].
    pub fn fail_next_publishes(&self, count: usize) {
        self.inner.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender().map_or(0, |s| s.receiver_count())
    }

    /// Shut the feed down; open streams end and later calls fail with `Closed`.
    pub fn close(&self) {
        self.inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn sender(&self) -> Option<broadcast::Sender<TicketEvent>> {
        self.inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_injected_failure(&self) -> bool {
        self.inner
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed for InMemoryChangeFeed {
    fn publish(
        &self,
        event: TicketEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChangeFeedError>> + Send + '_>> {
        Box::pin(async move {
            if self.take_injected_failure() {
                return Err(ChangeFeedError::PublishFailed(format!(
                    "injected failure for {}",
                    event.event_type()
                )));
            }

            let sender = self.sender().ok_or(ChangeFeedError::Closed)?;
            self.inner.published_total.fetch_add(1, Ordering::SeqCst);
            if self.inner.history_limit > 0 {
                let mut history = self.inner.history.lock().unwrap_or_else(PoisonError::into_inner);
                if history.len() == self.inner.history_limit {
                    history.pop_front();
                }
                history.push_back(event.clone());
            }

            // No subscribers is not an error: nobody is watching yet.
            if let Ok(receivers) = sender.send(event) {
                tracing::trace!(receivers, "Change event broadcast");
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        sector: Option<SectorCode>,
    ) -> Pin<Box<dyn Future<Output = Result<TicketEventStream, ChangeFeedError>> + Send + '_>> {
        Box::pin(async move {
            let mut rx = self.sender().ok_or(ChangeFeedError::Closed)?.subscribe();

            let stream = async_stream::stream! {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            if sector.as_ref().is_none_or(|s| event.sector() == s) {
                                yield Ok(event);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Change feed subscriber lagged");
                            yield Err(ChangeFeedError::Lagged(skipped));
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            };

            Ok(Box::pin(stream) as TicketEventStream)
        })
    }
}
