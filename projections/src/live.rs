//! `LiveQueue`: a [`QueueBoard`] kept current from a [`QueueService`].
//!
//! Connecting follows a fixed order so no change falls in a gap:
//!
//! 1. subscribe to the change feed
//! 2. read the `list_active` and `recent_calls` snapshots
//! 3. apply streamed events, dropping anything the snapshot already covers
//!
//! When the feed reports that this subscriber lagged, the board is rebuilt
//! from a fresh snapshot and streaming continues.

use crate::board::QueueBoard;
use clinic_queue_core::change_feed::{ChangeFeedError, TicketEventStream};
use clinic_queue_core::event::TicketEvent;
use clinic_queue_core::sector::SectorCode;
use clinic_queue_runtime::{QueueError, QueueService};
use futures::StreamExt;

/// What changed on the board after [`LiveQueue::next_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardUpdate {
    /// One event was applied.
    Applied(TicketEvent),
    /// The subscriber lagged and the board was rebuilt from the store.
    Resynced {
        /// Events the feed dropped for this subscriber
        missed: u64,
    },
}

/// Board plus the subscription that feeds it.
pub struct LiveQueue {
    service: QueueService,
    stream: TicketEventStream,
    board: QueueBoard,
    resyncs: u64,
}

impl LiveQueue {
    /// Subscribe to `sector` (or all sectors) and load the initial snapshot.
    ///
    /// # Errors
    ///
    /// [`QueueError::Unavailable`] if the feed or the store cannot be reached.
    pub async fn connect(service: &QueueService, sector: Option<SectorCode>) -> Result<Self, QueueError> {
        Self::connect_with_board(service, QueueBoard::new(sector)).await
    }

    /// Like [`connect`](Self::connect), starting from a configured board.
    ///
    /// # Errors
    ///
    /// [`QueueError::Unavailable`] if the feed or the store cannot be reached.
    pub async fn connect_with_board(service: &QueueService, board: QueueBoard) -> Result<Self, QueueError> {
        let stream = service.subscribe(board.sector().cloned()).await?;
        let mut live = Self {
            service: service.clone(),
            stream,
            board,
            resyncs: 0,
        };
        live.load_snapshot().await?;

        tracing::info!(
            sector = ?live.board.sector().map(SectorCode::as_str),
            active = live.board.len(),
            "Live queue connected"
        );
        Ok(live)
    }

    /// The current view.
    #[must_use]
    pub const fn board(&self) -> &QueueBoard {
        &self.board
    }

    /// Consume the live queue, keeping the board.
    #[must_use]
    pub fn into_board(self) -> QueueBoard {
        self.board
    }

    /// Number of snapshot reloads caused by lag.
    #[must_use]
    pub const fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Wait for the next change that affects the board.
    ///
    /// Duplicate and stale events are skipped silently. Returns `None` once
    /// the feed is closed.
    ///
    /// # Errors
    ///
    /// [`QueueError::Unavailable`] if the feed fails or a resync cannot read the store.
    pub async fn next_update(&mut self) -> Option<Result<BoardUpdate, QueueError>> {
        loop {
            match self.stream.next().await? {
                Ok(event) => {
                    if self.board.apply(&event) {
                        return Some(Ok(BoardUpdate::Applied(event)));
                    }
                }
                Err(ChangeFeedError::Lagged(missed)) => {
                    tracing::warn!(missed, "Live queue lagged, reloading snapshot");
                    return Some(self.resync().await.map(|()| BoardUpdate::Resynced { missed }));
                }
                Err(ChangeFeedError::Closed) => return None,
                Err(e) => return Some(Err(QueueError::Unavailable(e.to_string()))),
            }
        }
    }

    /// Rebuild the board from a fresh store snapshot.
    ///
    /// # Errors
    ///
    /// [`QueueError::Unavailable`] if the store cannot be reached.
    pub async fn resync(&mut self) -> Result<(), QueueError> {
        self.load_snapshot().await?;
        self.resyncs += 1;
        Ok(())
    }

    async fn load_snapshot(&mut self) -> Result<(), QueueError> {
        let sector = self.board.sector().cloned();
        let active = self.service.list_active(sector.clone()).await?;
        let recent = self.service.recent_calls(sector, self.board.recent_limit()).await?;
        self.board.replace(active);
        self.board.replace_recent(recent);
        Ok(())
    }
}

impl std::fmt::Debug for LiveQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQueue")
            .field("board", &self.board)
            .field("resyncs", &self.resyncs)
            .finish_non_exhaustive()
    }
}
