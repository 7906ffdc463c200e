//! Live queue views for the clinic ticket queue.
//!
//! # Overview
//!
//! Display panels and staff consoles never mutate tickets; they keep a
//! read-side view current from the change feed:
//! - **`QueueBoard`**: pure projection over ticket events, de-duplicated by revision
//! - **`LiveQueue`**: wires a board to a [`QueueService`](clinic_queue_runtime::QueueService)
//!   (subscribe, snapshot, apply, re-snapshot on lag)
//!
//! # Building a Panel
//!
//! ```ignore
//! use clinic_queue_projections::{BoardUpdate, LiveQueue};
//!
//! let mut live = LiveQueue::connect(&service, Some("triage".parse()?)).await?;
//!
//! while let Some(update) = live.next_update().await {
//!     match update? {
//!         BoardUpdate::Applied(event) => render_change(&event),
//!         BoardUpdate::Resynced { .. } => render_all(live.board()),
//!     }
//! }
//! ```

pub mod board;
pub mod live;

pub use board::{DEFAULT_RECENT_CALLS, QueueBoard};
pub use live::{BoardUpdate, LiveQueue};
