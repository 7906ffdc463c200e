//! `PostgreSQL` ticket store for the clinic ticket queue.
//!
//! This crate implements the `TicketStore` trait from `clinic-queue-core` on
//! top of sqlx:
//!
//! - Per-sector numbering: a compare-and-swap on the `ticket_sequences` row,
//!   in the same transaction as the ticket insert, retried with a fresh read
//! - Status transitions as `UPDATE ... WHERE id = $1 AND status = $2`
//! - Room occupancy enforced by a partial unique index
//! - Connection pooling
//!
//! # Example
//!
//! ```ignore
//! use clinic_queue_postgres::PostgresTicketStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresTicketStore::connect("postgres://localhost/clinic_queue", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod schema;
mod store;

pub use store::{DEFAULT_SEQUENCE_ATTEMPTS, PostgresTicketStore};
