//! Per-sector ticket numbering.
//!
//! Numbers are strictly increasing within a sector and unique under
//! concurrent callers. Gaps are allowed (an allocation whose insert fails is
//! simply skipped). Allocation always happens inside the same atomic operation
//! that inserts the ticket:
//!
//! - stores that hold a write lock use [`SectorSequences::next`] under it;
//! - stores that allocate optimistically (read the high-water mark, then
//!   conditionally bump it) wrap each attempt in [`allocate_with_retry`],
//!   which re-reads on conflict and gives up after a bounded number of tries.

use crate::sector::SectorCode;
use crate::ticket::ParseValueError;
use crate::ticket_store::{TicketStoreError, TransientKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;

/// Display number of a ticket: sector prefix plus sequence, e.g. `TRI-007`.
///
/// # Examples
///
/// ```
/// use clinic_queue_core::sequence::TicketNumber;
///
/// let number = TicketNumber::new("TRI", 7);
/// assert_eq!(number.to_string(), "TRI-007");
/// assert_eq!("TRI-007".parse::<TicketNumber>().unwrap(), number);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketNumber {
    prefix: String,
    seq: u64,
}

impl TicketNumber {
    /// Create a ticket number.
    #[must_use]
    pub fn new(prefix: impl Into<String>, seq: u64) -> Self {
        Self {
            prefix: prefix.into(),
            seq,
        }
    }

    /// The sector prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The sequence value within the sector.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:03}", self.prefix, self.seq)
    }
}

impl FromStr for TicketNumber {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, seq) = s
            .trim()
            .rsplit_once('-')
            .ok_or_else(|| ParseValueError::new("ticket number", s))?;
        let seq = seq
            .parse()
            .map_err(|_| ParseValueError::new("ticket number", s))?;
        if prefix.is_empty() {
            return Err(ParseValueError::new("ticket number", s));
        }
        Ok(Self::new(prefix, seq))
    }
}

/// High-water marks of issued numbers, one per sector.
///
/// Not synchronized; the owning store provides atomicity.
#[derive(Debug, Clone, Default)]
pub struct SectorSequences {
    last_issued: HashMap<SectorCode, u64>,
}

impl SectorSequences {
    /// Empty set of sequences (every sector starts at 1).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next number for `sector`.
    pub fn next(&mut self, sector: &SectorCode) -> u64 {
        let last = self.last_issued.entry(sector.clone()).or_insert(0);
        *last += 1;
        *last
    }

    /// The last number issued for `sector`, if any.
    #[must_use]
    pub fn last_issued(&self, sector: &SectorCode) -> Option<u64> {
        self.last_issued.get(sector).copied()
    }

    /// Raise the high-water mark to at least `seq` (used when seeding from storage).
    pub fn observe(&mut self, sector: &SectorCode, seq: u64) {
        let last = self.last_issued.entry(sector.clone()).or_insert(0);
        *last = (*last).max(seq);
    }
}

/// Outcome of one optimistic allocation attempt.
#[derive(Debug)]
pub enum AllocationError {
    /// Another writer moved the high-water mark; retry with a fresh read
    Conflict,
    /// Any other store failure; not retried here
    Store(TicketStoreError),
}

impl From<TicketStoreError> for AllocationError {
    fn from(err: TicketStoreError) -> Self {
        Self::Store(err)
    }
}

/// Run an optimistic allocate-and-insert attempt up to `max_attempts` times.
///
/// The closure receives the zero-based attempt index and must perform a fresh
/// read every time. Exhausting the budget yields
/// [`TicketStoreError::Transient`] with [`TransientKind::SequenceContention`].
///
/// # Errors
///
/// Propagates [`AllocationError::Store`] unchanged and maps an exhausted
/// budget to a transient error.
///
/// # Examples
///
/// ```
/// use clinic_queue_core::sector::SectorCode;
/// use clinic_queue_core::sequence::{AllocationError, allocate_with_retry};
///
/// # tokio_test::block_on(async {
/// let seq = allocate_with_retry(&SectorCode::new("triage"), 3, |attempt| async move {
///     if attempt == 0 { Err(AllocationError::Conflict) } else { Ok(42_u64) }
/// })
/// .await
/// .unwrap();
/// assert_eq!(seq, 42);
/// # });
/// ```
pub async fn allocate_with_retry<T, F, Fut>(
    sector: &SectorCode,
    max_attempts: usize,
    mut attempt: F,
) -> Result<T, TicketStoreError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, AllocationError>>,
{
    let max_attempts = max_attempts.max(1);
    for index in 0..max_attempts {
        match attempt(index).await {
            Ok(value) => return Ok(value),
            Err(AllocationError::Store(err)) => return Err(err),
            Err(AllocationError::Conflict) => {
                tracing::debug!(
                    sector = %sector,
                    attempt = index + 1,
                    max_attempts,
                    "Sequence allocation conflict, retrying with fresh read"
                );
            }
        }
    }

    tracing::warn!(sector = %sector, max_attempts, "Sequence allocation retries exhausted");
    Err(TicketStoreError::Transient {
        kind: TransientKind::SequenceContention,
        message: format!("could not allocate a ticket number for {sector} after {max_attempts} attempts"),
    })
}
