//! Port for reading and settling outbox entries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{EventId, OutboxEntry};

use super::define_port_error;

define_port_error! {
    /// Failures raised by outbox repository adapters.
    pub enum OutboxRepositoryError {
        /// The store could not be reached or did not answer in time.
        Connection { message: String } => "outbox connection failed: {message}" [transient],
        /// Query or mutation failed during execution.
        Query { message: String } => "outbox query failed: {message}",
    }
}

/// Relay-side access to the outbox table.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Up to `limit` pending entries due at `now`, oldest first.
    ///
    /// An entry is withheld while an older pending entry for the same
    /// aggregate exists, so per-aggregate order survives backoff windows.
    async fn fetch_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, OutboxRepositoryError>;

    /// Set `published_at` if it is still null. Returns whether a row changed.
    async fn mark_published(
        &self,
        id: EventId,
        at: DateTime<Utc>,
    ) -> Result<bool, OutboxRepositoryError>;

    /// Record a failed publish attempt and when to try again.
    async fn record_failure(
        &self,
        id: EventId,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), OutboxRepositoryError>;

    /// Stop retrying an entry and keep it for operator inspection.
    async fn mark_dead_lettered(
        &self,
        id: EventId,
        at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), OutboxRepositoryError>;

    /// Most recently dead-lettered entries first.
    async fn list_dead_lettered(
        &self,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, OutboxRepositoryError>;

    /// Delete entries published before `cutoff`. Returns the number removed.
    async fn purge_published_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, OutboxRepositoryError>;
}
