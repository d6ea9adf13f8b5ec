//! Port for the processed-event ledger that makes notification idempotent.

use async_trait::async_trait;

use crate::domain::{EventId, ValidationToken};

use super::define_port_error;

define_port_error! {
    /// Failures raised by ledger adapters.
    pub enum LedgerError {
        /// The store could not be reached or did not answer in time.
        Connection { message: String } => "notification ledger connection failed: {message}" [transient],
        /// Query or mutation failed during execution.
        Query { message: String } => "notification ledger query failed: {message}" [transient],
    }
}

/// Result of trying to claim an event for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller owns the event; the token was stored with the claim.
    Claimed,
    /// Another delivery already claimed the event.
    AlreadyProcessed,
}

/// Shared, constraint-backed record of which events have been handled.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    /// Atomically insert `event_id` if absent and, only when it was absent,
    /// persist `token` in the same transaction.
    async fn claim(
        &self,
        event_id: EventId,
        event_type: &str,
        token: &ValidationToken,
    ) -> Result<ClaimOutcome, LedgerError>;

    /// Undo a claim and its token so a redelivery can try again.
    async fn release(&self, event_id: EventId) -> Result<(), LedgerError>;
}
