//! What the consumer decided for one delivery.

use std::time::Duration;

/// Outcome of handling one delivery; settled onto the subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerOutcome {
    /// Mail sent and the event recorded as processed.
    Processed,
    /// The event was already processed; nothing was sent.
    Duplicate,
    /// Not an event this consumer handles.
    Ignored,
    /// Make the message visible again after `delay`.
    Retry { delay: Duration, reason: String },
    /// Stop redelivering and park the message.
    DeadLetter { reason: String },
}
