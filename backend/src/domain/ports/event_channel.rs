//! Message channel ports: a producer side for the relay and a manually
//! acknowledged subscription for consumers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::EventEnvelope;

use super::define_port_error;

define_port_error! {
    /// Failures raised while publishing an envelope.
    pub enum PublishError {
        /// The channel could not be reached or did not acknowledge in time.
        Unavailable { message: String } => "event channel unavailable: {message}" [transient],
        /// The channel refused the message; retrying will not help.
        Rejected { message: String } => "event channel rejected message: {message}",
    }
}

define_port_error! {
    /// Failures raised by subscription operations.
    pub enum ChannelError {
        /// The channel could not be reached or did not answer in time.
        Unavailable { message: String } => "event channel unavailable: {message}" [transient],
        /// A stored message could not be decoded.
        Malformed { message: String } => "event channel message malformed: {message}",
        /// The receipt does not match an in-flight delivery.
        UnknownReceipt { receipt: String } => "unknown delivery receipt: {receipt}",
    }
}

/// Opaque handle naming one in-flight delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryReceipt(String);

impl DeliveryReceipt {
    /// Wrap an adapter-specific delivery handle.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the adapter-specific handle.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// One delivery of an envelope to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The published event.
    pub envelope: EventEnvelope,
    /// 1-based count of deliveries of this message, including this one.
    pub attempt: u32,
    /// Handle for settling this delivery.
    pub receipt: DeliveryReceipt,
}

/// Producer side of the channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `envelope` to `topic` with `key` as the partition/order key.
    ///
    /// Returns once the channel has durably accepted the message. Publishing
    /// an `event_id` the topic already holds is acknowledged without storing
    /// a second copy.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), PublishError>;
}

/// Housekeeping for messages that no consumer will see again.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelRetention: Send + Sync {
    /// Delete messages acknowledged or dead-lettered before `cutoff` and
    /// return how many were removed.
    ///
    /// A purged message no longer deduplicates a republish of its
    /// `event_id`, so `cutoff` must trail the producer's own retention.
    async fn purge_settled_before(&self, cutoff: DateTime<Utc>) -> Result<u64, ChannelError>;
}

/// Consumer side of the channel.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Join `group` on `topic`.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn EventSubscription>, ChannelError>;
}

/// A live subscription. Nothing is acknowledged implicitly: a delivery that
/// is neither acked, retried, nor dead-lettered becomes visible again once
/// its lease lapses.
#[async_trait]
pub trait EventSubscription: Send + Sync {
    /// Next visible delivery, or `None` when nothing is ready.
    async fn receive(&self) -> Result<Option<Delivery>, ChannelError>;

    /// Processing finished; never deliver this message again.
    async fn ack(&self, receipt: &DeliveryReceipt) -> Result<(), ChannelError>;

    /// Make the message visible again after `delay`.
    async fn retry(&self, receipt: &DeliveryReceipt, delay: Duration) -> Result<(), ChannelError>;

    /// Park the message permanently with `reason`.
    async fn dead_letter(&self, receipt: &DeliveryReceipt, reason: &str)
    -> Result<(), ChannelError>;
}
