//! Single-process topic with manual acknowledgement.
//!
//! Unsettled messages and settled ones are kept apart so a receive only
//! walks work that is still outstanding. Settled messages remain as the
//! dedup record until [`ChannelRetention::purge_settled_before`] drops them.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;

use crate::domain::ports::{
    ChannelError, ChannelRetention, Delivery, DeliveryReceipt, EventPublisher, EventSubscriber,
    EventSubscription, PublishError,
};
use crate::domain::{EventEnvelope, EventId};

/// Default time a delivery stays invisible while a consumer works on it.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// A message parked after its consumer gave up on it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetteredMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// The parked event.
    pub envelope: EventEnvelope,
    /// Number of times the message was handed to a consumer.
    pub deliveries: u32,
    /// Why the consumer gave up.
    pub reason: String,
}

#[derive(Debug)]
struct PendingMessage {
    seq: u64,
    topic: String,
    key: String,
    envelope: EventEnvelope,
    deliveries: u32,
    visible_at: DateTime<Utc>,
    leased_until: Option<DateTime<Utc>>,
    receipt: Option<String>,
}

impl PendingMessage {
    fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.visible_at <= now && self.leased_until.is_none_or(|until| until <= now)
    }

    fn holds(&self, topic: &str, receipt: &DeliveryReceipt) -> bool {
        self.topic == topic && self.receipt.as_deref() == Some(receipt.as_str())
    }

    fn into_settled(self, settled_at: DateTime<Utc>) -> SettledMessage {
        SettledMessage {
            seq: self.seq,
            topic: self.topic,
            envelope: self.envelope,
            settled_at,
        }
    }
}

#[derive(Debug)]
struct SettledMessage {
    seq: u64,
    topic: String,
    envelope: EventEnvelope,
    settled_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ChannelState {
    next_seq: u64,
    /// Unsettled messages in publish order.
    pending: Vec<PendingMessage>,
    settled: Vec<SettledMessage>,
    /// `(topic, event_id)` of every retained message.
    known: HashSet<(String, EventId)>,
    dead_letters: Vec<DeadLetteredMessage>,
}

impl ChannelState {
    fn leased_mut(
        &mut self,
        topic: &str,
        receipt: &DeliveryReceipt,
    ) -> Result<&mut PendingMessage, ChannelError> {
        self.pending
            .iter_mut()
            .find(|message| message.holds(topic, receipt))
            .ok_or_else(|| ChannelError::unknown_receipt(receipt.as_str()))
    }

    fn take_leased(
        &mut self,
        topic: &str,
        receipt: &DeliveryReceipt,
    ) -> Result<PendingMessage, ChannelError> {
        let position = self
            .pending
            .iter()
            .position(|message| message.holds(topic, receipt))
            .ok_or_else(|| ChannelError::unknown_receipt(receipt.as_str()))?;
        Ok(self.pending.remove(position))
    }

    /// Sequence number of the oldest deliverable message on `topic`.
    ///
    /// The first pending message of each key gates every later message with
    /// that key, whether or not it is deliverable itself.
    fn next_deliverable(&self, topic: &str, now: DateTime<Utc>) -> Option<u64> {
        let mut gated: HashSet<&str> = HashSet::new();
        for message in self.pending.iter().filter(|message| message.topic == topic) {
            if !gated.insert(message.key.as_str()) {
                continue;
            }
            if message.is_available(now) {
                return Some(message.seq);
            }
        }
        None
    }
}

struct ChannelInner {
    state: Mutex<ChannelState>,
    clock: Arc<dyn Clock>,
    lease: Duration,
}

impl ChannelInner {
    fn lock(&self) -> Result<MutexGuard<'_, ChannelState>, ChannelError> {
        self.state
            .lock()
            .map_err(|_| ChannelError::unavailable("in-memory channel lock poisoned"))
    }

    fn after(&self, delay: Duration) -> DateTime<Utc> {
        let now = self.clock.utc();
        now.checked_add_signed(TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// In-process message channel.
///
/// Messages sharing a key are delivered in publish order: a message is held
/// back while an older unsettled message with the same key exists. Each
/// topic serves a single consumer group.
#[derive(Clone)]
pub struct InMemoryEventChannel {
    inner: Arc<ChannelInner>,
}

impl InMemoryEventChannel {
    /// Create an empty channel with the default lease.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_lease(clock, DEFAULT_LEASE)
    }

    /// Create an empty channel whose deliveries stay leased for `lease`.
    pub fn with_lease(clock: Arc<dyn Clock>, lease: Duration) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                state: Mutex::new(ChannelState::default()),
                clock,
                lease,
            }),
        }
    }

    fn read<T>(&self, read: impl FnOnce(&ChannelState) -> T) -> T {
        match self.inner.state.lock() {
            Ok(state) => read(&state),
            Err(poisoned) => read(&poisoned.into_inner()),
        }
    }

    /// Every envelope still retained on `topic`, in publish order.
    pub fn published(&self, topic: &str) -> Vec<EventEnvelope> {
        self.read(|state| {
            let pending = state
                .pending
                .iter()
                .filter(|message| message.topic == topic)
                .map(|message| (message.seq, message.envelope.clone()));
            let settled = state
                .settled
                .iter()
                .filter(|message| message.topic == topic)
                .map(|message| (message.seq, message.envelope.clone()));
            let mut retained: Vec<_> = pending.chain(settled).collect();
            retained.sort_by_key(|(seq, _)| *seq);
            retained.into_iter().map(|(_, envelope)| envelope).collect()
        })
    }

    /// Messages on `topic` that are neither acknowledged nor dead-lettered.
    pub fn unsettled(&self, topic: &str) -> usize {
        self.read(|state| {
            state
                .pending
                .iter()
                .filter(|message| message.topic == topic)
                .count()
        })
    }

    /// Messages consumers gave up on, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetteredMessage> {
        self.read(|state| state.dead_letters.clone())
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventChannel {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), PublishError> {
        let now = self.inner.clock.utc();
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| PublishError::unavailable("in-memory channel lock poisoned"))?;
        if !state.known.insert((topic.to_owned(), envelope.event_id)) {
            return Ok(());
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(PendingMessage {
            seq,
            topic: topic.to_owned(),
            key: key.to_owned(),
            envelope: envelope.clone(),
            deliveries: 0,
            visible_at: now,
            leased_until: None,
            receipt: None,
        });
        Ok(())
    }
}

#[async_trait]
impl ChannelRetention for InMemoryEventChannel {
    async fn purge_settled_before(&self, cutoff: DateTime<Utc>) -> Result<u64, ChannelError> {
        let mut state = self.inner.lock()?;
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.settled)
            .into_iter()
            .partition(|message| message.settled_at < cutoff);
        state.settled = kept;
        for message in &expired {
            state
                .known
                .remove(&(message.topic.clone(), message.envelope.event_id));
        }
        Ok(u64::try_from(expired.len()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl EventSubscriber for InMemoryEventChannel {
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn EventSubscription>, ChannelError> {
        tracing::debug!(topic, group, "in-memory subscription opened");
        Ok(Box::new(InMemorySubscription {
            inner: Arc::clone(&self.inner),
            topic: topic.to_owned(),
        }))
    }
}

struct InMemorySubscription {
    inner: Arc<ChannelInner>,
    topic: String,
}

#[async_trait]
impl EventSubscription for InMemorySubscription {
    async fn receive(&self) -> Result<Option<Delivery>, ChannelError> {
        let now = self.inner.clock.utc();
        let leased_until = self.inner.after(self.inner.lease);
        let mut state = self.inner.lock()?;
        let Some(seq) = state.next_deliverable(&self.topic, now) else {
            return Ok(None);
        };
        let Some(message) = state.pending.iter_mut().find(|message| message.seq == seq) else {
            return Ok(None);
        };

        message.deliveries += 1;
        message.leased_until = Some(leased_until);
        let receipt = format!("{}:{}", message.seq, message.deliveries);
        message.receipt = Some(receipt.clone());
        Ok(Some(Delivery {
            envelope: message.envelope.clone(),
            attempt: message.deliveries,
            receipt: DeliveryReceipt::new(receipt),
        }))
    }

    async fn ack(&self, receipt: &DeliveryReceipt) -> Result<(), ChannelError> {
        let now = self.inner.clock.utc();
        let mut state = self.inner.lock()?;
        let message = state.take_leased(&self.topic, receipt)?;
        state.settled.push(message.into_settled(now));
        Ok(())
    }

    async fn retry(&self, receipt: &DeliveryReceipt, delay: Duration) -> Result<(), ChannelError> {
        let visible_at = self.inner.after(delay);
        let mut state = self.inner.lock()?;
        let message = state.leased_mut(&self.topic, receipt)?;
        message.visible_at = visible_at;
        message.leased_until = None;
        message.receipt = None;
        Ok(())
    }

    async fn dead_letter(
        &self,
        receipt: &DeliveryReceipt,
        reason: &str,
    ) -> Result<(), ChannelError> {
        let now = self.inner.clock.utc();
        let mut state = self.inner.lock()?;
        let message = state.take_leased(&self.topic, receipt)?;
        state.dead_letters.push(DeadLetteredMessage {
            topic: message.topic.clone(),
            envelope: message.envelope.clone(),
            deliveries: message.deliveries,
            reason: reason.to_owned(),
        });
        state.settled.push(message.into_settled(now));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventId;
    use crate::test_support::workers::{MutableClock, fixed_now};
    use rstest::rstest;
    use serde_json::json;
    use uuid::Uuid;

    fn envelope(aggregate_id: Uuid) -> EventEnvelope {
        EventEnvelope {
            event_id: EventId::random(),
            event_type: "UserCreated".to_owned(),
            aggregate_id,
            payload: json!({"email": "alice@x.com", "username": "alice"}),
            occurred_at: fixed_now(),
        }
    }

    fn channel() -> (Arc<MutableClock>, InMemoryEventChannel) {
        let clock = Arc::new(MutableClock::new(fixed_now()));
        let channel = InMemoryEventChannel::with_lease(clock.clone(), Duration::from_secs(10));
        (clock, channel)
    }

    #[rstest]
    #[tokio::test]
    async fn republishing_an_event_id_is_a_no_op() {
        let (_, channel) = channel();
        let message = envelope(Uuid::new_v4());
        channel.publish("t", "k", &message).await.expect("first");
        channel.publish("t", "k", &message).await.expect("second");
        assert_eq!(channel.published("t").len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn same_key_waits_for_older_message() {
        let (clock, channel) = channel();
        let key = Uuid::new_v4();
        let first = envelope(key);
        let second = envelope(key);
        channel.publish("t", "k", &first).await.expect("publish");
        channel.publish("t", "k", &second).await.expect("publish");
        let subscription = channel.subscribe("t", "g").await.expect("subscribe");

        let delivery = subscription.receive().await.expect("receive").expect("first");
        assert_eq!(delivery.envelope.event_id, first.event_id);
        subscription
            .retry(&delivery.receipt, Duration::from_secs(5))
            .await
            .expect("retry");
        assert!(subscription.receive().await.expect("receive").is_none());

        clock.advance(Duration::from_secs(5));
        let again = subscription.receive().await.expect("receive").expect("again");
        assert_eq!(again.envelope.event_id, first.event_id);
        assert_eq!(again.attempt, 2);
        subscription.ack(&again.receipt).await.expect("ack");

        let next = subscription.receive().await.expect("receive").expect("second");
        assert_eq!(next.envelope.event_id, second.event_id);
    }

    #[rstest]
    #[tokio::test]
    async fn expired_lease_redelivers() {
        let (clock, channel) = channel();
        channel
            .publish("t", "k", &envelope(Uuid::new_v4()))
            .await
            .expect("publish");
        let subscription = channel.subscribe("t", "g").await.expect("subscribe");
        let first = subscription.receive().await.expect("receive").expect("delivery");
        assert!(subscription.receive().await.expect("receive").is_none());

        clock.advance(Duration::from_secs(10));
        let second = subscription.receive().await.expect("receive").expect("redelivery");
        assert_eq!(second.attempt, 2);
        let stale = subscription.ack(&first.receipt).await;
        assert!(matches!(stale, Err(ChannelError::UnknownReceipt { .. })));
    }

    #[rstest]
    #[tokio::test]
    async fn dead_letter_parks_message() {
        let (_, channel) = channel();
        channel
            .publish("t", "k", &envelope(Uuid::new_v4()))
            .await
            .expect("publish");
        let subscription = channel.subscribe("t", "g").await.expect("subscribe");
        let delivery = subscription.receive().await.expect("receive").expect("delivery");
        subscription
            .dead_letter(&delivery.receipt, "poison")
            .await
            .expect("dead letter");

        assert_eq!(channel.unsettled("t"), 0);
        let parked = channel.dead_letters();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].reason, "poison");
    }

    async fn publish_and_ack(channel: &InMemoryEventChannel, message: &EventEnvelope) {
        channel.publish("t", "k", message).await.expect("publish");
        let subscription = channel.subscribe("t", "g").await.expect("subscribe");
        let delivery = subscription.receive().await.expect("receive").expect("delivery");
        subscription.ack(&delivery.receipt).await.expect("ack");
    }

    #[rstest]
    #[tokio::test]
    async fn settled_event_ids_stay_deduplicated_until_purged() {
        let (clock, channel) = channel();
        let message = envelope(Uuid::new_v4());
        publish_and_ack(&channel, &message).await;

        channel.publish("t", "k", &message).await.expect("republish");
        assert_eq!(channel.unsettled("t"), 0);

        clock.advance(Duration::from_secs(60));
        let purged = channel
            .purge_settled_before(clock.utc())
            .await
            .expect("purge");
        assert_eq!(purged, 1);
        assert!(channel.published("t").is_empty());

        channel.publish("t", "k", &message).await.expect("publish after purge");
        assert_eq!(channel.unsettled("t"), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn purge_keeps_recent_and_unsettled_messages() {
        let (clock, channel) = channel();
        let old = envelope(Uuid::new_v4());
        publish_and_ack(&channel, &old).await;
        let cutoff = clock.utc() + TimeDelta::seconds(1);

        clock.advance(Duration::from_secs(5));
        let recent = envelope(Uuid::new_v4());
        publish_and_ack(&channel, &recent).await;
        let waiting = envelope(Uuid::new_v4());
        channel.publish("t", "k", &waiting).await.expect("publish");

        assert_eq!(channel.purge_settled_before(cutoff).await.expect("purge"), 1);
        let retained: Vec<_> = channel
            .published("t")
            .into_iter()
            .map(|envelope| envelope.event_id)
            .collect();
        assert_eq!(retained, vec![recent.event_id, waiting.event_id]);
        assert_eq!(channel.unsettled("t"), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn a_busy_key_does_not_hold_back_other_keys() {
        let (_, channel) = channel();
        channel
            .publish("t", "a", &envelope(Uuid::new_v4()))
            .await
            .expect("publish");
        channel
            .publish("t", "a", &envelope(Uuid::new_v4()))
            .await
            .expect("publish");
        let other = envelope(Uuid::new_v4());
        channel.publish("t", "b", &other).await.expect("publish");
        let subscription = channel.subscribe("t", "g").await.expect("subscribe");

        let _leased = subscription.receive().await.expect("receive").expect("first");
        let next = subscription.receive().await.expect("receive").expect("other key");
        assert_eq!(next.envelope.event_id, other.event_id);
        assert!(subscription.receive().await.expect("receive").is_none());
    }
}
