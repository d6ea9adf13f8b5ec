//! Unit tests for the `UserCreated` consumer.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use rstest::{fixture, rstest};
use serde_json::json;
use uuid::Uuid;

use super::{ConsumerConfig, ConsumerOutcome, NotificationConsumerPorts, UserCreatedConsumer};
use crate::domain::ports::{
    Delivery, DeliveryReceipt, EventPublisher, EventSubscriber, LedgerError, MailTransport,
    MockNotificationLedger, NotificationError,
};
use crate::domain::{
    EmailAddress, EventEnvelope, EventId, RetryPolicy, USER_CREATED_EVENT, WorkerRuntime,
};
use crate::outbound::memory::{InMemoryEventChannel, InMemoryStore};
use crate::test_support::doubles::{RecordingMailer, StaticTemplates};
use crate::test_support::workers::{ImmediateSleeper, MutableClock, NoJitter, fixed_now};

struct Harness {
    store: Arc<InMemoryStore>,
    mailer: Arc<RecordingMailer>,
    clock: Arc<MutableClock>,
    consumer: UserCreatedConsumer,
}

fn config() -> ConsumerConfig {
    ConsumerConfig {
        max_deliveries: 3,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        },
        ..ConsumerConfig::default()
    }
}

fn runtime() -> WorkerRuntime {
    WorkerRuntime {
        sleeper: Arc::new(ImmediateSleeper),
        jitter: Arc::new(NoJitter),
    }
}

fn harness_with(mailer: RecordingMailer, templates: StaticTemplates) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let mailer = Arc::new(mailer);
    let clock = Arc::new(MutableClock::new(fixed_now()));
    let consumer = UserCreatedConsumer::with_runtime(
        NotificationConsumerPorts::new(store.clone(), Arc::new(templates), mailer.clone()),
        clock.clone(),
        runtime(),
        config(),
    );
    Harness {
        store,
        mailer,
        clock,
        consumer,
    }
}

#[fixture]
fn harness() -> Harness {
    harness_with(RecordingMailer::default(), StaticTemplates::activation())
}

fn user_created() -> EventEnvelope {
    EventEnvelope {
        event_id: EventId::random(),
        event_type: USER_CREATED_EVENT.to_owned(),
        aggregate_id: Uuid::new_v4(),
        payload: json!({"email": "alice@x.com", "username": "alice"}),
        occurred_at: fixed_now(),
    }
}

fn delivery(envelope: EventEnvelope, attempt: u32) -> Delivery {
    Delivery {
        envelope,
        attempt,
        receipt: DeliveryReceipt::new(format!("receipt-{attempt}")),
    }
}

#[rstest]
#[tokio::test]
async fn sends_activation_mail_with_stored_token(harness: Harness) {
    let envelope = user_created();

    let outcome = harness.consumer.handle(&delivery(envelope.clone(), 1)).await;

    assert_eq!(outcome, ConsumerOutcome::Processed);
    let tokens = harness.store.validation_tokens();
    assert_eq!(tokens.len(), 1);
    let token = &tokens[0];
    assert_eq!(token.event_id, envelope.event_id);
    assert_eq!(token.email.as_ref(), "alice@x.com");
    assert_eq!(token.expires_at - token.created_at, TimeDelta::hours(24));

    let sent = harness.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to[0].as_ref(), "alice@x.com");
    assert_eq!(sent[0].subject, "Account Activation - No Reply");
    assert_eq!(
        sent[0].html_body,
        format!("<p>Hello alice</p><p>Token: {}</p>", token.token)
    );
    assert_eq!(harness.store.processed_events(), vec![envelope.event_id]);
}

#[rstest]
#[tokio::test]
async fn redelivered_event_is_not_sent_twice(harness: Harness) {
    let envelope = user_created();

    let first = harness.consumer.handle(&delivery(envelope.clone(), 1)).await;
    let second = harness.consumer.handle(&delivery(envelope, 2)).await;

    assert_eq!(first, ConsumerOutcome::Processed);
    assert_eq!(second, ConsumerOutcome::Duplicate);
    assert_eq!(harness.mailer.sent().len(), 1);
    assert_eq!(harness.store.validation_tokens().len(), 1);
}

/// Accepts every mail but only answers after `delay`.
struct SlowMailer {
    delay: Duration,
    sends: AtomicUsize,
}

impl SlowMailer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            sends: AtomicUsize::new(0),
        }
    }

    fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailTransport for SlowMailer {
    async fn send(
        &self,
        _to: &[EmailAddress],
        _subject: &str,
        _html_body: &str,
    ) -> Result<(), NotificationError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

fn slow_consumer(
    store: Arc<InMemoryStore>,
    mailer: Arc<SlowMailer>,
    call_timeout: Duration,
    send_timeout: Duration,
) -> UserCreatedConsumer {
    UserCreatedConsumer::with_runtime(
        NotificationConsumerPorts::new(
            store,
            Arc::new(StaticTemplates::activation()),
            mailer,
        ),
        Arc::new(MutableClock::new(fixed_now())),
        runtime(),
        ConsumerConfig {
            call_timeout,
            send_timeout,
            ..config()
        },
    )
}

#[rstest]
#[tokio::test]
async fn slow_send_is_bounded_by_the_send_timeout_not_the_call_timeout() {
    let store = Arc::new(InMemoryStore::new());
    let mailer = Arc::new(SlowMailer::new(Duration::from_millis(200)));
    let consumer = slow_consumer(
        store.clone(),
        mailer.clone(),
        Duration::from_millis(50),
        Duration::from_secs(5),
    );

    let outcome = consumer.handle(&delivery(user_created(), 1)).await;

    assert_eq!(outcome, ConsumerOutcome::Processed);
    assert_eq!(mailer.sends(), 1);
    assert_eq!(store.validation_tokens().len(), 1);
}

#[rstest]
#[tokio::test]
async fn send_that_times_out_keeps_its_claim_and_is_never_resent() {
    let store = Arc::new(InMemoryStore::new());
    let mailer = Arc::new(SlowMailer::new(Duration::from_millis(200)));
    let consumer = slow_consumer(
        store.clone(),
        mailer.clone(),
        Duration::from_secs(1),
        Duration::from_millis(50),
    );
    let envelope = user_created();

    let first = consumer.handle(&delivery(envelope.clone(), 1)).await;
    let second = consumer.handle(&delivery(envelope.clone(), 2)).await;

    assert!(
        matches!(&first, ConsumerOutcome::DeadLetter { reason } if reason.contains("unconfirmed")),
        "unexpected outcome {first:?}"
    );
    assert_eq!(second, ConsumerOutcome::Duplicate);
    assert_eq!(mailer.sends(), 1);
    assert_eq!(store.processed_events(), vec![envelope.event_id]);
    assert_eq!(store.validation_tokens().len(), 1);
}

#[rstest]
#[tokio::test]
async fn unconfirmed_transport_error_keeps_claim() {
    let harness = harness_with(
        RecordingMailer::scripted(vec![Err(NotificationError::unconfirmed(
            "relay timed out",
        ))]),
        StaticTemplates::activation(),
    );
    let envelope = user_created();

    let first = harness.consumer.handle(&delivery(envelope.clone(), 1)).await;
    let second = harness.consumer.handle(&delivery(envelope, 2)).await;

    assert!(matches!(first, ConsumerOutcome::DeadLetter { .. }));
    assert_eq!(second, ConsumerOutcome::Duplicate);
    assert!(harness.mailer.sent().is_empty());
    assert_eq!(harness.store.validation_tokens().len(), 1);
}

#[rstest]
#[tokio::test]
async fn other_event_types_are_ignored(harness: Harness) {
    let mut envelope = user_created();
    envelope.event_type = "UserDeleted".to_owned();

    let outcome = harness.consumer.handle(&delivery(envelope, 1)).await;

    assert_eq!(outcome, ConsumerOutcome::Ignored);
    assert!(harness.mailer.sent().is_empty());
    assert!(harness.store.processed_events().is_empty());
}

#[rstest]
#[case(json!({"username": "alice"}))]
#[case(json!({"email": "not-an-email", "username": "alice"}))]
#[case(json!("garbage"))]
#[tokio::test]
async fn unusable_payloads_are_dead_lettered(harness: Harness, #[case] payload: serde_json::Value) {
    let mut envelope = user_created();
    envelope.payload = payload;

    let outcome = harness.consumer.handle(&delivery(envelope, 1)).await;

    assert!(matches!(outcome, ConsumerOutcome::DeadLetter { .. }));
    assert!(harness.store.processed_events().is_empty());
}

#[rstest]
#[tokio::test]
async fn missing_template_is_dead_lettered_without_claiming() {
    let harness = harness_with(RecordingMailer::default(), StaticTemplates::default());

    let outcome = harness.consumer.handle(&delivery(user_created(), 1)).await;

    assert_eq!(
        outcome,
        ConsumerOutcome::DeadLetter {
            reason: "template not found: activate_account.html".to_owned()
        }
    );
    assert!(harness.store.validation_tokens().is_empty());
}

#[rstest]
#[tokio::test]
async fn failed_send_releases_claim_and_retries() {
    let harness = harness_with(
        RecordingMailer::scripted(vec![Err(NotificationError::unavailable("smtp down"))]),
        StaticTemplates::activation(),
    );
    let envelope = user_created();

    let outcome = harness.consumer.handle(&delivery(envelope.clone(), 1)).await;

    assert_eq!(
        outcome,
        ConsumerOutcome::Retry {
            delay: Duration::from_secs(1),
            reason: "mail transport unavailable: smtp down".to_owned(),
        }
    );
    assert!(harness.store.processed_events().is_empty());
    assert!(harness.store.validation_tokens().is_empty());

    let retried = harness.consumer.handle(&delivery(envelope, 2)).await;
    assert_eq!(retried, ConsumerOutcome::Processed);
    assert_eq!(harness.mailer.sent().len(), 1);
    assert_eq!(harness.store.validation_tokens().len(), 1);
}

#[rstest]
#[tokio::test]
async fn failed_send_on_last_delivery_is_dead_lettered() {
    let harness = harness_with(
        RecordingMailer::scripted(vec![Err(NotificationError::rejected("mailbox full"))]),
        StaticTemplates::activation(),
    );

    let outcome = harness.consumer.handle(&delivery(user_created(), 3)).await;

    assert!(matches!(outcome, ConsumerOutcome::DeadLetter { .. }));
    assert!(harness.store.processed_events().is_empty());
}

#[rstest]
#[tokio::test]
async fn ledger_outage_retries_without_sending() {
    let mut ledger = MockNotificationLedger::new();
    ledger
        .expect_claim()
        .times(1)
        .returning(|_, _, _| Err(LedgerError::connection("refused")));
    ledger.expect_release().never();
    let mailer = Arc::new(RecordingMailer::default());
    let consumer = UserCreatedConsumer::with_runtime(
        NotificationConsumerPorts::new(
            Arc::new(ledger),
            Arc::new(StaticTemplates::activation()),
            mailer.clone(),
        ),
        Arc::new(MutableClock::new(fixed_now())),
        runtime(),
        config(),
    );

    let outcome = consumer.handle(&delivery(user_created(), 2)).await;

    assert_eq!(
        outcome,
        ConsumerOutcome::Retry {
            delay: Duration::from_secs(2),
            reason: "notification ledger connection failed: refused".to_owned(),
        }
    );
    assert!(mailer.sent().is_empty());
}

#[rstest]
#[tokio::test]
async fn poll_once_settles_through_the_channel() {
    let harness = harness_with(
        RecordingMailer::scripted(vec![Err(NotificationError::unavailable("smtp down"))]),
        StaticTemplates::activation(),
    );
    let channel = InMemoryEventChannel::new(harness.clock.clone());
    let config = harness.consumer.config().clone();
    channel
        .publish(&config.topic, "key", &user_created())
        .await
        .expect("publish");
    let subscription = channel
        .subscribe(&config.topic, &config.group)
        .await
        .expect("subscribe");

    assert!(harness.consumer.poll_once(subscription.as_ref()).await.expect("poll"));
    assert!(harness.mailer.sent().is_empty());
    assert!(!harness.consumer.poll_once(subscription.as_ref()).await.expect("poll"));

    harness.clock.advance(Duration::from_secs(1));
    assert!(harness.consumer.poll_once(subscription.as_ref()).await.expect("poll"));
    assert_eq!(harness.mailer.sent().len(), 1);
    assert_eq!(channel.unsettled(&config.topic), 0);
    assert!(channel.dead_letters().is_empty());
}
