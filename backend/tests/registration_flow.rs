//! End-to-end registration flow over the in-memory adapters: HTTP create,
//! relay cycle, consumer handling, and duplicate redelivery.

use std::sync::Arc;
use std::time::Duration;

use accounts::Trace;
use accounts::domain::ports::{
    EventPublisher, EventSubscriber, NotificationError, PublishError,
};
use accounts::domain::{
    ConsumerConfig, NotificationConsumerPorts, OutboxRelay, OutboxRelayConfig, OutboxRelayPorts,
    ProductCatalogueService, RetryPolicy, USER_CREATED_EVENT, UserCreatedConsumer,
    UserRegistrationService, WorkerRuntime,
};
use accounts::inbound::http::api_v1;
use accounts::inbound::http::state::HttpState;
use accounts::outbound::memory::{InMemoryEventChannel, InMemoryStore};
use accounts::test_support::doubles::{
    RecordingMailer, RecordingPublisher, StaticTemplates, StubPasswordHasher,
};
use accounts::test_support::workers::{ImmediateSleeper, MutableClock, NoJitter, fixed_now};
use actix_web::http::StatusCode;
use actix_web::{App, test as actix_test, web};
use rstest::{fixture, rstest};
use serde_json::{Value, json};

struct World {
    store: Arc<InMemoryStore>,
    channel: Arc<InMemoryEventChannel>,
    mailer: Arc<RecordingMailer>,
    clock: Arc<MutableClock>,
    relay: OutboxRelay,
    consumer: UserCreatedConsumer,
}

fn runtime() -> WorkerRuntime {
    WorkerRuntime {
        sleeper: Arc::new(ImmediateSleeper),
        jitter: Arc::new(NoJitter),
    }
}

fn retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_secs(1),
        max_backoff: Duration::from_secs(30),
    }
}

fn world_with(mailer: RecordingMailer) -> World {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(MutableClock::new(fixed_now()));
    let channel = Arc::new(InMemoryEventChannel::new(clock.clone()));
    let mailer = Arc::new(mailer);
    let relay = OutboxRelay::with_runtime(
        OutboxRelayPorts::new(store.clone(), channel.clone()),
        clock.clone(),
        runtime(),
        OutboxRelayConfig {
            retry: retry(),
            ..OutboxRelayConfig::default()
        },
    );
    let consumer = UserCreatedConsumer::with_runtime(
        NotificationConsumerPorts::new(
            store.clone(),
            Arc::new(StaticTemplates::activation()),
            mailer.clone(),
        ),
        clock.clone(),
        runtime(),
        ConsumerConfig {
            max_deliveries: 3,
            retry: retry(),
            ..ConsumerConfig::default()
        },
    );
    World {
        store,
        channel,
        mailer,
        clock,
        relay,
        consumer,
    }
}

#[fixture]
fn world() -> World {
    world_with(RecordingMailer::default())
}

impl World {
    fn http_state(&self) -> web::Data<HttpState> {
        let registration = UserRegistrationService::new(
            self.store.clone(),
            Arc::new(StubPasswordHasher),
            self.clock.clone(),
        );
        let catalogue = ProductCatalogueService::new(self.store.clone(), self.clock.clone());
        web::Data::new(HttpState::new(
            Arc::new(registration),
            Arc::new(catalogue),
            self.store.clone(),
        ))
    }

    async fn register(&self, body: Value) -> (StatusCode, Value) {
        let app = actix_test::init_service(
            App::new()
                .app_data(self.http_state())
                .wrap(Trace)
                .service(api_v1()),
        )
        .await;
        let req = actix_test::TestRequest::post()
            .uri("/api/v1/users")
            .set_json(body)
            .to_request();
        let res = actix_test::call_service(&app, req).await;
        let status = res.status();
        (status, actix_test::read_body_json(res).await)
    }

    /// Drain every visible delivery; returns how many were handled.
    async fn consume_all(&self) -> usize {
        let config = self.consumer.config();
        let subscription = self
            .channel
            .subscribe(&config.topic, &config.group)
            .await
            .expect("subscribe");
        let mut handled = 0;
        while self
            .consumer
            .poll_once(subscription.as_ref())
            .await
            .expect("poll")
        {
            handled += 1;
        }
        handled
    }
}

fn alice() -> Value {
    json!({
        "username": "alice",
        "email": "alice@x.com",
        "telephone": "555-0100",
        "password": "Abcdef1!",
        "confirmPassword": "Abcdef1!"
    })
}

#[rstest]
#[actix_web::test]
async fn registration_sends_exactly_one_activation_mail(world: World) {
    let (status, body) = world.register(alice()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "alice@x.com");

    let report = world.relay.run_cycle().await.expect("relay cycle");
    assert_eq!(report.published, 1);
    let published = world.channel.published("user-topic");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].event_type, USER_CREATED_EVENT);
    assert_eq!(published[0].aggregate_id.to_string(), body["id"]);

    assert_eq!(world.consume_all().await, 1);

    let sent = world.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to[0].as_ref(), "alice@x.com");
    assert_eq!(sent[0].subject, "Account Activation - No Reply");

    let tokens = world.store.validation_tokens();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].event_id, published[0].event_id);
    assert!(sent[0].html_body.contains(&tokens[0].token));
    assert!(sent[0].html_body.contains("alice"));
    assert_eq!(
        tokens[0].expires_at - tokens[0].created_at,
        chrono::TimeDelta::hours(24)
    );

    assert!(world.store.outbox_entries()[0].published_at.is_some());
    assert_eq!(world.channel.unsettled("user-topic"), 0);
}

#[rstest]
#[actix_web::test]
async fn rejected_registration_publishes_nothing(world: World) {
    let mut body = alice();
    body["confirmPassword"] = json!("Different1!");
    let (status, _) = world.register(body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let report = world.relay.run_cycle().await.expect("relay cycle");
    assert_eq!(report.fetched, 0);
    assert_eq!(world.consume_all().await, 0);
    assert!(world.mailer.sent().is_empty());
}

#[rstest]
#[actix_web::test]
async fn republished_event_is_not_mailed_twice(world: World) {
    world.register(alice()).await;
    world.relay.run_cycle().await.expect("relay cycle");
    assert_eq!(world.consume_all().await, 1);
    let envelope = world.channel.published("user-topic")[0].clone();

    // Same event id on the same topic: the channel keeps one copy.
    world
        .channel
        .publish("user-topic", "key", &envelope)
        .await
        .expect("publish");
    assert_eq!(world.consume_all().await, 0);

    // A fresh channel without that dedup history redelivers it; the ledger
    // turns it into a duplicate.
    let replay = InMemoryEventChannel::new(world.clock.clone());
    replay
        .publish("user-topic", "key", &envelope)
        .await
        .expect("publish");
    let config = world.consumer.config();
    let subscription = replay
        .subscribe(&config.topic, &config.group)
        .await
        .expect("subscribe");
    assert!(
        world
            .consumer
            .poll_once(subscription.as_ref())
            .await
            .expect("poll")
    );

    assert_eq!(world.mailer.sent().len(), 1);
    assert_eq!(world.store.validation_tokens().len(), 1);
    assert_eq!(replay.unsettled("user-topic"), 0);
}

#[rstest]
#[actix_web::test]
async fn failed_send_is_retried_after_backoff() {
    let world = world_with(RecordingMailer::scripted(vec![Err(
        NotificationError::unavailable("smtp down"),
    )]));
    world.register(alice()).await;
    world.relay.run_cycle().await.expect("relay cycle");

    assert_eq!(world.consume_all().await, 1);
    assert!(world.mailer.sent().is_empty());
    assert!(world.store.validation_tokens().is_empty());

    world.clock.advance(Duration::from_secs(1));
    assert_eq!(world.consume_all().await, 1);
    assert_eq!(world.mailer.sent().len(), 1);
    assert_eq!(world.store.validation_tokens().len(), 1);
}

#[rstest]
#[actix_web::test]
async fn unusable_payload_is_dead_lettered_without_mail(world: World) {
    world.register(alice()).await;
    world.relay.run_cycle().await.expect("relay cycle");
    let mut envelope = world.channel.published("user-topic")[0].clone();
    envelope.event_id = accounts::domain::EventId::random();
    envelope.payload = json!({"username": "alice"});
    world
        .channel
        .publish("user-topic", "key-2", &envelope)
        .await
        .expect("publish");

    assert_eq!(world.consume_all().await, 2);
    assert_eq!(world.mailer.sent().len(), 1);
    let dead = world.channel.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].envelope.event_id, envelope.event_id);
}

#[rstest]
#[actix_web::test]
async fn two_users_are_each_mailed_once(world: World) {
    world.register(alice()).await;
    let mut bob = alice();
    bob["username"] = json!("bob");
    bob["email"] = json!("bob@x.com");
    world.register(bob).await;

    let report = world.relay.run_cycle().await.expect("relay cycle");
    assert_eq!(report.published, 2);
    assert_eq!(world.consume_all().await, 2);

    let mut recipients: Vec<String> = world
        .mailer
        .sent()
        .iter()
        .map(|mail| mail.to[0].to_string())
        .collect();
    recipients.sort();
    assert_eq!(recipients, vec!["alice@x.com", "bob@x.com"]);
}

#[rstest]
#[actix_web::test]
async fn relay_retries_after_a_broker_outage(world: World) {
    world.register(alice()).await;
    let publisher = Arc::new(RecordingPublisher::failing(
        1,
        PublishError::unavailable("broker down"),
    ));
    let relay = OutboxRelay::with_runtime(
        OutboxRelayPorts::new(world.store.clone(), publisher.clone()),
        world.clock.clone(),
        runtime(),
        OutboxRelayConfig {
            retry: retry(),
            ..OutboxRelayConfig::default()
        },
    );

    let first = relay.run_cycle().await.expect("first cycle");
    assert_eq!(first.retried, 1);
    assert!(world.store.outbox_entries()[0].published_at.is_none());

    let early = relay.run_cycle().await.expect("early cycle");
    assert_eq!(early.fetched, 0);

    world.clock.advance(Duration::from_secs(1));
    let second = relay.run_cycle().await.expect("second cycle");
    assert_eq!(second.published, 1);
    assert_eq!(publisher.published().len(), 1);
    assert_eq!(world.store.outbox_entries()[0].attempts, 1);
}
