//! Consumer that turns `UserCreated` events into activation mail.
//!
//! Deliveries are at-least-once, so the consumer claims each event id in a
//! shared ledger before sending. The claim and the validation token are
//! written in one transaction; a send that definitely failed releases both so
//! redelivery can try again. A send whose outcome is unknown keeps the claim
//! and is dead-lettered for inspection. Only one mail goes out per event id
//! however often it arrives.

mod outcome;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::domain::ports::{
    ChannelError, ClaimOutcome, Delivery, EventSubscriber, EventSubscription, MailTransport,
    NotificationError, NotificationLedger, TemplateRenderer,
};
use crate::domain::{
    BackoffJitter, DEFAULT_TOKEN_TTL, EmailAddress, RetryPolicy, RetrySleeper, TraceId,
    USER_CREATED_EVENT, UserCreatedPayload, ValidationToken, WorkerRuntime,
};

pub use outcome::ConsumerOutcome;

/// Default consumer group name.
pub const DEFAULT_CONSUMER_GROUP: &str = "registration-notifier";
/// Template rendered for activation mail.
pub const ACTIVATION_TEMPLATE: &str = "activate_account.html";
/// Subject of activation mail.
pub const ACTIVATION_SUBJECT: &str = "Account Activation - No Reply";

/// Consumer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Topic the consumer subscribes to.
    pub topic: String,
    /// Consumer group sharing the topic's deliveries.
    pub group: String,
    /// Deliveries allowed before the message is dead-lettered.
    pub max_deliveries: u32,
    /// Backoff between redeliveries.
    pub retry: RetryPolicy,
    /// Name of the activation template.
    pub template_name: String,
    /// Subject line of activation mail.
    pub subject: String,
    /// Lifetime of issued validation tokens.
    pub token_ttl: Duration,
    /// Upper bound on any single ledger, template, or channel call.
    pub call_timeout: Duration,
    /// Upper bound on one mail send. Keep it above the transport's own
    /// timeout so the transport reports first.
    pub send_timeout: Duration,
    /// Pause when the channel has nothing ready.
    pub poll_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: crate::domain::outbox_relay::DEFAULT_TOPIC.to_owned(),
            group: DEFAULT_CONSUMER_GROUP.to_owned(),
            max_deliveries: 5,
            retry: RetryPolicy::default(),
            template_name: ACTIVATION_TEMPLATE.to_owned(),
            subject: ACTIVATION_SUBJECT.to_owned(),
            token_ttl: DEFAULT_TOKEN_TTL,
            call_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Port bundle required by the consumer.
pub struct NotificationConsumerPorts {
    /// Processed-event ledger and token store.
    pub ledger: Arc<dyn NotificationLedger>,
    /// Template source for the mail body.
    pub renderer: Arc<dyn TemplateRenderer>,
    /// Outgoing mail transport.
    pub mailer: Arc<dyn MailTransport>,
}

impl NotificationConsumerPorts {
    /// Build a strongly-typed consumer port bundle.
    pub fn new(
        ledger: Arc<dyn NotificationLedger>,
        renderer: Arc<dyn TemplateRenderer>,
        mailer: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            ledger,
            renderer,
            mailer,
        }
    }
}

/// Idempotent `UserCreated` consumer.
pub struct UserCreatedConsumer {
    ledger: Arc<dyn NotificationLedger>,
    renderer: Arc<dyn TemplateRenderer>,
    mailer: Arc<dyn MailTransport>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn RetrySleeper>,
    jitter: Arc<dyn BackoffJitter>,
    config: ConsumerConfig,
}

enum Step<T> {
    Done(T),
    Failed(String),
    TimedOut,
}

impl UserCreatedConsumer {
    /// Build a consumer using default runtime dependencies.
    pub fn new(
        ports: NotificationConsumerPorts,
        clock: Arc<dyn Clock>,
        config: ConsumerConfig,
    ) -> Self {
        Self::with_runtime(ports, clock, WorkerRuntime::default(), config)
    }

    /// Build a consumer with injected runtime abstractions.
    pub fn with_runtime(
        ports: NotificationConsumerPorts,
        clock: Arc<dyn Clock>,
        runtime: WorkerRuntime,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            ledger: ports.ledger,
            renderer: ports.renderer,
            mailer: ports.mailer,
            clock,
            sleeper: runtime.sleeper,
            jitter: runtime.jitter,
            config,
        }
    }

    /// Consumer settings.
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    async fn bounded<T, E, F>(&self, fut: F) -> Step<T>
    where
        E: std::fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(Ok(value)) => Step::Done(value),
            Ok(Err(err)) => Step::Failed(err.to_string()),
            Err(_) => Step::TimedOut,
        }
    }

    fn timed_out(&self, call: &str) -> String {
        format!("{call} timed out after {:?}", self.config.call_timeout)
    }

    fn retry_or_dead_letter(&self, attempt: u32, reason: String) -> ConsumerOutcome {
        if attempt >= self.config.max_deliveries.max(1) {
            return ConsumerOutcome::DeadLetter {
                reason: format!("gave up after {attempt} deliveries: {reason}"),
            };
        }
        let base = self.config.retry.base_delay(attempt);
        let delay = self
            .jitter
            .jittered_delay(base, attempt, self.clock.utc());
        ConsumerOutcome::Retry { delay, reason }
    }

    /// The mail may already be out, so the claim stays and the message is
    /// parked instead of redelivered.
    fn unconfirmed(&self, delivery: &Delivery, reason: String) -> ConsumerOutcome {
        warn!(
            event_id = %delivery.envelope.event_id,
            error = %reason,
            "activation mail outcome unknown; keeping claim"
        );
        ConsumerOutcome::DeadLetter {
            reason: format!("delivery unconfirmed, claim kept: {reason}"),
        }
    }

    /// Decide what to do with one delivery. Side effects (ledger claim and
    /// mail) happen here; settling the message is left to [`Self::settle`].
    pub async fn handle(&self, delivery: &Delivery) -> ConsumerOutcome {
        let envelope = &delivery.envelope;
        if envelope.event_type != USER_CREATED_EVENT {
            debug!(event_id = %envelope.event_id, event_type = %envelope.event_type, "ignoring event");
            return ConsumerOutcome::Ignored;
        }

        let payload: UserCreatedPayload = match envelope.decode_payload() {
            Ok(payload) => payload,
            Err(err) => {
                return ConsumerOutcome::DeadLetter {
                    reason: format!("malformed UserCreated payload: {err}"),
                };
            }
        };
        let email = match EmailAddress::parse(&payload.email) {
            Ok(email) => email,
            Err(err) => {
                return ConsumerOutcome::DeadLetter {
                    reason: format!("UserCreated payload has unusable email: {err}"),
                };
            }
        };

        let token = ValidationToken::issue(
            email.clone(),
            envelope.event_id,
            self.clock.utc(),
            self.config.token_ttl,
        );
        let variables = BTreeMap::from([
            ("name".to_owned(), payload.username),
            ("token".to_owned(), token.token.clone()),
        ]);

        let body = match self
            .bounded(self.renderer.render(&self.config.template_name, &variables))
            .await
        {
            Step::Done(body) => body,
            Step::Failed(reason) => return ConsumerOutcome::DeadLetter { reason },
            Step::TimedOut => {
                return self.retry_or_dead_letter(delivery.attempt, self.timed_out("render"));
            }
        };

        match self
            .bounded(self.ledger.claim(envelope.event_id, USER_CREATED_EVENT, &token))
            .await
        {
            Step::Done(ClaimOutcome::Claimed) => {}
            Step::Done(ClaimOutcome::AlreadyProcessed) => {
                info!(event_id = %envelope.event_id, "event already processed; skipping");
                return ConsumerOutcome::Duplicate;
            }
            Step::Failed(reason) => return self.retry_or_dead_letter(delivery.attempt, reason),
            Step::TimedOut => {
                return self.retry_or_dead_letter(delivery.attempt, self.timed_out("claim"));
            }
        }

        let send = self
            .mailer
            .send(std::slice::from_ref(&email), &self.config.subject, &body);
        let reason = match tokio::time::timeout(self.config.send_timeout, send).await {
            Ok(Ok(())) => {
                info!(event_id = %envelope.event_id, "activation mail sent");
                return ConsumerOutcome::Processed;
            }
            Ok(Err(err @ NotificationError::Unconfirmed { .. })) => {
                return self.unconfirmed(delivery, err.to_string());
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => {
                let reason = format!("send timed out after {:?}", self.config.send_timeout);
                return self.unconfirmed(delivery, reason);
            }
        };

        // A send that definitely failed must not leave its claim behind.
        match self.bounded(self.ledger.release(envelope.event_id)).await {
            Step::Done(()) => {}
            Step::Failed(err) => {
                warn!(event_id = %envelope.event_id, error = %err, "failed to release claim");
            }
            Step::TimedOut => {
                warn!(event_id = %envelope.event_id, "releasing claim timed out");
            }
        }
        self.retry_or_dead_letter(delivery.attempt, reason)
    }

    /// Apply `outcome` to the subscription.
    pub async fn settle(
        &self,
        subscription: &dyn EventSubscription,
        delivery: &Delivery,
        outcome: &ConsumerOutcome,
    ) -> Result<(), ChannelError> {
        let receipt = &delivery.receipt;
        let call = async {
            match outcome {
                ConsumerOutcome::Processed
                | ConsumerOutcome::Duplicate
                | ConsumerOutcome::Ignored => subscription.ack(receipt).await,
                ConsumerOutcome::Retry { delay, reason } => {
                    warn!(
                        event_id = %delivery.envelope.event_id,
                        attempt = delivery.attempt,
                        retry_in = ?delay,
                        error = %reason,
                        "notification failed; redelivery scheduled"
                    );
                    subscription.retry(receipt, *delay).await
                }
                ConsumerOutcome::DeadLetter { reason } => {
                    error!(
                        target: "dead_letter",
                        event_id = %delivery.envelope.event_id,
                        event_type = %delivery.envelope.event_type,
                        attempt = delivery.attempt,
                        error = %reason,
                        "event dead-lettered"
                    );
                    subscription.dead_letter(receipt, reason).await
                }
            }
        };
        tokio::time::timeout(self.config.call_timeout, call)
            .await
            .unwrap_or_else(|_| Err(ChannelError::unavailable(self.timed_out("settle"))))
    }

    /// Receive, handle, and settle one delivery. Returns `false` when the
    /// channel had nothing ready.
    pub async fn poll_once(&self, subscription: &dyn EventSubscription) -> Result<bool, ChannelError> {
        let received = tokio::time::timeout(self.config.call_timeout, subscription.receive())
            .await
            .unwrap_or_else(|_| Err(ChannelError::unavailable(self.timed_out("receive"))))?;
        let Some(delivery) = received else {
            return Ok(false);
        };
        TraceId::scope(TraceId::generate(), async {
            let outcome = self.handle(&delivery).await;
            self.settle(subscription, &delivery, &outcome).await
        })
        .await?;
        Ok(true)
    }

    /// Subscribe and consume until `shutdown` flips to `true`.
    pub async fn start(
        &self,
        subscriber: &dyn EventSubscriber,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), ChannelError> {
        let subscription = subscriber
            .subscribe(&self.config.topic, &self.config.group)
            .await?;
        self.run(subscription.as_ref(), shutdown).await;
        Ok(())
    }

    /// Consume from `subscription` until `shutdown` flips to `true` or its
    /// sender is dropped.
    pub async fn run(&self, subscription: &dyn EventSubscription, mut shutdown: watch::Receiver<bool>) {
        info!(topic = %self.config.topic, group = %self.config.group, "notification consumer started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.poll_once(subscription).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => warn!(error = %err, "notification consumer poll failed"),
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = self.sleeper.sleep(self.config.poll_interval) => {}
            }
        }
        info!("notification consumer stopped");
    }
}

#[cfg(test)]
mod tests;
