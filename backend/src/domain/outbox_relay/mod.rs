//! Background relay moving outbox entries onto the message channel.
//!
//! Each cycle reads a bounded batch of due entries oldest first, publishes
//! them keyed by aggregate id, and marks each one published in its own short
//! write only after the channel acknowledged it. Failures are
//! counted per entry and retried with jittered exponential backoff until the
//! retry ceiling, after which the entry is dead-lettered and reported.
//!
//! Once an hour the relay also purges published entries and, when a
//! [`ChannelRetention`] is attached, settled channel messages past the same
//! retention window. The channel keeps deduplicating republished event ids
//! for that whole window.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::ports::{
    ChannelRetention, EventPublisher, OutboxRepository, OutboxRepositoryError, PublishError,
};
use crate::domain::{
    BackoffJitter, EventEnvelope, OutboxEntry, RetryPolicy, RetrySleeper, TraceId, WorkerRuntime,
};

/// Default topic user events are published to.
pub const DEFAULT_TOPIC: &str = "user-topic";

const PURGE_INTERVAL_SECS: i64 = 60 * 60;

/// Relay configuration. Every threshold is deployment configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRelayConfig {
    /// Topic envelopes are published to.
    pub topic: String,
    /// Maximum entries read per cycle.
    pub batch_size: usize,
    /// Pause between cycles.
    pub poll_interval: Duration,
    /// Backoff and dead-letter threshold for failed publishes.
    pub retry: RetryPolicy,
    /// Upper bound on any single store or channel call.
    pub call_timeout: Duration,
    /// How long published entries and settled channel messages are kept
    /// before being purged.
    pub retention: Duration,
}

impl Default for OutboxRelayConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_owned(),
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(5),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Counters describing one relay cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayCycleReport {
    /// Entries returned by the pending query.
    pub fetched: usize,
    /// Entries acknowledged by the channel and marked published.
    pub published: usize,
    /// Entries acknowledged but whose published mark could not be written.
    pub unmarked: usize,
    /// Failed entries scheduled for another attempt.
    pub retried: usize,
    /// Entries moved to the dead-letter state.
    pub dead_lettered: usize,
    /// Entries skipped because an older entry of the same aggregate failed
    /// earlier in the cycle.
    pub deferred: usize,
}

/// Port bundle required by the relay.
pub struct OutboxRelayPorts {
    /// Outbox persistence adapter.
    pub outbox: Arc<dyn OutboxRepository>,
    /// Message channel producer.
    pub publisher: Arc<dyn EventPublisher>,
}

impl OutboxRelayPorts {
    /// Build a strongly-typed relay port bundle.
    pub fn new(outbox: Arc<dyn OutboxRepository>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { outbox, publisher }
    }
}

/// Domain-owned outbox relay.
pub struct OutboxRelay {
    outbox: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn RetrySleeper>,
    jitter: Arc<dyn BackoffJitter>,
    config: OutboxRelayConfig,
    channel_retention: Option<Arc<dyn ChannelRetention>>,
    last_purge: AtomicI64,
}

impl OutboxRelay {
    /// Build a relay using default runtime dependencies.
    pub fn new(ports: OutboxRelayPorts, clock: Arc<dyn Clock>, config: OutboxRelayConfig) -> Self {
        Self::with_runtime(ports, clock, WorkerRuntime::default(), config)
    }

    /// Build a relay with injected runtime abstractions.
    pub fn with_runtime(
        ports: OutboxRelayPorts,
        clock: Arc<dyn Clock>,
        runtime: WorkerRuntime,
        config: OutboxRelayConfig,
    ) -> Self {
        Self {
            outbox: ports.outbox,
            publisher: ports.publisher,
            clock,
            sleeper: runtime.sleeper,
            jitter: runtime.jitter,
            config,
            channel_retention: None,
            last_purge: AtomicI64::new(i64::MIN),
        }
    }

    /// Also purge settled channel messages on the hourly purge.
    #[must_use]
    pub fn with_channel_retention(mut self, retention: Arc<dyn ChannelRetention>) -> Self {
        self.channel_retention = Some(retention);
        self
    }

    /// Run cycles until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(topic = %self.config.topic, "outbox relay started");
        loop {
            TraceId::scope(TraceId::generate(), self.tick()).await;
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                () = self.sleeper.sleep(self.config.poll_interval) => {}
            }
        }
        info!("outbox relay stopped");
    }

    async fn tick(&self) {
        match self.run_cycle().await {
            Ok(report) if report.fetched > 0 => debug!(?report, "outbox relay cycle finished"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "outbox relay cycle failed"),
        }
        if let Err(err) = self.purge_if_due().await {
            warn!(error = %err, "outbox purge failed");
        }
    }

    /// Publish one batch of due entries.
    ///
    /// Only the initial read can fail the cycle; per-entry bookkeeping
    /// failures are logged and leave the entry pending for the next cycle.
    pub async fn run_cycle(&self) -> Result<RelayCycleReport, OutboxRepositoryError> {
        let now = self.clock.utc();
        let batch = self
            .bounded(self.outbox.fetch_pending(self.config.batch_size.max(1), now))
            .await?;

        let mut report = RelayCycleReport {
            fetched: batch.len(),
            ..RelayCycleReport::default()
        };
        let mut blocked: HashSet<Uuid> = HashSet::new();

        for entry in batch {
            if blocked.contains(&entry.aggregate_id) {
                report.deferred += 1;
                continue;
            }
            match self.publish(&entry).await {
                Ok(()) => self.settle_published(&entry, &mut report).await,
                Err(err) => {
                    blocked.insert(entry.aggregate_id);
                    self.settle_failed(&entry, &err, &mut report).await;
                }
            }
        }

        Ok(report)
    }

    /// Delete published entries older than the retention window, at most
    /// once per hour. Settled channel messages past the same cutoff go in
    /// the same pass; a failure there is logged and does not fail the purge.
    pub async fn purge_if_due(&self) -> Result<u64, OutboxRepositoryError> {
        let now = self.clock.utc();
        let last = self.last_purge.load(Ordering::Acquire);
        if now.timestamp().saturating_sub(last) < PURGE_INTERVAL_SECS {
            return Ok(0);
        }
        self.last_purge.store(now.timestamp(), Ordering::Release);

        let retention = TimeDelta::from_std(self.config.retention).unwrap_or(TimeDelta::MAX);
        let cutoff = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.purge_channel(cutoff).await;
        let purged = self
            .bounded(self.outbox.purge_published_before(cutoff))
            .await?;
        if purged > 0 {
            info!(purged, %cutoff, "purged published outbox entries");
        }
        Ok(purged)
    }

    async fn purge_channel(&self, cutoff: DateTime<Utc>) {
        let Some(retention) = &self.channel_retention else {
            return;
        };
        let call = retention.purge_settled_before(cutoff);
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(Ok(0)) => {}
            Ok(Ok(purged)) => info!(purged, %cutoff, "purged settled channel messages"),
            Ok(Err(err)) => warn!(error = %err, "channel purge failed"),
            Err(_) => warn!(
                timeout = ?self.config.call_timeout,
                "channel purge timed out"
            ),
        }
    }

    async fn publish(&self, entry: &OutboxEntry) -> Result<(), PublishError> {
        let envelope = EventEnvelope::from_outbox(entry);
        let key = entry.aggregate_id.to_string();
        let call = self.publisher.publish(&self.config.topic, &key, &envelope);
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::unavailable(format!(
                "publish timed out after {:?}",
                self.config.call_timeout
            ))),
        }
    }

    async fn settle_published(&self, entry: &OutboxEntry, report: &mut RelayCycleReport) {
        let marked = self
            .bounded(self.outbox.mark_published(entry.id, self.clock.utc()))
            .await;
        match marked {
            Ok(true) => report.published += 1,
            Ok(false) => debug!(event_id = %entry.id, "outbox entry was already published"),
            Err(err) => {
                // The entry stays pending and is republished; consumers dedup.
                report.unmarked += 1;
                warn!(event_id = %entry.id, error = %err, "failed to mark outbox entry published");
            }
        }
    }

    async fn settle_failed(
        &self,
        entry: &OutboxEntry,
        failure: &PublishError,
        report: &mut RelayCycleReport,
    ) {
        let attempts = entry.attempts.saturating_add(1);
        let now = self.clock.utc();
        let reason = failure.to_string();

        if !failure.is_transient() || self.config.retry.is_exhausted(attempts) {
            let result = self
                .bounded(self.outbox.mark_dead_lettered(entry.id, now, &reason))
                .await;
            match result {
                Ok(()) => {
                    report.dead_lettered += 1;
                    error!(
                        target: "dead_letter",
                        event_id = %entry.id,
                        aggregate_id = %entry.aggregate_id,
                        event_type = %entry.event_type,
                        attempts,
                        error = %reason,
                        "outbox entry dead-lettered"
                    );
                }
                Err(err) => {
                    warn!(event_id = %entry.id, error = %err, "failed to dead-letter outbox entry");
                }
            }
            return;
        }

        let base = self.config.retry.base_delay(attempts);
        let delay = self.jitter.jittered_delay(base, attempts, now);
        let next_attempt_at = now
            .checked_add_signed(TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let result = self
            .bounded(
                self.outbox
                    .record_failure(entry.id, attempts, next_attempt_at, &reason),
            )
            .await;
        match result {
            Ok(()) => {
                report.retried += 1;
                warn!(
                    event_id = %entry.id,
                    attempts,
                    retry_in = ?delay,
                    error = %reason,
                    "outbox publish failed; retry scheduled"
                );
            }
            Err(err) => {
                warn!(event_id = %entry.id, error = %err, "failed to record outbox publish failure");
            }
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, OutboxRepositoryError>
    where
        F: Future<Output = Result<T, OutboxRepositoryError>>,
    {
        tokio::time::timeout(self.config.call_timeout, fut)
            .await
            .unwrap_or_else(|_| {
                Err(OutboxRepositoryError::connection(format!(
                    "outbox call timed out after {:?}",
                    self.config.call_timeout
                )))
            })
    }
}
