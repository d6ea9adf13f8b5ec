//! Background worker lifecycle: spawn the relay and the consumer, then stop
//! them through one shutdown channel.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use accounts::domain::ports::EventSubscriber;
use accounts::domain::{OutboxRelay, TraceId, UserCreatedConsumer};

/// Running worker tasks.
pub struct Workers {
    shutdown: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Workers {
    pub fn spawn(
        relay: OutboxRelay,
        consumer: UserCreatedConsumer,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> Self {
        let (shutdown, receiver) = watch::channel(false);

        let relay_shutdown = receiver.clone();
        let relay_handle = tokio::spawn(async move { relay.run(relay_shutdown).await });

        let consumer_handle = tokio::spawn(async move {
            let started = TraceId::scope(
                TraceId::generate(),
                consumer.start(subscriber.as_ref(), receiver),
            )
            .await;
            if let Err(err) = started {
                error!(error = %err, "notification consumer could not subscribe");
            }
        });

        Self {
            shutdown,
            handles: vec![("outbox relay", relay_handle), ("notification consumer", consumer_handle)],
        }
    }

    /// Signal shutdown and wait for every worker to finish its current step.
    pub async fn stop(self) {
        if self.shutdown.send(true).is_err() {
            debug!("workers already exited; no shutdown receivers remain");
        }
        for (name, handle) in self.handles {
            match handle.await {
                Ok(()) => info!(worker = name, "worker stopped"),
                Err(err) => error!(worker = name, error = %err, "worker task failed"),
            }
        }
    }
}
