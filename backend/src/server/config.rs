//! Application settings loaded via OrthoConfig.
//!
//! Every value can come from a CLI flag, an `ACCOUNTS_*` environment
//! variable, or a config file. Unset values fall back to the defaults
//! documented on each accessor.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use accounts::domain::{
    ConsumerConfig, DEFAULT_STORE_TIMEOUT, DEFAULT_TOKEN_TTL, OutboxRelayConfig, RetryPolicy,
};
use accounts::outbound::persistence::PoolConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_TEMPLATES_DIR: &str = "templates";

/// Service configuration.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "ACCOUNTS")]
pub struct AppSettings {
    /// Listen address, `0.0.0.0:8080` by default.
    pub bind_addr: Option<String>,
    /// PostgreSQL URL. Without it the service runs on in-memory adapters.
    pub database_url: Option<String>,
    /// Pool size, 10 by default.
    pub db_max_connections: Option<u32>,
    /// Directory holding `activate_account.html`.
    pub templates_dir: Option<PathBuf>,
    /// HTTP mail relay endpoint. Without it mail is only logged.
    pub mail_relay_url: Option<String>,
    /// `from` address on relayed mail.
    pub mail_from: Option<String>,
    /// Request timeout of the HTTP mail relay.
    #[ortho_config(default = 10)]
    pub mail_timeout_secs: u64,
    /// Topic shared by the relay and the consumer.
    pub relay_topic: Option<String>,
    /// Pause between relay cycles.
    pub relay_poll_interval_ms: Option<u64>,
    /// Outbox entries read per relay cycle.
    pub relay_batch_size: Option<usize>,
    /// Publish attempts before an entry is dead-lettered.
    pub relay_max_attempts: Option<u32>,
    /// First retry delay, doubled per attempt.
    pub relay_initial_backoff_ms: Option<u64>,
    /// Cap on any retry delay.
    pub relay_max_backoff_ms: Option<u64>,
    /// How long published entries and settled messages are kept.
    pub relay_retention_hours: Option<u64>,
    /// Consumer group name.
    pub consumer_group: Option<String>,
    /// Deliveries before a message is dead-lettered.
    pub consumer_max_deliveries: Option<u32>,
    /// Pause when the channel has nothing ready.
    pub consumer_poll_interval_ms: Option<u64>,
    /// Visibility timeout for unacknowledged deliveries.
    #[ortho_config(default = 30)]
    pub consumer_lease_secs: u64,
    /// Validation token lifetime, 24 hours by default.
    pub token_ttl_hours: Option<u64>,
    /// Upper bound on one store or channel call.
    pub store_timeout_ms: Option<u64>,
}

impl AppSettings {
    /// Parse the listen address.
    ///
    /// # Errors
    ///
    /// Returns an error message when the configured value is not a socket
    /// address.
    pub fn bind_addr(&self) -> Result<SocketAddr, String> {
        let raw = self.bind_addr.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
        raw.parse()
            .map_err(|err| format!("invalid bind address {raw:?}: {err}"))
    }

    pub fn pool_config(&self) -> Option<PoolConfig> {
        self.database_url.as_ref().map(|url| {
            let config = PoolConfig::new(url.clone());
            match self.db_max_connections {
                Some(max) => config.with_max_size(max),
                None => config,
            }
        })
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.templates_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATES_DIR))
    }

    pub fn mail_timeout(&self) -> Duration {
        Duration::from_secs(self.mail_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout_ms
            .map_or(DEFAULT_STORE_TIMEOUT, Duration::from_millis)
    }

    pub fn consumer_lease(&self) -> Duration {
        Duration::from_secs(self.consumer_lease_secs)
    }

    fn retry_policy(&self, max_attempts: Option<u32>) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: max_attempts.unwrap_or(defaults.max_attempts),
            initial_backoff: self
                .relay_initial_backoff_ms
                .map_or(defaults.initial_backoff, Duration::from_millis),
            max_backoff: self
                .relay_max_backoff_ms
                .map_or(defaults.max_backoff, Duration::from_millis),
        }
    }

    pub fn relay_config(&self) -> OutboxRelayConfig {
        let defaults = OutboxRelayConfig::default();
        OutboxRelayConfig {
            topic: self.relay_topic.clone().unwrap_or(defaults.topic),
            batch_size: self.relay_batch_size.unwrap_or(defaults.batch_size),
            poll_interval: self
                .relay_poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            retry: self.retry_policy(self.relay_max_attempts),
            call_timeout: self.store_timeout(),
            retention: self
                .relay_retention_hours
                .map_or(defaults.retention, |hours| {
                    Duration::from_secs(hours.saturating_mul(3600))
                }),
        }
    }

    /// Consumer settings. The topic is shared with the relay.
    pub fn consumer_config(&self) -> ConsumerConfig {
        let defaults = ConsumerConfig::default();
        ConsumerConfig {
            topic: self.relay_topic.clone().unwrap_or(defaults.topic),
            group: self.consumer_group.clone().unwrap_or(defaults.group),
            max_deliveries: self
                .consumer_max_deliveries
                .unwrap_or(defaults.max_deliveries),
            retry: self.retry_policy(self.consumer_max_deliveries),
            token_ttl: self
                .token_ttl_hours
                .map_or(DEFAULT_TOKEN_TTL, |hours| {
                    Duration::from_secs(hours.saturating_mul(3600))
                }),
            call_timeout: self.store_timeout(),
            send_timeout: self.mail_timeout().saturating_add(self.store_timeout()),
            poll_interval: self
                .consumer_poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            ..defaults
        }
    }
}
