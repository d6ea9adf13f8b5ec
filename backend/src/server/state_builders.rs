//! Builders wiring adapters into the HTTP state and the background workers.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use reqwest::Url;
use tracing::{info, warn};

use accounts::domain::ports::{
    ChannelRetention, EventPublisher, EventSubscriber, MailTransport, NotificationLedger,
    OutboxRepository, ProductRepository, TemplateRenderer, UserStore,
};
use accounts::domain::{
    NotificationConsumerPorts, OutboxRelay, OutboxRelayPorts, ProductCatalogueService,
    UserCreatedConsumer, UserRegistrationService,
};
use accounts::inbound::http::state::HttpState;
use accounts::outbound::crypto::Argon2PasswordHasher;
use accounts::outbound::mail::{
    FileTemplateRenderer, HttpMailRelay, MailRelayIdentity, TracingMailTransport,
};
use accounts::outbound::memory::{InMemoryEventChannel, InMemoryStore};
use accounts::outbound::persistence::{
    DbPool, DieselEventChannel, DieselNotificationLedger, DieselOutboxRepository,
    DieselProductRepository, DieselUserStore,
};

use super::AppSettings;

/// Driven-port implementations shared by the HTTP state and the workers.
#[derive(Clone)]
pub struct Adapters {
    pub users: Arc<dyn UserStore>,
    pub outbox: Arc<dyn OutboxRepository>,
    pub ledger: Arc<dyn NotificationLedger>,
    pub products: Arc<dyn ProductRepository>,
    pub publisher: Arc<dyn EventPublisher>,
    pub subscriber: Arc<dyn EventSubscriber>,
    pub channel_retention: Arc<dyn ChannelRetention>,
}

impl Adapters {
    /// PostgreSQL-backed adapters over one shared pool.
    pub fn diesel(pool: &DbPool, lease: Duration) -> Self {
        let channel = Arc::new(DieselEventChannel::with_lease(pool.clone(), lease));
        Self {
            users: Arc::new(DieselUserStore::new(pool.clone())),
            outbox: Arc::new(DieselOutboxRepository::new(pool.clone())),
            ledger: Arc::new(DieselNotificationLedger::new(pool.clone())),
            products: Arc::new(DieselProductRepository::new(pool.clone())),
            publisher: channel.clone(),
            subscriber: channel.clone(),
            channel_retention: channel,
        }
    }

    /// In-process adapters. State is lost on restart.
    pub fn in_memory(clock: Arc<dyn Clock>, lease: Duration) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let channel = Arc::new(InMemoryEventChannel::with_lease(clock, lease));
        Self {
            users: store.clone(),
            outbox: store.clone(),
            ledger: store.clone(),
            products: store,
            publisher: channel.clone(),
            subscriber: channel.clone(),
            channel_retention: channel,
        }
    }
}

pub fn build_http_state(
    adapters: &Adapters,
    clock: Arc<dyn Clock>,
    settings: &AppSettings,
) -> HttpState {
    let registration = UserRegistrationService::new(
        adapters.users.clone(),
        Arc::new(Argon2PasswordHasher::default()),
        clock.clone(),
    )
    .with_store_timeout(settings.store_timeout());
    let catalogue = ProductCatalogueService::new(adapters.products.clone(), clock);
    HttpState::new(
        Arc::new(registration),
        Arc::new(catalogue),
        adapters.outbox.clone(),
    )
}

pub fn build_relay(adapters: &Adapters, clock: Arc<dyn Clock>, settings: &AppSettings) -> OutboxRelay {
    OutboxRelay::new(
        OutboxRelayPorts::new(adapters.outbox.clone(), adapters.publisher.clone()),
        clock,
        settings.relay_config(),
    )
    .with_channel_retention(adapters.channel_retention.clone())
}

/// # Errors
///
/// Fails when the template directory cannot be opened or the mail relay
/// client cannot be built.
pub fn build_consumer(
    adapters: &Adapters,
    clock: Arc<dyn Clock>,
    settings: &AppSettings,
) -> io::Result<UserCreatedConsumer> {
    let ports = NotificationConsumerPorts::new(
        adapters.ledger.clone(),
        build_renderer(settings)?,
        build_mailer(settings)?,
    );
    Ok(UserCreatedConsumer::new(
        ports,
        clock,
        settings.consumer_config(),
    ))
}

fn build_renderer(settings: &AppSettings) -> io::Result<Arc<dyn TemplateRenderer>> {
    let dir = settings.templates_dir();
    let renderer = FileTemplateRenderer::open(&dir).map_err(|err| {
        io::Error::new(
            err.kind(),
            format!("failed to open templates directory {}: {err}", dir.display()),
        )
    })?;
    Ok(Arc::new(renderer))
}

fn build_mailer(settings: &AppSettings) -> io::Result<Arc<dyn MailTransport>> {
    let Some(raw) = settings.mail_relay_url.as_deref() else {
        warn!("no mail relay configured; activation mail will only be logged");
        return Ok(Arc::new(TracingMailTransport));
    };
    let endpoint = Url::parse(raw)
        .map_err(|err| io::Error::other(format!("invalid mail relay url {raw:?}: {err}")))?;
    let identity = settings
        .mail_from
        .clone()
        .map_or_else(MailRelayIdentity::default, |from| MailRelayIdentity { from });
    let relay = HttpMailRelay::new(endpoint, settings.mail_timeout(), identity)
        .map_err(|err| io::Error::other(format!("failed to build mail relay client: {err}")))?;
    info!(endpoint = raw, "mail relay configured");
    Ok(Arc::new(relay))
}
