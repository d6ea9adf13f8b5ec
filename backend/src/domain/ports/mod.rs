//! Domain ports and supporting types for the hexagonal boundary.
//!
//! Driven ports (stores, channel, mail, KDF) expose strongly typed errors
//! generated by [`define_port_error!`]. Driving ports are the use cases the
//! inbound adapters call.

mod macros;
pub(crate) use macros::define_port_error;

mod event_channel;
mod notification;
mod notification_ledger;
mod outbox_repository;
mod password_hasher;
mod product_catalogue;
mod product_repository;
mod user_registration;
mod user_store;

#[cfg(test)]
pub use event_channel::{MockChannelRetention, MockEventPublisher};
pub use event_channel::{
    ChannelError, ChannelRetention, Delivery, DeliveryReceipt, EventPublisher, EventSubscriber,
    EventSubscription, PublishError,
};
#[cfg(test)]
pub use notification::{MockMailTransport, MockTemplateRenderer};
pub use notification::{MailTransport, NotificationError, TemplateError, TemplateRenderer};
#[cfg(test)]
pub use notification_ledger::MockNotificationLedger;
pub use notification_ledger::{ClaimOutcome, LedgerError, NotificationLedger};
#[cfg(test)]
pub use outbox_repository::MockOutboxRepository;
pub use outbox_repository::{OutboxRepository, OutboxRepositoryError};
#[cfg(test)]
pub use password_hasher::MockPasswordHasher;
pub use password_hasher::{PasswordHashError, PasswordHasher};
pub use product_catalogue::ProductCatalogue;
#[cfg(test)]
pub use product_repository::MockProductRepository;
pub use product_repository::{ProductRepository, ProductRepositoryError};
pub use user_registration::UserRegistration;
#[cfg(test)]
pub use user_store::MockUserStore;
pub use user_store::{UserStore, UserStoreError};
