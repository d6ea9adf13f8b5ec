//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! Concrete implementations of the domain's driven ports backed by
//! PostgreSQL through `diesel-async` and `bb8`.
//!
//! - **Thin adapters**: repositories only translate between Diesel rows and
//!   domain types.
//! - **Internal models**: row structs (`models.rs`) and table definitions
//!   (`schema.rs`) never leave this module.
//! - **Strongly typed errors**: every Diesel failure is mapped onto the port
//!   error of the adapter that hit it.
//!
//! # Example
//!
//! ```ignore
//! use accounts::outbound::persistence::{DbPool, DieselUserStore, PoolConfig};
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/accounts")).await?;
//! let store = DieselUserStore::new(pool);
//! ```

mod diesel_error_mapping;
mod diesel_event_channel;
mod diesel_notification_ledger;
mod diesel_outbox_repository;
mod diesel_product_repository;
mod diesel_user_store;
mod migrations;
mod models;
mod pool;
mod schema;

pub use diesel_event_channel::DieselEventChannel;
pub use diesel_notification_ledger::DieselNotificationLedger;
pub use diesel_outbox_repository::DieselOutboxRepository;
pub use diesel_product_repository::DieselProductRepository;
pub use diesel_user_store::DieselUserStore;
pub use migrations::{MigrationError, run_pending_migrations};
pub use pool::{DbPool, PoolConfig, PoolError};
