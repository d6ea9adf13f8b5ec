//! Account registration service with transactional-outbox notification.
//!
//! - [`domain`]: validation gate, registration, outbox relay, and the
//!   activation-mail consumer, all behind port traits.
//! - [`inbound`]: actix-web handlers.
//! - [`outbound`]: PostgreSQL, in-memory, mail, and KDF adapters.
//! - [`middleware`]: request trace scoping.

pub mod domain;
pub mod inbound;
pub mod middleware;
pub mod outbound;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use middleware::Trace;
