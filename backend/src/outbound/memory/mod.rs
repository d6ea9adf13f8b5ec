//! In-process adapters for running without PostgreSQL.
//!
//! [`InMemoryStore`] keeps users, outbox entries, the notification ledger,
//! and products behind one mutex so the user + outbox write stays atomic.
//! [`InMemoryEventChannel`] is a single-process topic with leases, delayed
//! redelivery, a dead-letter list, and a retention purge for settled
//! messages. Both are used by the integration
//! tests and by the server when no database URL is configured.

mod channel;
mod store;

pub use channel::{DeadLetteredMessage, InMemoryEventChannel};
pub use store::InMemoryStore;
