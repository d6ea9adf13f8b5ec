//! Account validation tokens issued after a `UserCreated` event is received.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use uuid::Uuid;

use super::outbox::EventId;
use super::user::EmailAddress;

/// Default lifetime of a validation token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const TOKEN_BYTES: usize = 32;

/// Random, single-use token mailed to a new account.
///
/// ## Invariants
/// - `expires_at == created_at + ttl` for the ttl it was issued with.
/// - `token` is 64 lower-case hex characters drawn from the OS RNG.
#[derive(Clone, PartialEq, Eq)]
pub struct ValidationToken {
    /// Row identifier.
    pub id: Uuid,
    /// Secret sent in the activation link.
    pub token: String,
    /// Address the token was mailed to.
    pub email: EmailAddress,
    /// Event that caused the token to be issued.
    pub event_id: EventId,
    /// Issue time.
    pub created_at: DateTime<Utc>,
    /// Time after which the token is rejected.
    pub expires_at: DateTime<Utc>,
}

impl ValidationToken {
    /// Issue a token for the event that announced `email`.
    ///
    /// # Examples
    /// ```
    /// use accounts::domain::{DEFAULT_TOKEN_TTL, EmailAddress, EventId, ValidationToken};
    /// use chrono::{TimeDelta, Utc};
    ///
    /// let now = Utc::now();
    /// let email = EmailAddress::parse("alice@x.com").expect("email");
    /// let token = ValidationToken::issue(email, EventId::random(), now, DEFAULT_TOKEN_TTL);
    /// assert_eq!(token.expires_at - token.created_at, TimeDelta::hours(24));
    /// ```
    pub fn issue(
        email: EmailAddress,
        event_id: EventId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let mut bytes = [0_u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        Self {
            id: Uuid::new_v4(),
            token: hex::encode(bytes),
            email,
            event_id,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Has the token lapsed at `now`?
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for ValidationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationToken")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("event_id", &self.event_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
