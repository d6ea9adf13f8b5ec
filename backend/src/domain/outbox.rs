//! Outbox entries and the event envelope they become on the wire.
//!
//! An entry is written in the same transaction as the aggregate change that
//! produced it. The relay later turns it into exactly one [`EventEnvelope`]
//! whose `event_id` equals the entry id, which lets consumers deduplicate
//! redeliveries.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use super::user::NewUser;

/// Event type written when a user registers.
pub const USER_CREATED_EVENT: &str = "UserCreated";

/// Identifier shared by an outbox entry and the envelope published for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Allocate a fresh identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an identifier read back from storage.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Body of a `UserCreated` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreatedPayload {
    /// Address the activation mail goes to.
    pub email: String,
    /// Name used to greet the user.
    pub username: String,
}

impl UserCreatedPayload {
    /// JSON form stored in the outbox.
    pub fn to_value(&self) -> Value {
        json!({
            "email": self.email,
            "username": self.username,
        })
    }
}

/// Outbox row about to be inserted next to its aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEntry {
    /// Event id, reused as the envelope id.
    pub id: EventId,
    /// User the event belongs to.
    pub aggregate_id: Uuid,
    /// Event name, such as `UserCreated`.
    pub event_type: String,
    /// Event body as JSON.
    pub payload: Value,
    /// When the aggregate change was committed.
    pub created_at: DateTime<Utc>,
}

impl NewOutboxEntry {
    /// The `UserCreated` entry for a user about to be written.
    ///
    /// # Examples
    /// ```
    /// use accounts::domain::{
    ///     EmailAddress, NewOutboxEntry, NewUser, PasswordHash, Role, USER_CREATED_EVENT,
    ///     UserId, Username,
    /// };
    /// use chrono::Utc;
    ///
    /// let user = NewUser {
    ///     id: UserId::random(),
    ///     username: Username::parse("alice").expect("username"),
    ///     email: EmailAddress::parse("alice@x.com").expect("email"),
    ///     telephone: None,
    ///     password_hash: PasswordHash::new("hash"),
    ///     role: Role::default(),
    ///     created_at: Utc::now(),
    /// };
    /// let entry = NewOutboxEntry::user_created(&user);
    /// assert_eq!(entry.event_type, USER_CREATED_EVENT);
    /// assert_eq!(&entry.aggregate_id, user.id.as_uuid());
    /// ```
    pub fn user_created(user: &NewUser) -> Self {
        let payload = UserCreatedPayload {
            email: user.email.to_string(),
            username: user.username.to_string(),
        };
        Self {
            id: EventId::random(),
            aggregate_id: *user.id.as_uuid(),
            event_type: USER_CREATED_EVENT.to_owned(),
            payload: payload.to_value(),
            created_at: user.created_at,
        }
    }
}

/// Persisted outbox row together with its delivery bookkeeping.
///
/// ## Invariants
/// - Pending means neither `published_at` nor `dead_lettered_at` is set.
/// - `published_at`, once set, is never cleared or overwritten.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    /// Event id, reused as the envelope id.
    pub id: EventId,
    /// User the event belongs to.
    pub aggregate_id: Uuid,
    /// Event name, such as `UserCreated`.
    pub event_type: String,
    /// Event body as JSON.
    pub payload: Value,
    /// When the aggregate change was committed.
    pub created_at: DateTime<Utc>,
    /// Set once the channel acknowledged the envelope.
    pub published_at: Option<DateTime<Utc>>,
    /// Failed publish attempts so far.
    pub attempts: u32,
    /// Earliest time the relay may try again.
    pub next_attempt_at: DateTime<Utc>,
    /// Most recent publish failure.
    pub last_error: Option<String>,
    /// Set when the relay gave up on the entry.
    pub dead_lettered_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// Materialise a freshly inserted entry.
    pub fn from_new(entry: NewOutboxEntry) -> Self {
        Self {
            id: entry.id,
            aggregate_id: entry.aggregate_id,
            event_type: entry.event_type,
            payload: entry.payload,
            created_at: entry.created_at,
            published_at: None,
            attempts: 0,
            next_attempt_at: entry.created_at,
            last_error: None,
            dead_lettered_at: None,
        }
    }

    /// Still waiting for the relay.
    pub fn is_pending(&self) -> bool {
        self.published_at.is_none() && self.dead_lettered_at.is_none()
    }
}

/// Message published to the channel for one outbox entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Outbox entry id; consumers deduplicate on it.
    pub event_id: EventId,
    /// Event name, such as `UserCreated`.
    pub event_type: String,
    /// User the event belongs to; also the ordering key.
    pub aggregate_id: Uuid,
    /// Event body as JSON.
    pub payload: Value,
    /// When the aggregate change was committed.
    pub occurred_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Build the envelope for an outbox entry.
    pub fn from_outbox(entry: &OutboxEntry) -> Self {
        Self {
            event_id: entry.id,
            event_type: entry.event_type.clone(),
            aggregate_id: entry.aggregate_id,
            payload: entry.payload.clone(),
            occurred_at: entry.created_at,
        }
    }

    /// Decode the payload into a typed event body.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}
