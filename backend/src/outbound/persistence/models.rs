//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain. Conversions into domain types live next to
//! the repositories that read them.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use super::schema::{
    channel_messages, outbox_entries, processed_events, products, users, validation_tokens,
};

/// Row struct for reading from the users table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub telephone: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

/// Insertable struct for creating new user records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub(crate) struct NewUserRow<'a> {
    pub id: Uuid,
    pub username: &'a str,
    pub email: &'a str,
    pub telephone: Option<&'a str>,
    pub password_hash: &'a str,
    pub role: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Row struct for reading outbox entries, also used by raw SQL reads.
#[derive(Debug, Clone, Queryable, Selectable, QueryableByName)]
#[diesel(table_name = outbox_entries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct OutboxEntryRow {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub dead_lettered_at: Option<DateTime<Utc>>,
}

/// Insertable struct for new outbox entries. `seq` is assigned by the
/// database.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = outbox_entries)]
pub(crate) struct NewOutboxEntryRow<'a> {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: &'a str,
    pub payload: &'a Value,
    pub created_at: DateTime<Utc>,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
}

/// Insertable processed-event ledger row.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = processed_events)]
pub(crate) struct NewProcessedEventRow<'a> {
    pub event_id: Uuid,
    pub event_type: &'a str,
    pub processed_at: DateTime<Utc>,
}

/// Insertable validation token row.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = validation_tokens)]
pub(crate) struct NewValidationTokenRow<'a> {
    pub id: Uuid,
    pub token: &'a str,
    pub email: &'a str,
    pub event_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Insertable channel message row.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = channel_messages)]
pub(crate) struct NewChannelMessageRow<'a> {
    pub topic: &'a str,
    pub message_key: &'a str,
    pub event_id: Uuid,
    pub envelope: Value,
    pub visible_at: DateTime<Utc>,
}

/// Channel message claimed by a subscription.
#[derive(Debug, Clone, QueryableByName)]
#[diesel(table_name = channel_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct ClaimedMessageRow {
    pub envelope: Value,
    pub deliveries: i32,
    pub receipt: Option<Uuid>,
}

/// Row struct for reading and upserting products.
#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub(crate) struct ProductRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub sub_category: Option<String>,
    pub image_url: Option<String>,
    pub package_type: Option<String>,
    pub content: Option<String>,
    pub price_minor: i64,
    pub currency: String,
    pub active: bool,
    pub stock: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
