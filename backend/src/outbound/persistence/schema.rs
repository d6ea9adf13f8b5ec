//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match `backend/migrations` exactly. When a
//! migration changes the schema, update this file (or regenerate it with
//! `diesel print-schema`).

diesel::table! {
    /// Registered accounts. `email` carries a unique constraint.
    users (id) {
        id -> Uuid,
        username -> Varchar,
        email -> Varchar,
        telephone -> Nullable<Varchar>,
        password_hash -> Text,
        role -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Events waiting to be relayed, written in the same transaction as the
    /// aggregate change. `seq` breaks ties between equal `created_at`.
    outbox_entries (id) {
        id -> Uuid,
        seq -> Int8,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        payload -> Jsonb,
        created_at -> Timestamptz,
        published_at -> Nullable<Timestamptz>,
        attempts -> Int4,
        next_attempt_at -> Timestamptz,
        last_error -> Nullable<Text>,
        dead_lettered_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    /// Processed-event ledger. The primary key is the dedup constraint.
    processed_events (event_id) {
        event_id -> Uuid,
        event_type -> Varchar,
        processed_at -> Timestamptz,
    }
}

diesel::table! {
    /// Account validation tokens, one per processed `UserCreated` event.
    validation_tokens (id) {
        id -> Uuid,
        token -> Varchar,
        email -> Varchar,
        event_id -> Uuid,
        created_at -> Timestamptz,
        expires_at -> Timestamptz,
    }
}

diesel::table! {
    /// Durable message channel. `(topic, event_id)` is unique so republishing
    /// an envelope is a no-op.
    channel_messages (seq) {
        seq -> Int8,
        topic -> Varchar,
        message_key -> Varchar,
        event_id -> Uuid,
        envelope -> Jsonb,
        deliveries -> Int4,
        visible_at -> Timestamptz,
        leased_until -> Nullable<Timestamptz>,
        receipt -> Nullable<Uuid>,
        settled_at -> Nullable<Timestamptz>,
        dead_letter_reason -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Product catalogue.
    products (id) {
        id -> Uuid,
        name -> Varchar,
        description -> Nullable<Text>,
        category -> Varchar,
        sub_category -> Nullable<Varchar>,
        image_url -> Nullable<Text>,
        package_type -> Nullable<Varchar>,
        content -> Nullable<Varchar>,
        price_minor -> Int8,
        currency -> Varchar,
        active -> Bool,
        stock -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(validation_tokens -> processed_events (event_id));

diesel::allow_tables_to_appear_in_same_query!(
    channel_messages,
    outbox_entries,
    processed_events,
    products,
    users,
    validation_tokens,
);
