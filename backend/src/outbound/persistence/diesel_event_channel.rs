//! PostgreSQL-backed message channel.
//!
//! Messages live in `channel_messages`. A subscription claims the oldest
//! visible message with `FOR UPDATE SKIP LOCKED`, stamps a fresh receipt, and
//! leases it; ack, retry, and dead-letter address the message by receipt.
//! A message is held back while an older unsettled message with the same key
//! exists, which keeps per-aggregate order. Each topic serves one consumer
//! group. Settled rows stay behind as the `(topic, event_id)` dedup record
//! until [`ChannelRetention::purge_settled_before`] removes them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{Text, Timestamptz, Uuid as SqlUuid};
use diesel_async::pooled_connection::bb8::PooledConnection;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::warn;
use uuid::Uuid;

use crate::domain::EventEnvelope;
use crate::domain::ports::{
    ChannelError, ChannelRetention, Delivery, DeliveryReceipt, EventPublisher, EventSubscriber,
    EventSubscription, PublishError,
};

use super::diesel_error_mapping::{DieselFailure, classify_diesel_error, map_pool_error_message};
use super::models::{ClaimedMessageRow, NewChannelMessageRow};
use super::pool::DbPool;
use super::schema::channel_messages;

/// Default time a delivery stays invisible while a consumer works on it.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

const CLAIM_NEXT_SQL: &str = r#"
UPDATE channel_messages m
SET deliveries = m.deliveries + 1,
    leased_until = $3,
    receipt = $4
WHERE m.seq = (
    SELECT c.seq
    FROM channel_messages c
    WHERE c.topic = $1
      AND c.settled_at IS NULL
      AND c.visible_at <= $2
      AND (c.leased_until IS NULL OR c.leased_until <= $2)
      AND NOT EXISTS (
          SELECT 1
          FROM channel_messages o
          WHERE o.topic = c.topic
            AND o.message_key = c.message_key
            AND o.settled_at IS NULL
            AND o.seq < c.seq
      )
    ORDER BY c.seq
    LIMIT 1
    FOR UPDATE SKIP LOCKED
)
RETURNING m.envelope, m.deliveries, m.receipt
"#;

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now.checked_add_signed(TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn channel_error(error: diesel::result::Error, operation: &str) -> ChannelError {
    match classify_diesel_error(error, operation) {
        DieselFailure::Connection(message) | DieselFailure::Query(message) => {
            ChannelError::unavailable(message)
        }
        DieselFailure::UniqueViolation(_) => ChannelError::unavailable("unique constraint violated"),
    }
}

/// Diesel-backed channel implementing both publisher and subscriber ports.
#[derive(Clone)]
pub struct DieselEventChannel {
    pool: DbPool,
    lease: Duration,
}

impl DieselEventChannel {
    /// Create a channel with the default lease.
    pub fn new(pool: DbPool) -> Self {
        Self::with_lease(pool, DEFAULT_LEASE)
    }

    /// Create a channel whose deliveries stay leased for `lease`.
    pub fn with_lease(pool: DbPool, lease: Duration) -> Self {
        Self { pool, lease }
    }
}

#[async_trait]
impl EventPublisher for DieselEventChannel {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), PublishError> {
        let body = serde_json::to_value(envelope)
            .map_err(|err| PublishError::rejected(format!("envelope encoding failed: {err}")))?;
        let row = NewChannelMessageRow {
            topic,
            message_key: key,
            event_id: *envelope.event_id.as_uuid(),
            envelope: body,
            visible_at: Utc::now(),
        };
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| PublishError::unavailable(map_pool_error_message(err)))?;
        diesel::insert_into(channel_messages::table)
            .values(&row)
            .on_conflict((channel_messages::topic, channel_messages::event_id))
            .do_nothing()
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(|err| match classify_diesel_error(err, "publish") {
                DieselFailure::Connection(message)
                | DieselFailure::Query(message) => PublishError::unavailable(message),
                DieselFailure::UniqueViolation(_) => {
                    PublishError::unavailable("unique constraint violated")
                }
            })
    }
}

#[async_trait]
impl ChannelRetention for DieselEventChannel {
    async fn purge_settled_before(&self, cutoff: DateTime<Utc>) -> Result<u64, ChannelError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| ChannelError::unavailable(map_pool_error_message(err)))?;
        let deleted = diesel::delete(
            channel_messages::table.filter(channel_messages::settled_at.lt(cutoff)),
        )
        .execute(&mut conn)
        .await
        .map_err(|err| channel_error(err, "purge_settled_before"))?;
        Ok(u64::try_from(deleted).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl EventSubscriber for DieselEventChannel {
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn EventSubscription>, ChannelError> {
        tracing::debug!(topic, group, "postgres subscription opened");
        Ok(Box::new(DieselSubscription {
            pool: self.pool.clone(),
            topic: topic.to_owned(),
            lease: self.lease,
        }))
    }
}

struct DieselSubscription {
    pool: DbPool,
    topic: String,
    lease: Duration,
}

fn parse_receipt(receipt: &DeliveryReceipt) -> Result<Uuid, ChannelError> {
    Uuid::parse_str(receipt.as_str()).map_err(|_| ChannelError::unknown_receipt(receipt.as_str()))
}

/// A settle that matched no row means the lease lapsed or the receipt is stale.
fn ensure_matched(updated: usize, receipt: &DeliveryReceipt) -> Result<(), ChannelError> {
    if updated == 0 {
        return Err(ChannelError::unknown_receipt(receipt.as_str()));
    }
    Ok(())
}

impl DieselSubscription {
    async fn connection(
        &self,
    ) -> Result<PooledConnection<'_, AsyncPgConnection>, ChannelError> {
        self.pool
            .get()
            .await
            .map_err(|err| ChannelError::unavailable(map_pool_error_message(err)))
    }

    async fn park_malformed(&self, receipt: Uuid, reason: &str) {
        let parked = match self.pool.get().await {
            Ok(mut conn) => diesel::update(
                channel_messages::table.filter(channel_messages::receipt.eq(receipt)),
            )
            .set((
                channel_messages::settled_at.eq(Some(Utc::now())),
                channel_messages::dead_letter_reason.eq(Some(reason)),
                channel_messages::receipt.eq(None::<Uuid>),
            ))
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(|err| err.to_string()),
            Err(err) => Err(map_pool_error_message(err)),
        };
        if let Err(error) = parked {
            warn!(%receipt, %error, "failed to park malformed channel message");
        }
    }
}

#[async_trait]
impl EventSubscription for DieselSubscription {
    async fn receive(&self) -> Result<Option<Delivery>, ChannelError> {
        let now = Utc::now();
        let mut conn = self.connection().await?;
        let claimed: Option<ClaimedMessageRow> = sql_query(CLAIM_NEXT_SQL)
            .bind::<Text, _>(self.topic.as_str())
            .bind::<Timestamptz, _>(now)
            .bind::<Timestamptz, _>(after(now, self.lease))
            .bind::<SqlUuid, _>(Uuid::new_v4())
            .get_result(&mut conn)
            .await
            .optional()
            .map_err(|err| channel_error(err, "receive"))?;
        drop(conn);

        let Some(row) = claimed else {
            return Ok(None);
        };
        let receipt = row
            .receipt
            .ok_or_else(|| ChannelError::malformed("claimed message has no receipt"))?;
        let envelope: EventEnvelope = match serde_json::from_value(row.envelope) {
            Ok(envelope) => envelope,
            Err(err) => {
                let reason = format!("undecodable envelope: {err}");
                self.park_malformed(receipt, &reason).await;
                return Err(ChannelError::malformed(reason));
            }
        };
        Ok(Some(Delivery {
            envelope,
            attempt: u32::try_from(row.deliveries).unwrap_or(1),
            receipt: DeliveryReceipt::new(receipt.to_string()),
        }))
    }

    async fn ack(&self, receipt: &DeliveryReceipt) -> Result<(), ChannelError> {
        let receipt_id = parse_receipt(receipt)?;
        let mut conn = self.connection().await?;
        let updated = diesel::update(
            channel_messages::table
                .filter(channel_messages::topic.eq(self.topic.as_str()))
                .filter(channel_messages::receipt.eq(receipt_id))
                .filter(channel_messages::settled_at.is_null()),
        )
        .set((
            channel_messages::settled_at.eq(Some(Utc::now())),
            channel_messages::receipt.eq(None::<Uuid>),
            channel_messages::leased_until.eq(None::<DateTime<Utc>>),
        ))
        .execute(&mut conn)
        .await
        .map_err(|err| channel_error(err, "ack"))?;
        ensure_matched(updated, receipt)
    }

    async fn retry(&self, receipt: &DeliveryReceipt, delay: Duration) -> Result<(), ChannelError> {
        let receipt_id = parse_receipt(receipt)?;
        let mut conn = self.connection().await?;
        let updated = diesel::update(
            channel_messages::table
                .filter(channel_messages::topic.eq(self.topic.as_str()))
                .filter(channel_messages::receipt.eq(receipt_id))
                .filter(channel_messages::settled_at.is_null()),
        )
        .set((
            channel_messages::visible_at.eq(after(Utc::now(), delay)),
            channel_messages::receipt.eq(None::<Uuid>),
            channel_messages::leased_until.eq(None::<DateTime<Utc>>),
        ))
        .execute(&mut conn)
        .await
        .map_err(|err| channel_error(err, "retry"))?;
        ensure_matched(updated, receipt)
    }

    async fn dead_letter(
        &self,
        receipt: &DeliveryReceipt,
        reason: &str,
    ) -> Result<(), ChannelError> {
        let receipt_id = parse_receipt(receipt)?;
        let mut conn = self.connection().await?;
        let updated = diesel::update(
            channel_messages::table
                .filter(channel_messages::topic.eq(self.topic.as_str()))
                .filter(channel_messages::receipt.eq(receipt_id))
                .filter(channel_messages::settled_at.is_null()),
        )
        .set((
            channel_messages::settled_at.eq(Some(Utc::now())),
            channel_messages::dead_letter_reason.eq(Some(reason)),
            channel_messages::receipt.eq(None::<Uuid>),
            channel_messages::leased_until.eq(None::<DateTime<Utc>>),
        ))
        .execute(&mut conn)
        .await
        .map_err(|err| channel_error(err, "dead_letter"))?;
        ensure_matched(updated, receipt)
    }
}
