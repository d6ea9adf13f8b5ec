//! PostgreSQL-backed `OutboxRepository` implementation.
//!
//! The pending read is raw SQL because it filters on a correlated
//! `NOT EXISTS` over the same table: an entry is withheld while an older
//! pending entry of the same aggregate exists. Every settle call is its own
//! short statement; no transaction spans a publish.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Timestamptz};
use diesel_async::RunQueryDsl;

use crate::domain::ports::{OutboxRepository, OutboxRepositoryError};
use crate::domain::{EventId, OutboxEntry};

use super::diesel_error_mapping::{DieselFailure, classify_diesel_error, map_pool_error_message};
use super::models::OutboxEntryRow;
use super::pool::{DbPool, PoolError};
use super::schema::outbox_entries;

const FETCH_PENDING_SQL: &str = r#"
SELECT e.id, e.aggregate_id, e.event_type, e.payload, e.created_at, e.published_at,
       e.attempts, e.next_attempt_at, e.last_error, e.dead_lettered_at
FROM outbox_entries e
WHERE e.published_at IS NULL
  AND e.dead_lettered_at IS NULL
  AND e.next_attempt_at <= $1
  AND NOT EXISTS (
      SELECT 1
      FROM outbox_entries older
      WHERE older.aggregate_id = e.aggregate_id
        AND older.published_at IS NULL
        AND older.dead_lettered_at IS NULL
        AND (older.created_at, older.seq) < (e.created_at, e.seq)
  )
ORDER BY e.created_at, e.seq
LIMIT $2
"#;

/// Diesel-backed implementation of the `OutboxRepository` port.
#[derive(Clone)]
pub struct DieselOutboxRepository {
    pool: DbPool,
}

impl DieselOutboxRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> OutboxRepositoryError {
    OutboxRepositoryError::connection(map_pool_error_message(error))
}

fn map_diesel_error(error: diesel::result::Error, operation: &str) -> OutboxRepositoryError {
    match classify_diesel_error(error, operation) {
        DieselFailure::Connection(message) => OutboxRepositoryError::connection(message),
        DieselFailure::UniqueViolation(_) => {
            OutboxRepositoryError::query("unique constraint violated")
        }
        DieselFailure::Query(message) => OutboxRepositoryError::query(message),
    }
}

fn row_to_entry(row: OutboxEntryRow) -> OutboxEntry {
    OutboxEntry {
        id: EventId::from_uuid(row.id),
        aggregate_id: row.aggregate_id,
        event_type: row.event_type,
        payload: row.payload,
        created_at: row.created_at,
        published_at: row.published_at,
        attempts: u32::try_from(row.attempts).unwrap_or(0),
        next_attempt_at: row.next_attempt_at,
        last_error: row.last_error,
        dead_lettered_at: row.dead_lettered_at,
    }
}

fn limit_to_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl OutboxRepository for DieselOutboxRepository {
    async fn fetch_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<OutboxEntryRow> = sql_query(FETCH_PENDING_SQL)
            .bind::<Timestamptz, _>(now)
            .bind::<BigInt, _>(limit_to_i64(limit))
            .load(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "fetch_pending"))?;
        Ok(rows.into_iter().map(row_to_entry).collect())
    }

    async fn mark_published(
        &self,
        id: EventId,
        at: DateTime<Utc>,
    ) -> Result<bool, OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let updated = diesel::update(
            outbox_entries::table
                .filter(outbox_entries::id.eq(id.as_uuid()))
                .filter(outbox_entries::published_at.is_null()),
        )
        .set(outbox_entries::published_at.eq(Some(at)))
        .execute(&mut conn)
        .await
        .map_err(|err| map_diesel_error(err, "mark_published"))?;
        Ok(updated > 0)
    }

    async fn record_failure(
        &self,
        id: EventId,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::update(outbox_entries::table.filter(outbox_entries::id.eq(id.as_uuid())))
            .set((
                outbox_entries::attempts.eq(i32::try_from(attempts).unwrap_or(i32::MAX)),
                outbox_entries::next_attempt_at.eq(next_attempt_at),
                outbox_entries::last_error.eq(Some(error)),
            ))
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(|err| map_diesel_error(err, "record_failure"))
    }

    async fn mark_dead_lettered(
        &self,
        id: EventId,
        at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::update(outbox_entries::table.filter(outbox_entries::id.eq(id.as_uuid())))
            .set((
                outbox_entries::attempts.eq(outbox_entries::attempts + 1),
                outbox_entries::dead_lettered_at.eq(Some(at)),
                outbox_entries::last_error.eq(Some(error)),
            ))
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(|err| map_diesel_error(err, "mark_dead_lettered"))
    }

    async fn list_dead_lettered(
        &self,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<OutboxEntryRow> = outbox_entries::table
            .filter(outbox_entries::dead_lettered_at.is_not_null())
            .order(outbox_entries::dead_lettered_at.desc())
            .limit(limit_to_i64(limit))
            .select(OutboxEntryRow::as_select())
            .load(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "list_dead_lettered"))?;
        Ok(rows.into_iter().map(row_to_entry).collect())
    }

    async fn purge_published_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let deleted = diesel::delete(
            outbox_entries::table.filter(outbox_entries::published_at.lt(cutoff)),
        )
        .execute(&mut conn)
        .await
        .map_err(|err| map_diesel_error(err, "purge_published_before"))?;
        Ok(u64::try_from(deleted).unwrap_or(u64::MAX))
    }
}
