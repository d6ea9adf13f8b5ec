//! PostgreSQL-backed processed-event ledger.
//!
//! A claim inserts the `processed_events` row with `ON CONFLICT DO NOTHING`
//! and, only when a row was inserted, the validation token, all in one
//! transaction. Concurrent consumers racing on the same event id therefore
//! see exactly one `Claimed`.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::domain::ports::{ClaimOutcome, LedgerError, NotificationLedger};
use crate::domain::{EventId, ValidationToken};

use super::diesel_error_mapping::{DieselFailure, classify_diesel_error, map_pool_error_message};
use super::models::{NewProcessedEventRow, NewValidationTokenRow};
use super::pool::{DbPool, PoolError};
use super::schema::{processed_events, validation_tokens};

/// Diesel-backed implementation of the `NotificationLedger` port.
#[derive(Clone)]
pub struct DieselNotificationLedger {
    pool: DbPool,
}

impl DieselNotificationLedger {
    /// Create a new ledger with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> LedgerError {
    LedgerError::connection(map_pool_error_message(error))
}

fn map_diesel_error(error: diesel::result::Error, operation: &str) -> LedgerError {
    match classify_diesel_error(error, operation) {
        DieselFailure::Connection(message) => LedgerError::connection(message),
        DieselFailure::UniqueViolation(constraint) => LedgerError::query(format!(
            "unique constraint {} violated",
            constraint.unwrap_or_default()
        )),
        DieselFailure::Query(message) => LedgerError::query(message),
    }
}

#[async_trait]
impl NotificationLedger for DieselNotificationLedger {
    async fn claim(
        &self,
        event_id: EventId,
        event_type: &str,
        token: &ValidationToken,
    ) -> Result<ClaimOutcome, LedgerError> {
        let ledger_row = NewProcessedEventRow {
            event_id: *event_id.as_uuid(),
            event_type,
            processed_at: Utc::now(),
        };
        let token_row = NewValidationTokenRow {
            id: token.id,
            token: token.token.as_str(),
            email: token.email.as_ref(),
            event_id: *token.event_id.as_uuid(),
            created_at: token.created_at,
            expires_at: token.expires_at,
        };
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        conn.transaction(|conn| {
            async move {
                let inserted = diesel::insert_into(processed_events::table)
                    .values(&ledger_row)
                    .on_conflict(processed_events::event_id)
                    .do_nothing()
                    .execute(conn)
                    .await?;
                if inserted == 0 {
                    return Ok(ClaimOutcome::AlreadyProcessed);
                }
                diesel::insert_into(validation_tokens::table)
                    .values(&token_row)
                    .execute(conn)
                    .await?;
                Ok(ClaimOutcome::Claimed)
            }
            .scope_boxed()
        })
        .await
        .map_err(|err| map_diesel_error(err, "claim"))
    }

    async fn release(&self, event_id: EventId) -> Result<(), LedgerError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        conn.transaction(|conn| {
            async move {
                diesel::delete(
                    validation_tokens::table
                        .filter(validation_tokens::event_id.eq(event_id.as_uuid())),
                )
                .execute(conn)
                .await?;
                diesel::delete(
                    processed_events::table
                        .filter(processed_events::event_id.eq(event_id.as_uuid())),
                )
                .execute(conn)
                .await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await
        .map_err(|err| map_diesel_error(err, "release"))
    }
}
