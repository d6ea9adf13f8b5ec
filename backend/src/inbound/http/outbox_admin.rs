//! Operator view of dead-lettered outbox entries.
//!
//! ```text
//! GET /api/v1/admin/outbox/dead-letters?limit=50
//! ```

use actix_web::{get, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::domain::ports::OutboxRepositoryError;
use crate::domain::{Error, OutboxEntry};
use crate::inbound::http::ApiResult;
use crate::inbound::http::state::HttpState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 200;

/// Query string for the dead-letter listing.
#[derive(Debug, Default, Deserialize)]
pub struct DeadLetterQuery {
    /// Maximum entries to return; clamped to 200.
    pub limit: Option<usize>,
}

/// One dead-lettered outbox entry.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterResponse {
    /// Outbox entry id.
    pub event_id: Uuid,
    /// User the event belongs to.
    pub aggregate_id: Uuid,
    /// Event name.
    pub event_type: String,
    /// Event body.
    pub payload: Value,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
    /// Publish attempts before giving up.
    pub attempts: u32,
    /// Failure that caused the dead-letter.
    pub last_error: Option<String>,
    /// When the relay gave up.
    pub dead_lettered_at: Option<DateTime<Utc>>,
}

impl From<OutboxEntry> for DeadLetterResponse {
    fn from(entry: OutboxEntry) -> Self {
        Self {
            event_id: *entry.id.as_uuid(),
            aggregate_id: entry.aggregate_id,
            event_type: entry.event_type,
            payload: entry.payload,
            created_at: entry.created_at,
            attempts: entry.attempts,
            last_error: entry.last_error,
            dead_lettered_at: entry.dead_lettered_at,
        }
    }
}

fn resolve_limit(requested: Option<usize>) -> Result<usize, Error> {
    match requested {
        None => Ok(DEFAULT_LIMIT),
        Some(limit) if (1..=MAX_LIMIT).contains(&limit) => Ok(limit),
        Some(limit) => Err(Error::invalid_request(format!(
            "limit must be between 1 and {MAX_LIMIT}"
        ))
        .with_details(json!({ "field": "limit", "value": limit }))),
    }
}

fn map_outbox_error(error: OutboxRepositoryError) -> Error {
    match error {
        OutboxRepositoryError::Connection { message } => {
            Error::service_unavailable(format!("outbox unavailable: {message}"))
        }
        OutboxRepositoryError::Query { message } => {
            Error::internal(format!("outbox query failed: {message}"))
        }
    }
}

/// Most recently dead-lettered entries first.
#[get("/admin/outbox/dead-letters")]
pub async fn list_dead_letters(
    state: web::Data<HttpState>,
    query: web::Query<DeadLetterQuery>,
) -> ApiResult<web::Json<Vec<DeadLetterResponse>>> {
    let limit = resolve_limit(query.limit)?;
    let entries = state
        .outbox
        .list_dead_lettered(limit)
        .await
        .map_err(map_outbox_error)?;
    Ok(web::Json(
        entries.into_iter().map(DeadLetterResponse::from).collect(),
    ))
}
