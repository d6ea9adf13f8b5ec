//! PostgreSQL-backed `UserStore` implementation using Diesel ORM.
//!
//! `create_user_with_outbox` inserts the user row and its outbox entry in one
//! transaction: both rows commit or neither does.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::domain::ports::{UserStore, UserStoreError};
use crate::domain::{
    EmailAddress, NewOutboxEntry, NewUser, Role, Telephone, User, UserId, Username,
};

use super::diesel_error_mapping::{DieselFailure, classify_diesel_error, map_pool_error_message};
use super::models::{NewOutboxEntryRow, NewUserRow, UserRow};
use super::pool::{DbPool, PoolError};
use super::schema::{outbox_entries, users};

const EMAIL_CONSTRAINT: &str = "users_email_key";

/// Diesel-backed implementation of the `UserStore` port.
#[derive(Clone)]
pub struct DieselUserStore {
    pool: DbPool,
}

impl DieselUserStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> UserStoreError {
    UserStoreError::connection(map_pool_error_message(error))
}

fn map_diesel_error(error: diesel::result::Error, operation: &str, email: &str) -> UserStoreError {
    match classify_diesel_error(error, operation) {
        DieselFailure::UniqueViolation(constraint)
            if constraint.as_deref().is_none_or(|name| name == EMAIL_CONSTRAINT) =>
        {
            UserStoreError::duplicate_email(email)
        }
        DieselFailure::UniqueViolation(constraint) => UserStoreError::query(format!(
            "unique constraint {} violated",
            constraint.unwrap_or_default()
        )),
        DieselFailure::Connection(message) => UserStoreError::connection(message),
        DieselFailure::Query(message) => UserStoreError::query(message),
    }
}

fn row_to_user(row: UserRow) -> Result<User, UserStoreError> {
    let username = Username::parse(&row.username)
        .map_err(|err| UserStoreError::query(format!("invalid username in database: {err}")))?;
    let email = EmailAddress::parse(&row.email)
        .map_err(|err| UserStoreError::query(format!("invalid email in database: {err}")))?;
    Ok(User {
        id: UserId::from_uuid(row.id),
        username,
        email,
        telephone: Telephone::parse_optional(row.telephone.as_deref()),
        role: Role::new(row.role),
        created_at: row.created_at,
    })
}

#[async_trait]
impl UserStore for DieselUserStore {
    async fn create_user_with_outbox(
        &self,
        user: &NewUser,
        entry: &NewOutboxEntry,
    ) -> Result<User, UserStoreError> {
        let user_row = NewUserRow {
            id: *user.id.as_uuid(),
            username: user.username.as_ref(),
            email: user.email.as_ref(),
            telephone: user.telephone.as_ref().map(AsRef::as_ref),
            password_hash: user.password_hash.as_str(),
            role: user.role.as_ref(),
            created_at: user.created_at,
        };
        let entry_row = NewOutboxEntryRow {
            id: *entry.id.as_uuid(),
            aggregate_id: entry.aggregate_id,
            event_type: entry.event_type.as_str(),
            payload: &entry.payload,
            created_at: entry.created_at,
            attempts: 0,
            next_attempt_at: entry.created_at,
        };
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        conn.transaction(|conn| {
            async move {
                diesel::insert_into(users::table)
                    .values(&user_row)
                    .execute(conn)
                    .await?;
                diesel::insert_into(outbox_entries::table)
                    .values(&entry_row)
                    .execute(conn)
                    .await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await
        .map_err(|err| map_diesel_error(err, "create_user_with_outbox", user.email.as_ref()))?;

        Ok(user.to_user())
    }

    async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<User>, UserStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row: Option<UserRow> = users::table
            .filter(users::email.eq(email.as_ref()))
            .select(UserRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(|err| map_diesel_error(err, "find_by_email", email.as_ref()))?;
        row.map(row_to_user).transpose()
    }

    async fn exists_by_email(&self, email: &EmailAddress) -> Result<bool, UserStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::select(diesel::dsl::exists(
            users::table.filter(users::email.eq(email.as_ref())),
        ))
        .get_result(&mut conn)
        .await
        .map_err(|err| map_diesel_error(err, "exists_by_email", email.as_ref()))
    }

    async fn list_users(&self) -> Result<Vec<User>, UserStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<UserRow> = users::table
            .order((users::created_at.asc(), users::id.asc()))
            .select(UserRow::as_select())
            .load(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "list_users", ""))?;
        rows.into_iter().map(row_to_user).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rstest::rstest;
    use uuid::Uuid;

    #[rstest]
    fn pool_error_maps_to_connection_error() {
        let err = map_pool_error(PoolError::checkout("connection refused"));
        assert!(err.is_transient());
        assert!(err.to_string().contains("connection refused"));
    }

    #[rstest]
    fn rows_convert_to_domain_users() {
        let row = UserRow {
            id: Uuid::new_v4(),
            username: "alice".to_owned(),
            email: "alice@x.com".to_owned(),
            telephone: Some("555-0100".to_owned()),
            role: "ROLE_USER".to_owned(),
            created_at: Utc::now(),
        };
        let user = row_to_user(row).expect("valid row");
        assert_eq!(user.email.as_ref(), "alice@x.com");
        assert_eq!(user.telephone.map(|t| t.as_ref().to_owned()).as_deref(), Some("555-0100"));
    }

    #[rstest]
    fn corrupt_email_is_a_query_error() {
        let row = UserRow {
            id: Uuid::new_v4(),
            username: "alice".to_owned(),
            email: "nope".to_owned(),
            telephone: None,
            role: "ROLE_USER".to_owned(),
            created_at: Utc::now(),
        };
        assert!(matches!(row_to_user(row), Err(UserStoreError::Query { .. })));
    }
}
