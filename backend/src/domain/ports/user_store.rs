//! Port for the user store, including the atomic user + outbox write.

use async_trait::async_trait;

use crate::domain::{EmailAddress, NewOutboxEntry, NewUser, User};

use super::define_port_error;

define_port_error! {
    /// Failures raised by user store adapters.
    pub enum UserStoreError {
        /// The store could not be reached or did not answer in time.
        Connection { message: String } => "user store connection failed: {message}" [transient],
        /// Another account already owns this email address.
        DuplicateEmail { email: String } => "email already registered: {email}",
        /// Query or mutation failed during execution.
        Query { message: String } => "user store query failed: {message}",
    }
}

/// Durable storage for users and the events their creation emits.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Persist `user` and `entry` in one transaction: either both rows are
    /// visible afterwards or neither is. A unique-email race surfaces as
    /// [`UserStoreError::DuplicateEmail`] with nothing written.
    async fn create_user_with_outbox(
        &self,
        user: &NewUser,
        entry: &NewOutboxEntry,
    ) -> Result<User, UserStoreError>;

    /// Look up a user by normalised email.
    async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<User>, UserStoreError>;

    /// Read-only existence check used by the validation gate.
    async fn exists_by_email(&self, email: &EmailAddress) -> Result<bool, UserStoreError>;

    /// All users, oldest first.
    async fn list_users(&self) -> Result<Vec<User>, UserStoreError>;
}
