//! Registration use case: validation gate, password hashing, and the atomic
//! user + outbox write.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockable::Clock;
use tracing::{debug, info, warn};

use super::ports::{PasswordHashError, PasswordHasher, UserRegistration, UserStore, UserStoreError};
use super::{
    Error, NewOutboxEntry, NewUser, RegistrationForm, RegistrationRejected, RegistrationViolation,
    Role, User, UserId, validate_registration, well_formed_email,
};

/// Default upper bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a registration did not produce a user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// The request broke one or more rules; nothing was written.
    #[error("registration rejected: {0}")]
    Rejected(RegistrationRejected),
    /// The store failed or timed out; nothing was written.
    #[error(transparent)]
    Persistence(UserStoreError),
    /// The KDF failed before anything was written.
    #[error(transparent)]
    Hashing(PasswordHashError),
}

impl From<RegistrationError> for Error {
    fn from(value: RegistrationError) -> Self {
        match value {
            RegistrationError::Rejected(rejected) => {
                Self::invalid_request("registration request is invalid")
                    .with_details(rejected.to_details())
            }
            RegistrationError::Persistence(UserStoreError::Connection { message }) => {
                Self::service_unavailable(format!("user store unavailable: {message}"))
            }
            RegistrationError::Persistence(err) => Self::internal(err.to_string()),
            RegistrationError::Hashing(err) => Self::internal(err.to_string()),
        }
    }
}

/// Registration service over the user store and password hasher ports.
pub struct UserRegistrationService {
    store: Arc<dyn UserStore>,
    hasher: Arc<dyn PasswordHasher>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl UserRegistrationService {
    /// Build the service with the default store timeout.
    pub fn new(
        store: Arc<dyn UserStore>,
        hasher: Arc<dyn PasswordHasher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            hasher,
            clock,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Override the per-call store timeout.
    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T, UserStoreError>
    where
        F: Future<Output = Result<T, UserStoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout = ?self.store_timeout, "user store call timed out");
                Err(UserStoreError::connection(format!(
                    "{operation} timed out after {:?}",
                    self.store_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl UserRegistration for UserRegistrationService {
    async fn register(&self, form: RegistrationForm) -> Result<User, RegistrationError> {
        let email_taken = match well_formed_email(&form) {
            Some(email) => self
                .bounded("exists_by_email", self.store.exists_by_email(&email))
                .await
                .map_err(RegistrationError::Persistence)?,
            None => false,
        };

        let valid = validate_registration(&form, email_taken).map_err(|rejected| {
            debug!(violations = ?rejected.violations(), "registration rejected");
            RegistrationError::Rejected(rejected)
        })?;

        let password_hash = self
            .hasher
            .hash(&valid.password)
            .await
            .map_err(RegistrationError::Hashing)?;

        let user = NewUser {
            id: UserId::random(),
            username: valid.username,
            email: valid.email,
            telephone: valid.telephone,
            password_hash,
            role: Role::default(),
            created_at: self.clock.utc(),
        };
        let entry = NewOutboxEntry::user_created(&user);

        let created = self
            .bounded(
                "create_user_with_outbox",
                self.store.create_user_with_outbox(&user, &entry),
            )
            .await
            .map_err(|err| match err {
                UserStoreError::DuplicateEmail { .. } => RegistrationError::Rejected(
                    RegistrationRejected::single(RegistrationViolation::EmailTaken),
                ),
                other => RegistrationError::Persistence(other),
            })?;

        info!(user_id = %created.id, event_id = %entry.id, "user registered");
        Ok(created)
    }

    async fn list_users(&self) -> Result<Vec<User>, RegistrationError> {
        self.bounded("list_users", self.store.list_users())
            .await
            .map_err(RegistrationError::Persistence)
    }
}
