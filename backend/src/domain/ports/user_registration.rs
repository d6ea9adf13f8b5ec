//! Driving port for registering and listing users.
//!
//! Inbound adapters call this port; the domain implementation lives in
//! [`crate::domain::UserRegistrationService`].

use async_trait::async_trait;

use crate::domain::{RegistrationError, RegistrationForm, User};

/// Domain use-case port for account registration.
#[async_trait]
pub trait UserRegistration: Send + Sync {
    /// Validate the form, then store the user and its `UserCreated` event
    /// atomically.
    async fn register(&self, form: RegistrationForm) -> Result<User, RegistrationError>;

    /// Every registered user, oldest first.
    async fn list_users(&self) -> Result<Vec<User>, RegistrationError>;
}
