//! Domain primitives, use cases, and background workers.
//!
//! Purpose: define the strongly typed registration, outbox, notification, and
//! catalogue model used by the HTTP and persistence layers. Infrastructure is
//! reached only through the traits in [`ports`].
//!
//! Public surface:
//! - Error / ErrorCode: API error payload and its stable code.
//! - RegistrationForm / validate_registration: the validation gate.
//! - UserRegistrationService: atomic user + outbox write.
//! - OutboxRelay: publishes outbox entries with retry and dead-letter.
//! - UserCreatedConsumer: idempotent activation mail.
//! - ProductCatalogueService: product use cases.

pub mod error;
pub mod notification_consumer;
pub mod outbox;
pub mod outbox_relay;
pub mod ports;
pub mod product;
pub mod product_catalogue;
pub mod registration;
pub mod retry;
pub mod template;
pub mod trace_id;
pub mod user;
pub mod user_registration;
pub mod validation_token;

pub use self::error::{Error, ErrorCode};
pub use self::notification_consumer::{
    ConsumerConfig, ConsumerOutcome, NotificationConsumerPorts, UserCreatedConsumer,
};
pub use self::outbox::{
    EventEnvelope, EventId, NewOutboxEntry, OutboxEntry, USER_CREATED_EVENT, UserCreatedPayload,
};
pub use self::outbox_relay::{OutboxRelay, OutboxRelayConfig, OutboxRelayPorts, RelayCycleReport};
pub use self::product::{
    Product, ProductDraft, ProductId, ProductViolation, product_violation_details,
};
pub use self::product_catalogue::ProductCatalogueService;
pub use self::registration::{
    PASSWORD_MIN_LENGTH, PASSWORD_SPECIAL_CHARACTERS, RegistrationForm, RegistrationRejected,
    RegistrationViolation, ValidRegistration, is_strong_password, validate_registration,
    well_formed_email,
};
pub use self::retry::{
    AttemptJitter, BackoffJitter, RetryPolicy, RetrySleeper, TokioSleeper, WorkerRuntime,
};
pub use self::template::{escape_html, substitute_placeholders};
pub use self::trace_id::{TRACE_ID_HEADER, TraceId};
pub use self::user::{
    DEFAULT_ROLE, EmailAddress, NewUser, PasswordHash, Role, Telephone, User, UserId,
    UserValidationError, Username,
};
pub use self::user_registration::{
    DEFAULT_STORE_TIMEOUT, RegistrationError, UserRegistrationService,
};
pub use self::validation_token::{DEFAULT_TOKEN_TTL, ValidationToken};

/// Convenient API result alias.
///
/// # Examples
/// ```
/// use accounts::domain::{ApiResult, Error};
///
/// fn lookup() -> ApiResult<u32> {
///     Err(Error::not_found("nope"))
/// }
/// assert!(lookup().is_err());
/// ```
pub type ApiResult<T> = Result<T, Error>;
