//! Validation gate for self-service registration.
//!
//! Every rule is evaluated on its own and all violations are reported
//! together. The only impure input, whether the email is already taken, is
//! looked up by the caller and passed in so the gate stays a pure function.

use std::fmt;

use serde::Serialize;
use serde_json::{Value, json};
use zeroize::Zeroizing;

use super::user::{EmailAddress, Telephone, UserValidationError, Username};

/// Characters that satisfy the "special character" password rule.
pub const PASSWORD_SPECIAL_CHARACTERS: &str = "@$!%*?&#^()-_=+.,;:";

/// Minimum password length in characters.
pub const PASSWORD_MIN_LENGTH: usize = 8;

/// Raw registration request as received from a client.
#[derive(Clone, Default)]
pub struct RegistrationForm {
    /// Requested display name.
    pub username: String,
    /// Contact address; must be unique across users.
    pub email: String,
    /// Optional phone number.
    pub telephone: Option<String>,
    /// Plain-text password, wiped on drop.
    pub password: Zeroizing<String>,
    /// Must equal `password`.
    pub confirm_password: Zeroizing<String>,
}

impl fmt::Debug for RegistrationForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationForm")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("telephone", &self.telephone)
            .finish_non_exhaustive()
    }
}

/// A rule the request broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationViolation {
    /// Username is blank.
    UsernameRequired,
    /// Email is blank.
    EmailRequired,
    /// Email fails the address grammar.
    EmailMalformed,
    /// Another user already has this email.
    EmailTaken,
    /// Password is empty.
    PasswordRequired,
    /// Confirmation differs from the password.
    PasswordMismatch,
    /// Password misses a length or character-class rule.
    PasswordTooWeak,
}

impl RegistrationViolation {
    /// Client-facing message for this violation.
    pub fn message(self) -> &'static str {
        match self {
            Self::UsernameRequired => "Username is required",
            Self::EmailRequired => "Email is required",
            Self::EmailMalformed => "Email format is invalid",
            Self::EmailTaken => "Email is already in use",
            Self::PasswordRequired => "Password is required",
            Self::PasswordMismatch => "Password and Confirm Password do not match",
            Self::PasswordTooWeak => {
                "Password must be at least 8 characters long, contain at least one uppercase \
                 letter, one lowercase letter, one digit, and one special character"
            }
        }
    }

    /// Request field the violation refers to, in the wire's camelCase.
    pub fn field(self) -> &'static str {
        match self {
            Self::UsernameRequired => "username",
            Self::EmailRequired | Self::EmailMalformed | Self::EmailTaken => "email",
            Self::PasswordRequired | Self::PasswordTooWeak => "password",
            Self::PasswordMismatch => "confirmPassword",
        }
    }
}

/// The request was rejected; carries every violated rule in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRejected {
    violations: Vec<RegistrationViolation>,
}

impl RegistrationRejected {
    /// Reject for a single reason.
    pub fn single(violation: RegistrationViolation) -> Self {
        Self {
            violations: vec![violation],
        }
    }

    /// Violations in the order the rules were evaluated.
    pub fn violations(&self) -> &[RegistrationViolation] {
        &self.violations
    }

    /// Client-facing messages in evaluation order.
    pub fn messages(&self) -> Vec<&'static str> {
        self.violations.iter().map(|v| v.message()).collect()
    }

    /// Structured details for transport adapters.
    pub fn to_details(&self) -> Value {
        let violations: Vec<Value> = self
            .violations
            .iter()
            .map(|v| {
                json!({
                    "field": v.field(),
                    "code": v,
                    "message": v.message(),
                })
            })
            .collect();
        json!({
            "messages": self.messages(),
            "violations": violations,
        })
    }
}

impl fmt::Display for RegistrationRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages().join("; "))
    }
}

impl std::error::Error for RegistrationRejected {}

/// A request that passed every rule.
#[derive(Clone)]
pub struct ValidRegistration {
    /// Validated display name.
    pub username: Username,
    /// Normalised contact address.
    pub email: EmailAddress,
    /// Validated phone number, if given.
    pub telephone: Option<Telephone>,
    /// Plain-text password awaiting hashing.
    pub password: Zeroizing<String>,
}

impl fmt::Debug for ValidRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidRegistration")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Parse the email if it is well formed. The service uses this to decide
/// whether the existence lookup is worth a round trip.
pub fn well_formed_email(form: &RegistrationForm) -> Option<EmailAddress> {
    EmailAddress::parse(&form.email).ok()
}

/// Does the password satisfy the strength policy?
///
/// # Examples
/// ```
/// use accounts::domain::is_strong_password;
///
/// assert!(is_strong_password("Abcdef1!"));
/// assert!(!is_strong_password("abcdefgh"));
/// ```
pub fn is_strong_password(password: &str) -> bool {
    password.chars().count() >= PASSWORD_MIN_LENGTH
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password
            .chars()
            .any(|c| PASSWORD_SPECIAL_CHARACTERS.contains(c))
}

/// Apply every registration rule and collect all violations.
///
/// `email_taken` is only consulted when the email is well formed.
///
/// # Examples
/// ```
/// use accounts::domain::{RegistrationForm, RegistrationViolation, validate_registration};
///
/// let form = RegistrationForm {
///     email: "bad-email".into(),
///     ..RegistrationForm::default()
/// };
/// let rejected = validate_registration(&form, false).expect_err("invalid");
/// assert!(rejected.violations().contains(&RegistrationViolation::EmailMalformed));
/// ```
pub fn validate_registration(
    form: &RegistrationForm,
    email_taken: bool,
) -> Result<ValidRegistration, RegistrationRejected> {
    let mut violations = Vec::new();

    let username = match Username::parse(&form.username) {
        Ok(username) => Some(username),
        Err(_) => {
            violations.push(RegistrationViolation::UsernameRequired);
            None
        }
    };

    let email = match EmailAddress::parse(&form.email) {
        Ok(email) if email_taken => {
            violations.push(RegistrationViolation::EmailTaken);
            Some(email)
        }
        Ok(email) => Some(email),
        Err(UserValidationError::EmptyEmail) => {
            violations.push(RegistrationViolation::EmailRequired);
            None
        }
        Err(_) => {
            violations.push(RegistrationViolation::EmailMalformed);
            None
        }
    };

    if form.password.is_empty() {
        violations.push(RegistrationViolation::PasswordRequired);
    } else {
        if *form.password != *form.confirm_password {
            violations.push(RegistrationViolation::PasswordMismatch);
        }
        if !is_strong_password(&form.password) {
            violations.push(RegistrationViolation::PasswordTooWeak);
        }
    }

    match (username, email) {
        (Some(username), Some(email)) if violations.is_empty() => Ok(ValidRegistration {
            username,
            email,
            telephone: Telephone::parse_optional(form.telephone.as_deref()),
            password: form.password.clone(),
        }),
        _ => Err(RegistrationRejected { violations }),
    }
}
