//! User identity and the value types a registration is built from.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role granted to every self-registered account.
pub const DEFAULT_ROLE: &str = "ROLE_USER";

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();

fn email_regex() -> &'static Regex {
    EMAIL_RE.get_or_init(|| {
        let pattern = r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$";
        Regex::new(pattern)
            .unwrap_or_else(|error| panic!("email regex failed to compile: {error}"))
    })
}

/// Why a raw value could not become one of the user value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UserValidationError {
    /// Username is blank after trimming.
    #[error("username must not be empty")]
    EmptyUsername,
    /// Email is blank after trimming.
    #[error("email must not be empty")]
    EmptyEmail,
    /// Email fails the address grammar.
    #[error("email does not match the address grammar")]
    MalformedEmail,
}

/// Stable user identifier, assigned by the registration service before the
/// row is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Allocate a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an identifier read back from storage.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Non-empty, trimmed username.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    /// Trim and validate a username.
    ///
    /// # Examples
    /// ```
    /// use accounts::domain::Username;
    ///
    /// assert_eq!(Username::parse("  alice ").expect("valid").as_ref(), "alice");
    /// assert!(Username::parse("   ").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self, UserValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(UserValidationError::EmptyUsername);
        }
        Ok(Self(trimmed.to_owned()))
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Syntactically valid email address, normalised to lower case so the
/// store's unique constraint treats `Alice@X.com` and `alice@x.com` alike.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Trim, validate, and normalise an address.
    ///
    /// # Examples
    /// ```
    /// use accounts::domain::{EmailAddress, UserValidationError};
    ///
    /// let email = EmailAddress::parse(" Alice@X.com ").expect("valid");
    /// assert_eq!(email.as_ref(), "alice@x.com");
    /// assert_eq!(
    ///     EmailAddress::parse("bad-email"),
    ///     Err(UserValidationError::MalformedEmail)
    /// );
    /// ```
    pub fn parse(raw: &str) -> Result<Self, UserValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(UserValidationError::EmptyEmail);
        }
        if !email_regex().is_match(trimmed) {
            return Err(UserValidationError::MalformedEmail);
        }
        Ok(Self(trimmed.to_lowercase()))
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Optional contact number. Stored as entered, minus surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Telephone(String);

impl Telephone {
    /// Return `None` for absent or blank input.
    pub fn parse_optional(raw: Option<&str>) -> Option<Self> {
        raw.map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Self(value.to_owned()))
    }
}

impl AsRef<str> for Telephone {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

/// PHC-formatted password hash produced by the password hasher port.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Wrap an encoded hash.
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Borrow the encoded hash.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(<redacted>)")
    }
}

/// Authorisation role label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    /// Wrap a role read back from storage.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl Default for Role {
    fn default() -> Self {
        Self(DEFAULT_ROLE.to_owned())
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

/// Registered user as seen outside the store. The password hash never
/// leaves the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Stable identifier.
    pub id: UserId,
    /// Display name.
    pub username: Username,
    /// Unique contact address.
    pub email: EmailAddress,
    /// Optional phone number.
    pub telephone: Option<Telephone>,
    /// Authorisation role.
    pub role: Role,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// A user ready to be written, including the hash that the store keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    /// Stable identifier.
    pub id: UserId,
    /// Display name.
    pub username: Username,
    /// Unique contact address.
    pub email: EmailAddress,
    /// Optional phone number.
    pub telephone: Option<Telephone>,
    /// KDF output; never leaves the store.
    pub password_hash: PasswordHash,
    /// Authorisation role.
    pub role: Role,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

impl NewUser {
    /// The public view of this user once persisted.
    pub fn to_user(&self) -> User {
        User {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            telephone: self.telephone.clone(),
            role: self.role.clone(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("alice@x.com")]
    #[case("first.last+tag@sub.example.org")]
    #[case("UPPER@EXAMPLE.IO")]
    fn accepts_standard_addresses(#[case] raw: &str) {
        assert!(EmailAddress::parse(raw).is_ok());
    }

    #[rstest]
    #[case("bad-email")]
    #[case("a@b")]
    #[case("@x.com")]
    #[case("alice@x.c")]
    #[case("ali ce@x.com")]
    fn rejects_malformed_addresses(#[case] raw: &str) {
        assert_eq!(
            EmailAddress::parse(raw),
            Err(UserValidationError::MalformedEmail)
        );
    }

    #[rstest]
    fn blank_email_is_reported_as_empty() {
        assert_eq!(EmailAddress::parse("  "), Err(UserValidationError::EmptyEmail));
    }

    #[rstest]
    #[case(None, None)]
    #[case(Some("   "), None)]
    #[case(Some(" 555-0100 "), Some("555-0100"))]
    fn telephone_is_optional(#[case] raw: Option<&str>, #[case] expected: Option<&str>) {
        let parsed: Option<String> =
            Telephone::parse_optional(raw).map(|phone| phone.as_ref().to_owned());
        assert_eq!(parsed.as_deref(), expected);
    }

    #[rstest]
    fn password_hash_debug_is_redacted() {
        let hash = PasswordHash::new("$argon2id$v=19$secret");
        assert!(!format!("{hash:?}").contains("secret"));
    }

    #[rstest]
    fn default_role_is_user() {
        assert_eq!(Role::default().as_ref(), DEFAULT_ROLE);
    }
}
