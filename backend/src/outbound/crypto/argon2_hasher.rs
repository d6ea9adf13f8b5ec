//! Argon2id implementation of the [`PasswordHasher`] port.
//!
//! Hashing is CPU bound, so each call runs on tokio's blocking pool and the
//! plaintext copy handed to it is zeroised on drop.

use std::sync::Arc;

use argon2::password_hash::{PasswordHasher as _, PasswordVerifier as _, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::domain::PasswordHash;
use crate::domain::ports::{PasswordHashError, PasswordHasher};

/// Argon2id hasher producing PHC strings.
#[derive(Clone)]
pub struct Argon2PasswordHasher {
    context: Arc<Argon2<'static>>,
}

impl Default for Argon2PasswordHasher {
    fn default() -> Self {
        Self::with_params(Params::DEFAULT)
    }
}

impl Argon2PasswordHasher {
    /// Build a hasher with explicit cost parameters.
    pub fn with_params(params: Params) -> Self {
        Self {
            context: Arc::new(Argon2::new(Algorithm::Argon2id, Version::V0x13, params)),
        }
    }

    /// Check `password` against a stored PHC string.
    pub fn verify(&self, password: &str, hash: &PasswordHash) -> Result<bool, PasswordHashError> {
        let parsed = argon2::PasswordHash::new(hash.as_str())
            .map_err(|err| PasswordHashError::hashing(format!("unparseable hash: {err}")))?;
        match self.context.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(err) => Err(PasswordHashError::hashing(err.to_string())),
        }
    }
}

#[async_trait]
impl PasswordHasher for Argon2PasswordHasher {
    async fn hash(&self, password: &str) -> Result<PasswordHash, PasswordHashError> {
        let context = Arc::clone(&self.context);
        let password = Zeroizing::new(password.to_owned());
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            context
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| PasswordHash::new(hash.to_string()))
                .map_err(|err| PasswordHashError::hashing(err.to_string()))
        })
        .await
        .map_err(|err| PasswordHashError::hashing(format!("hashing task failed: {err}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn hasher() -> Argon2PasswordHasher {
        let params = Params::new(8 * 1024, 1, 1, None).expect("valid params");
        Argon2PasswordHasher::with_params(params)
    }

    #[rstest]
    #[tokio::test]
    async fn hashes_are_salted_phc_strings(hasher: Argon2PasswordHasher) {
        let first = hasher.hash("Abcdef1!").await.expect("hash");
        let second = hasher.hash("Abcdef1!").await.expect("hash");

        assert!(first.as_str().starts_with("$argon2id$"));
        assert_ne!(first, second);
        assert!(!first.as_str().contains("Abcdef1!"));
    }

    #[rstest]
    #[tokio::test]
    async fn verify_accepts_only_the_original_password(hasher: Argon2PasswordHasher) {
        let hash = hasher.hash("Abcdef1!").await.expect("hash");

        assert!(hasher.verify("Abcdef1!", &hash).expect("verify"));
        assert!(!hasher.verify("Abcdef1?", &hash).expect("verify"));
    }

    #[rstest]
    fn verify_rejects_garbage_hashes(hasher: Argon2PasswordHasher) {
        let err = hasher
            .verify("Abcdef1!", &PasswordHash::new("not-a-hash"))
            .expect_err("garbage");
        assert!(err.to_string().starts_with("password hashing failed"));
    }
}
