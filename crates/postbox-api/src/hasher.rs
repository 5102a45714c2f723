use anyhow::{Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use tracing::warn;

/// Salted one-way hashing of user credentials (Argon2id, PHC string format).
#[derive(Clone, Default)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
}

impl CredentialHasher {
    pub fn new(argon2: Argon2<'static>) -> Self {
        Self { argon2 }
    }

    /// CPU-bound; call from a blocking task.
    pub fn hash(&self, plaintext: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| anyhow!("Password hashing failed: {}", e))?;
        Ok(hash.to_string())
    }

    /// A stored value that is not a valid PHC string never verifies.
    pub fn verify(&self, plaintext: &str, stored: &str) -> bool {
        let parsed = match PasswordHash::new(stored) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Unparseable stored password hash: {}", e);
                return false;
            }
        };
        self.argon2.verify_password(plaintext.as_bytes(), &parsed).is_ok()
    }

    /// Rejection for a username with no stored hash. Does one full Argon2
    /// pass over `plaintext` so it costs as much as [`Self::verify`].
    pub fn verify_absent(&self, plaintext: &str) -> bool {
        let salt = SaltString::generate(&mut OsRng);
        let _ = self.argon2.hash_password(plaintext.as_bytes(), &salt);
        false
    }
}
