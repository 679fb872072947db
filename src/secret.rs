//! One-way hashing of per-post delete secrets.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use rand_core::OsRng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("secret hashing failed: {0}")]
    Hash(String),
    #[error("stored secret hash is malformed")]
    InvalidHash,
}

/// Hash + verify for delete secrets. Implementations are CPU-bound and are
/// called from the blocking pool, never directly on a request worker.
pub trait SecretHasher: Send + Sync {
    fn hash(&self, secret: &str) -> Result<String, SecretError>;
    /// `Ok(false)` on mismatch; `Err` only when the stored hash cannot be parsed.
    fn verify(&self, secret: &str, hash: &str) -> Result<bool, SecretError>;
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    pub fn new(cost: HashCost) -> Result<Self, SecretError> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| SecretError::Hash(e.to_string()))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, self.params.clone())
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self { params: Params::default() }
    }
}

impl SecretHasher for Argon2Hasher {
    fn hash(&self, secret: &str) -> Result<String, SecretError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| SecretError::Hash(e.to_string()))?;
        Ok(hash.to_string())
    }

    fn verify(&self, secret: &str, hash: &str) -> Result<bool, SecretError> {
        let parsed = PasswordHash::new(hash).map_err(|_| SecretError::InvalidHash)?;
        // cost parameters come from the PHC string, not from self
        match Argon2::default().verify_password(secret.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(_) => Err(SecretError::InvalidHash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> Argon2Hasher {
        Argon2Hasher::new(HashCost { memory_kib: 1024, iterations: 1, parallelism: 1 }).unwrap()
    }

    #[test]
    fn hash_then_verify() {
        let h = cheap();
        let hash = h.hash("mypassword").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("mypassword"));
        assert!(h.verify("mypassword", &hash).unwrap());
        assert!(!h.verify("wrong", &hash).unwrap());
    }

    #[test]
    fn same_secret_gets_fresh_salt() {
        let h = cheap();
        assert_ne!(h.hash("pw").unwrap(), h.hash("pw").unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(matches!(cheap().verify("pw", "not-a-hash"), Err(SecretError::InvalidHash)));
    }

    #[test]
    fn rejects_impossible_cost() {
        assert!(Argon2Hasher::new(HashCost { memory_kib: 1, iterations: 0, parallelism: 1 }).is_err());
    }
}
