//! Password hashing via bcrypt.

use std::sync::Arc;

use super::AuthError;

/// Default bcrypt cost factor.
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

/// Lowest cost bcrypt accepts.
pub const MIN_COST: u32 = 4;

/// Highest cost bcrypt accepts.
pub const MAX_COST: u32 = 31;

/// Plaintext used to compute the dummy hash for unknown principals.
const DUMMY_PASSWORD: &str = "narwhal-timing-equaliser";

/// Salted one-way password hasher with a configurable bcrypt cost.
///
/// Holds a dummy hash computed at construction so that logins for unknown
/// principals still pay for one full verification.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    cost: u32,
    dummy_hash: Arc<str>,
}

impl PasswordHasher {
    /// Build a hasher with the given bcrypt cost.
    pub fn new(cost: u32) -> Result<Self, AuthError> {
        if !(MIN_COST..=MAX_COST).contains(&cost) {
            return Err(AuthError::BadRequest(format!(
                "bcrypt cost must be between {MIN_COST} and {MAX_COST}, got {cost}"
            )));
        }
        let dummy_hash = bcrypt::hash(DUMMY_PASSWORD, cost)
            .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))?;
        Ok(Self {
            cost,
            dummy_hash: dummy_hash.into(),
        })
    }

    /// Configured cost factor.
    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a password. The result embeds its salt and cost.
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        bcrypt::hash(password, self.cost)
            .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
    }

    /// Verify a password against a stored hash. Malformed hashes never match.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        bcrypt::verify(password, hash).unwrap_or(false)
    }

    /// Burn one verification against the dummy hash. Always false.
    pub fn verify_dummy(&self, password: &str) -> bool {
        let _ = bcrypt::verify(password, &self.dummy_hash);
        false
    }

    /// True when the stored hash was produced with a lower cost than the
    /// configured one, or cannot be parsed at all, and should be replaced
    /// after a successful login. An empty hash never needs a rehash.
    pub fn needs_rehash(&self, hash: &str) -> bool {
        match stored_cost(hash) {
            Some(cost) => cost < self.cost,
            None => !hash.is_empty(),
        }
    }

    /// [`hash`](Self::hash) on the blocking pool.
    pub async fn hash_async(&self, password: String) -> Result<String, AuthError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hash task: {e}")))?
    }

    /// [`verify`](Self::verify) on the blocking pool. `None` for the hash
    /// runs a dummy verification instead.
    pub async fn verify_async(
        &self,
        password: String,
        hash: Option<String>,
    ) -> Result<bool, AuthError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || match hash {
            Some(hash) => hasher.verify(&password, &hash),
            None => hasher.verify_dummy(&password),
        })
        .await
        .map_err(|e| AuthError::Internal(format!("verify task: {e}")))
    }
}

/// Extract the cost from a modular-crypt bcrypt hash (`$2b$12$...`).
fn stored_cost(hash: &str) -> Option<u32> {
    let mut parts = hash.split('$');
    if !parts.next()?.is_empty() {
        return None;
    }
    let variant = parts.next()?;
    if !matches!(variant, "2a" | "2b" | "2x" | "2y") {
        return None;
    }
    parts.next()?.parse().ok()
}
