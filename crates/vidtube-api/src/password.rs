use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::{SaltString, rand_core::OsRng},
};
use tracing::error;

use crate::error::ApiError;

/// Hash with Argon2id off the async runtime; hashing is deliberately slow.
pub async fn hash(password: String, params: Params) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::internal("Something went wrong")
    })?
    .map_err(|e| {
        error!("Password hashing failed: {}", e);
        ApiError::internal("Something went wrong")
    })
}

/// Check `password` against a stored PHC string. Cost parameters come from
/// the hash itself.
pub async fn verify(stored_hash: String, password: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&stored_hash).map_err(|e| {
            error!("Stored password hash is unreadable: {}", e);
            ApiError::internal("Something went wrong")
        })?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::internal("Something went wrong")
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> Params {
        Params::new(1024, 1, 1, None).unwrap()
    }

    #[tokio::test]
    async fn hash_then_verify() {
        let stored = hash("p1".into(), cheap()).await.unwrap();
        assert!(stored.starts_with("$argon2id$"));
        assert!(!stored.contains("p1"));

        assert!(verify(stored.clone(), "p1".into()).await.unwrap());
        assert!(!verify(stored, "wrong".into()).await.unwrap());
    }

    #[tokio::test]
    async fn same_password_gets_fresh_salt() {
        let a = hash("p1".into(), cheap()).await.unwrap();
        let b = hash("p1".into(), cheap()).await.unwrap();
        assert_ne!(a, b);
    }
}
