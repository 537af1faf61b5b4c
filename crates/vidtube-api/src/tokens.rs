use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use vidtube_types::api::{AccessClaims, RefreshClaims, TokenPair};
use vidtube_types::models::User;

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub access_secret: String,
    pub access_ttl: Duration,
    pub refresh_secret: String,
    pub refresh_ttl: Duration,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("invalid token")]
    Invalid,

    #[error("token signing failed: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// Issues and verifies the HS256 access/refresh token pair. Access and
/// refresh tokens use separate secrets, so neither verifies as the other.
pub struct TokenService {
    config: TokenConfig,
}

impl TokenService {
    pub fn new(config: TokenConfig) -> Self {
        Self { config }
    }

    pub fn issue_access_token(&self, user: &User) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            fullname: user.fullname.clone(),
            iat: now.timestamp() as usize,
            exp: (now + self.config.access_ttl).timestamp() as usize,
            jti: Uuid::new_v4(),
        };
        sign(&claims, &self.config.access_secret)
    }

    pub fn issue_refresh_token(&self, user_id: Uuid) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = RefreshClaims {
            sub: user_id,
            iat: now.timestamp() as usize,
            exp: (now + self.config.refresh_ttl).timestamp() as usize,
            jti: Uuid::new_v4(),
        };
        sign(&claims, &self.config.refresh_secret)
    }

    pub fn issue_pair(&self, user: &User) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue_access_token(user)?,
            refresh_token: self.issue_refresh_token(user.id)?,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        verify(token, &self.config.access_secret)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        verify(token, &self.config.refresh_secret)
    }
}

fn sign<C: Serialize>(claims: &C, secret: &str) -> Result<String, TokenError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(TokenError::Signing)
}

/// Decode `token` against `secret`, checking signature and expiry.
pub fn verify<C: DeserializeOwned>(token: &str, secret: &str) -> Result<C, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 5;

    decode::<C>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(TokenConfig {
            access_secret: "access-secret".into(),
            access_ttl: Duration::minutes(15),
            refresh_secret: "refresh-secret".into(),
            refresh_ttl: Duration::days(10),
        })
    }

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "ana".into(),
            email: "ana@x.com".into(),
            fullname: "Ana A".into(),
            avatar: "https://cdn.test/a.png".into(),
            cover_image: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn access_token_roundtrip() {
        let svc = service();
        let user = user();
        let token = svc.issue_access_token(&user).unwrap();

        let claims = svc.verify_access(&token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.username, "ana");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn pair_tokens_are_distinct_and_not_interchangeable() {
        let svc = service();
        let user = user();
        let pair = svc.issue_pair(&user).unwrap();
        assert_ne!(pair.access_token, pair.refresh_token);

        assert_eq!(svc.verify_refresh(&pair.refresh_token).unwrap().sub, user.id);
        assert!(matches!(svc.verify_access(&pair.refresh_token), Err(TokenError::Invalid)));
        assert!(matches!(svc.verify_refresh(&pair.access_token), Err(TokenError::Invalid)));
    }

    #[test]
    fn successive_refresh_tokens_differ() {
        let svc = service();
        let id = Uuid::new_v4();
        let a = svc.issue_refresh_token(id).unwrap();
        let b = svc.issue_refresh_token(id).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn expired_token_rejected() {
        let now = Utc::now();
        let claims = RefreshClaims {
            sub: Uuid::new_v4(),
            iat: (now - Duration::hours(2)).timestamp() as usize,
            exp: (now - Duration::hours(1)).timestamp() as usize,
            jti: Uuid::new_v4(),
        };
        let token = sign(&claims, "refresh-secret").unwrap();

        assert!(matches!(service().verify_refresh(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn malformed_and_foreign_tokens_rejected() {
        let svc = service();
        assert!(matches!(svc.verify_access("not.a.jwt"), Err(TokenError::Invalid)));

        let token = svc.issue_access_token(&user()).unwrap();
        assert!(matches!(
            verify::<AccessClaims>(&token, "some-other-secret"),
            Err(TokenError::Invalid)
        ));
    }
}
