//! Password hashing and bearer tokens.

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use portal_storage::{Role, UserId};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Password hashing and verification.
pub trait CredentialService: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, ServiceError>;

    /// `false` for a wrong password and for an unparseable hash alike.
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// Argon2id with the crate's default parameters.
#[derive(Default)]
pub struct Argon2Credentials {
    argon2: Argon2<'static>,
}

impl CredentialService for Argon2Credentials {
    fn hash(&self, password: &str) -> Result<String, ServiceError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| {
                tracing::error!(error = %e, "password hashing failed");
                ServiceError::Storage
            })?;
        Ok(hash.to_string())
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "stored password hash is malformed");
                false
            }
        }
    }
}

/// Claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: UserId,
    /// Role at issue time. Informational; handlers reload the user.
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Bearer token issuance and verification.
pub trait TokenService: Send + Sync {
    fn issue(&self, user_id: &UserId, role: Role) -> Result<String, ServiceError>;

    fn verify(&self, token: &str) -> Result<TokenClaims, ServiceError>;
}

/// HS256 JWTs signed with a shared secret.
pub struct JwtTokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtTokenService {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }
}

impl TokenService for JwtTokenService {
    fn issue(&self, user_id: &UserId, role: Role) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: *user_id,
            role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| {
            tracing::error!(error = %e, "token encoding failed");
            ServiceError::Storage
        })
    }

    fn verify(&self, token: &str) -> Result<TokenClaims, ServiceError> {
        decode::<TokenClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "rejected bearer token");
                ServiceError::forbidden("invalid or expired token")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_round_trip() {
        let creds = Argon2Credentials::default();
        let hash = creds.hash("hunter22").unwrap();

        assert!(hash.starts_with("$argon2"));
        assert!(creds.verify("hunter22", &hash));
        assert!(!creds.verify("hunter23", &hash));
        assert!(!creds.verify("hunter22", "not-a-hash"));
    }

    #[test]
    fn test_token_round_trip() {
        let tokens = JwtTokenService::new(b"secret", Duration::hours(24));
        let user = UserId::new();

        let token = tokens.issue(&user, Role::Manager).unwrap();
        let claims = tokens.verify(&token).unwrap();

        assert_eq!(claims.sub, user);
        assert_eq!(claims.role, Role::Manager);
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn test_token_from_other_secret_is_rejected() {
        let ours = JwtTokenService::new(b"secret", Duration::hours(1));
        let theirs = JwtTokenService::new(b"other", Duration::hours(1));

        let token = theirs.issue(&UserId::new(), Role::User).unwrap();
        assert!(matches!(
            ours.verify(&token),
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let tokens = JwtTokenService::new(b"secret", Duration::hours(-2));
        let token = tokens.issue(&UserId::new(), Role::User).unwrap();
        assert!(tokens.verify(&token).is_err());
    }
}
