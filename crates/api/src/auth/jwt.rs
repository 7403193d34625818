//! JWT issuing and verification

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("token subject is not a user id")]
    BadSubject,
}

/// Claims carried in access tokens. `sub` is the user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl JwtManager {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    pub fn generate_token(
        &self,
        user_id: Uuid,
        email: Option<String>,
    ) -> Result<String, JwtError> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: user_id.to_string(),
            email,
            iat: now.unix_timestamp(),
            exp: (now + Duration::hours(self.expiry_hours)).unix_timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    /// Verify a token and return its claims with the subject parsed.
    pub fn verify_token(&self, token: &str) -> Result<(Uuid, Claims), JwtError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        let user_id = Uuid::parse_str(&data.claims.sub).map_err(|_| JwtError::BadSubject)?;
        Ok((user_id, data.claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips() {
        let manager = JwtManager::new("test-secret", 24);
        let user_id = Uuid::new_v4();
        let token = manager
            .generate_token(user_id, Some("a@example.com".to_string()))
            .unwrap();
        let (parsed_id, claims) = manager.verify_token(&token).unwrap();
        assert_eq!(parsed_id, user_id);
        assert_eq!(claims.email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let manager = JwtManager::new("secret-a", 24);
        let other = JwtManager::new("secret-b", 24);
        let token = manager.generate_token(Uuid::new_v4(), None).unwrap();
        assert!(other.verify_token(&token).is_err());
    }

    #[test]
    fn non_uuid_subject_is_rejected() {
        let manager = JwtManager::new("test-secret", 24);
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: "service-account".to_string(),
            email: None,
            iat: now.unix_timestamp(),
            exp: (now + Duration::hours(1)).unix_timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(matches!(
            manager.verify_token(&token),
            Err(JwtError::BadSubject)
        ));
    }
}
