use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when issuing or checking tokens
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    Missing,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

/// Token claims identifying one participant of one event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Participant id
    pub sub: i64,
    /// Event id
    pub evt: i64,
    pub exp: i64,
}

/// Issues and validates participant bearer tokens (HS256)
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, participant_id: i64, event_id: i64) -> Result<String, AuthError> {
        let claims = Claims {
            sub: participant_id,
            evt: event_id,
            exp: (Utc::now() + self.ttl).timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())?;
        Ok(data.claims)
    }
}

/// Extract the token from an `Authorization: Bearer ...` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let issuer = TokenIssuer::new("secret", Duration::hours(1));
        let token = issuer.issue(11, 3).unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, 11);
        assert_eq!(claims.evt, 3);
    }

    #[test]
    fn test_foreign_secret_is_rejected() {
        let issuer = TokenIssuer::new("secret", Duration::hours(1));
        let other = TokenIssuer::new("other", Duration::hours(1));
        let token = other.issue(1, 1).unwrap();
        assert!(issuer.verify(&token).is_err());
    }

    #[test]
    fn test_bearer_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
