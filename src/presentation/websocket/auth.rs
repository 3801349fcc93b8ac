//! Socket Authentication
//!
//! Resolves the token presented on upgrade to a user id.

use jsonwebtoken::{decode, errors::ErrorKind, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::shared::error::HandshakeError;

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at time (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
}

/// Turns a bearer token into an authenticated user id.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<String, HandshakeError>;
}

/// HS256 JWT verifier
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<String, HandshakeError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(HandshakeError::MissingToken);
        }

        let token_data =
            decode::<Claims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => HandshakeError::TokenExpired,
                _ => HandshakeError::InvalidToken,
            })?;

        let user_id = token_data.claims.sub;
        if user_id.is_empty() {
            return Err(HandshakeError::InvalidToken);
        }
        Ok(user_id)
    }
}
