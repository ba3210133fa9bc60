//! Bearer tokens for the job API and frame streams.
//!
//! Tokens are HS256 JWTs carrying [`Claims`]. Login lives outside this
//! service; anything holding the shared secret can mint tokens with
//! [`generate_access_token`].

use framewatch_core::types::DbId;
use jsonwebtoken::errors::Error as JwtError;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::env_or;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id of the caller.
    pub sub: DbId,
    pub role: String,
    /// Unix seconds.
    pub exp: i64,
    /// Unix seconds.
    pub iat: i64,
    pub jti: String,
}

impl Claims {
    fn issue(user_id: DbId, role: &str, ttl_mins: i64) -> Self {
        let iat = chrono::Utc::now().timestamp();
        Self {
            sub: user_id,
            role: role.to_owned(),
            exp: iat + ttl_mins * 60,
            iat,
            jti: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Shared HMAC secret.
    pub secret: String,
    /// Lifetime of minted tokens.
    pub access_token_expiry_mins: i64,
}

impl JwtConfig {
    /// | Env Var                  | Default  |
    /// |--------------------------|----------|
    /// | `JWT_SECRET`             | required |
    /// | `JWT_ACCESS_EXPIRY_MINS` | `30`     |
    ///
    /// # Panics
    ///
    /// Panics when `JWT_SECRET` is missing or empty.
    pub fn from_env() -> Self {
        let secret = std::env::var("JWT_SECRET").unwrap_or_default();
        assert!(!secret.is_empty(), "JWT_SECRET must be set");

        Self {
            secret,
            access_token_expiry_mins: env_or("JWT_ACCESS_EXPIRY_MINS", 30),
        }
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(self.secret.as_bytes())
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(self.secret.as_bytes())
    }
}

/// Mint a token for `user_id` valid for the configured lifetime.
pub fn generate_access_token(
    user_id: DbId,
    role: &str,
    config: &JwtConfig,
) -> Result<String, JwtError> {
    let claims = Claims::issue(user_id, role, config.access_token_expiry_mins);
    jsonwebtoken::encode(&Header::default(), &claims, &config.encoding_key())
}

/// Check signature and expiry.
pub fn validate_token(token: &str, config: &JwtConfig) -> Result<Claims, JwtError> {
    jsonwebtoken::decode::<Claims>(token, &config.decoding_key(), &Validation::default())
        .map(|data| data.claims)
}
