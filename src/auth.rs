//! Session tokens, the request identity extractor and secret hashing.

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::user::Role;
use crate::state::AppState;

const SALT_BYTES: usize = 16;
const PASSWORD_ROUNDS: u32 = 10_000;
const CODE_ROUNDS: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: usize,
}

/// Signs and validates HS256 session tokens.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    pub fn issue(&self, user_id: Uuid, role: Role) -> Result<String, AppError> {
        let exp = (Utc::now() + self.ttl).timestamp().max(0) as usize;
        let claims = Claims {
            sub: user_id,
            role,
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| AppError::Internal(format!("failed to sign session token: {err}")))
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|err| AppError::Unauthenticated(format!("invalid session token: {err}")))
    }
}

/// The authenticated caller. Everything downstream trusts these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub party_id: Uuid,
    pub role: Role,
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = Arc::<AppState>::from_ref(state);

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::Unauthenticated("missing bearer token".to_string()))?;

        let claims = state.sessions.validate(token)?;
        Ok(Identity {
            party_id: claims.sub,
            role: claims.role,
        })
    }
}

/// Salted, iterated SHA-256 digest of a secret, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretHash {
    pub salt: String,
    pub digest: String,
}

fn stretch(secret: &str, salt: &str, rounds: u32) -> String {
    let mut digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(secret.as_bytes())
        .finalize();
    for _ in 1..rounds {
        digest = Sha256::new()
            .chain_update(salt.as_bytes())
            .chain_update(digest)
            .finalize();
    }
    hex::encode(digest)
}

fn random_salt() -> String {
    let bytes: [u8; SALT_BYTES] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}

pub fn hash_code(code: &str) -> SecretHash {
    let salt = random_salt();
    let digest = stretch(code, &salt, CODE_ROUNDS);
    SecretHash { salt, digest }
}

pub fn code_matches(code: &str, salt: &str, digest: &str) -> bool {
    constant_time_eq(stretch(code, salt, CODE_ROUNDS).as_bytes(), digest.as_bytes())
}

/// Stored form is `salt$digest`.
pub fn hash_password(password: &str) -> String {
    let salt = random_salt();
    let digest = stretch(password, &salt, PASSWORD_ROUNDS);
    format!("{salt}${digest}")
}

pub fn password_matches(password: &str, stored: &str) -> bool {
    let Some((salt, digest)) = stored.split_once('$') else {
        return false;
    };
    constant_time_eq(
        stretch(password, salt, PASSWORD_ROUNDS).as_bytes(),
        digest.as_bytes(),
    )
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
