//! Bearer-token authentication for persistent connections.
//!
//! Tokens are verified out-of-band of the normal HTTP request cycle: the
//! upgrade request carries `Authorization: Bearer <jwt>`, signed HS256 with
//! the shared secret and carrying a `user_id` claim. Every failure mode
//! (missing header, bad signature, expired claim, unknown user) collapses to
//! the same anonymous result so the caller cannot tell token problems from
//! user-existence problems.

use axum::http::{header, HeaderMap};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::warn;

use crate::store::users::{self, User};

#[derive(Debug, Deserialize)]
struct Claims {
    user_id: Option<i64>,
}

/// Pulls the token out of `Authorization: Bearer <token>`. Anything else
/// (missing header, different scheme) is "no credential", not an error.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// HS256 verifier around the process-wide shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> TokenVerifier {
        TokenVerifier {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Returns the `user_id` claim of a valid token. Tampered signature,
    /// expired `exp`, garbage input or a missing claim all yield None.
    pub fn verify(&self, token: &str) -> Option<i64> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation).ok()?;
        data.claims.user_id
    }
}

/// Resolves the connection's credential to a user row, or None. Never
/// errors; a store failure is logged and treated as "no identity" so the
/// connection is simply denied.
pub async fn authenticate(
    verifier: &TokenVerifier,
    pool: &SqlitePool,
    headers: &HeaderMap,
) -> Option<User> {
    let token = bearer_token(headers)?;
    let user_id = verifier.verify(token)?;
    match users::user(pool, user_id).await {
        Ok(found) => found,
        Err(e) => {
            warn!(user_id, error = %e, "user lookup failed during token auth");
            None
        }
    }
}
