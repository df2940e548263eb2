//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs carrying the user id. The token cache keeps the
//! bid path free of durable lookups: within the cache TTL a repeated token
//! resolves without touching the signature check or the users table.

pub mod token_cache;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::{TimeDelta, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, durable_err};
use crate::metrics::counters::Counters;
use crate::store::model::Principal;
use crate::store::repository::AuctionRepository;
use token_cache::TokenCache;

const TOKEN_LIFETIME_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

pub struct Authenticator {
    secret: String,
    cache: TokenCache,
    repo: Arc<dyn AuctionRepository>,
    counters: Counters,
}

impl Authenticator {
    pub fn new(
        secret: String,
        cache: TokenCache,
        repo: Arc<dyn AuctionRepository>,
        counters: Counters,
    ) -> Self {
        Self {
            secret,
            cache,
            repo,
            counters,
        }
    }

    /// Resolves an opaque token to a principal.
    ///
    /// Cache hit: no I/O. Miss: signature + expiry check, then one users
    /// fetch, then cache fill. Invalid or expired tokens and unknown users
    /// all map to `auth_failed`.
    pub async fn authenticate(&self, token: &str) -> Result<Principal, AppError> {
        if let Some(principal) = self.cache.get(token) {
            self.counters.token_cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(principal);
        }
        self.counters
            .token_cache_misses
            .fetch_add(1, Ordering::Relaxed);

        let claims = self.decode_claims(token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::AuthFailed)?;

        let user = self
            .repo
            .fetch_user(&user_id)
            .await
            .map_err(durable_err)?
            .ok_or(AppError::AuthFailed)?;

        let principal = user.principal();
        self.cache.set(token, principal.clone());
        Ok(principal)
    }

    /// Verifies a password and signs a fresh token for the user.
    pub async fn issue_token(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(String, Principal), AppError> {
        let user = self
            .repo
            .fetch_user_by_username(username)
            .await
            .map_err(durable_err)?
            .ok_or(AppError::AuthFailed)?;

        let verified =
            bcrypt::verify(password, &user.password_hash).map_err(|_| AppError::AuthFailed)?;
        if !verified {
            return Err(AppError::AuthFailed);
        }

        let exp = Utc::now() + TimeDelta::hours(TOKEN_LIFETIME_HOURS);
        let claims = Claims {
            sub: user.id.to_string(),
            exp: exp.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::internal(e.into()))?;

        tracing::debug!(user_id = %user.id, username = %user.username, "issued token");
        Ok((token, user.principal()))
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|_| AppError::AuthFailed)
    }
}
