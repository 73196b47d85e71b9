//! Cookie session resolution.
//!
//! A session is the username plus a keyed digest over the user's
//! `updated_at`. Saving the user moves `updated_at`, which invalidates every
//! previously issued digest.

use chrono::{DateTime, Utc};
use sha3::{Digest, Sha3_256};

use crate::models::User;
use crate::store::{StoreError, UserStore};

pub const USERNAME_COOKIE: &str = "username";
pub const SESSION_COOKIE: &str = "session";

/// Compares secrets without exiting at the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

#[derive(Clone)]
pub struct SessionSigner {
    secret: String,
}

impl std::fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSigner").finish_non_exhaustive()
    }
}

impl SessionSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn token(&self, username: &str, updated_at: DateTime<Utc>) -> String {
        let mut hasher = Sha3_256::new();
        hasher.update(username.as_bytes());
        hasher.update(self.secret.as_bytes());
        hasher.update(updated_at.timestamp_micros().to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn token_for(&self, user: &User) -> String {
        self.token(&user.username, user.updated_at)
    }

    /// Resolves the cookie pair to a user, or `None` for anonymous callers.
    #[tracing::instrument(name = "Resolve session", skip(self, store, token))]
    pub async fn current_user<S>(
        &self,
        store: &S,
        username: &str,
        token: &str,
    ) -> Result<Option<User>, StoreError>
    where
        S: UserStore + ?Sized,
    {
        if username.is_empty() || token.is_empty() {
            return Ok(None);
        }

        let Some(user) = store.user_by_name(username).await? else {
            tracing::debug!("Session names an unknown user");
            return Ok(None);
        };

        if !constant_time_eq(&self.token_for(&user), token) {
            tracing::warn!("Stale or forged session for {}", username);
            return Ok(None);
        }

        Ok(Some(user))
    }
}
