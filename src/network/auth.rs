//! Authentication (player-manager half of C5's `auth`).
//!
//! Validates the opaque token a session presents against the persistence
//! layer. Unlike the teacher's `auth.rs`, this server issues and owns its
//! own tokens (no external JWT provider): a token is just the row in
//! `users.token` the credential was stored under at registration time.

use std::sync::Arc;
use thiserror::Error;

use crate::db::{Database, User};

/// Authentication configuration. Kept as its own small struct (rather than
/// folded into `Config`) since it may eventually grow provider-specific
/// knobs (e.g. token rotation policy) independent of the rest of the
/// server's settings.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Shared secret gating new registrations (§6 `registration_key`).
    pub registration_key: String,
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token did not match any user.
    #[error("unknown token")]
    UnknownToken,
    /// Registration attempted with the wrong shared secret.
    #[error("invalid registration key")]
    InvalidRegistrationKey,
    /// Underlying store failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] crate::error::CoreError),
}

/// Look up the user a token belongs to. Returns `Ok(None)` for an unknown
/// token (§4.2: "unknown token ⇒ return false, caller disconnects" --
/// modeled here as `None` rather than a bool so the caller gets the
/// resolved `User` in the same call).
pub fn authenticate(db: &Database, token: &str) -> Result<Option<User>, AuthError> {
    Ok(db.get_user_by_token(token)?)
}

/// Register a new account, gated by `registration_key` (§6).
pub fn register(
    db: &Arc<Database>,
    config: &AuthConfig,
    presented_key: &str,
    username: &str,
    password: &str,
    role: crate::db::Role,
) -> Result<(i64, String), AuthError> {
    if presented_key != config.registration_key {
        return Err(AuthError::InvalidRegistrationKey);
    }
    let token = uuid::Uuid::new_v4().to_string();
    let user_id = db.register_user(username, password, &token, role)?;
    Ok((user_id, token))
}
