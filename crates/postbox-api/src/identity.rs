use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Basic};
use thiserror::Error;
use tracing::{debug, warn};

use postbox_types::models::Identity;

use crate::error::ApiError;
use crate::state::{AppState, run_blocking};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing or malformed Basic credentials")]
    MissingCredentials,

    #[error("unknown user")]
    UnknownUser,

    #[error("bad credential")]
    BadCredential,
}

/// Check a username/password pair against the stored hash.
///
/// Stateless: nothing is remembered between calls, so every gated request
/// pays for a full lookup and hash verification.
pub async fn authenticate(
    state: &AppState,
    username: &str,
    password: &str,
) -> Result<Identity, ApiError> {
    let username = username.to_string();
    let password = password.to_string();

    let outcome = run_blocking(state, move |s| {
        let Some(user) = s.db.get_user_by_username(&username)? else {
            // Same Argon2 work as a wrong password, so timing does not reveal
            // which usernames exist.
            s.hasher.verify_absent(&password);
            return Ok(Err(AuthError::UnknownUser));
        };
        if !s.hasher.verify(&password, &user.password) {
            return Ok(Err(AuthError::BadCredential));
        }
        Ok(Ok(Identity {
            id: user.id,
            username: user.username,
        }))
    })
    .await?;

    Ok(outcome?)
}

/// Require `Authorization: Basic ...` and put the resolved [`Identity`] into
/// the request extensions.
pub async fn require_basic_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let credentials = req
        .headers()
        .typed_get::<Authorization<Basic>>()
        .ok_or(AuthError::MissingCredentials)?;

    let identity = authenticate(&state, credentials.username(), credentials.password())
        .await
        .inspect_err(|e| warn!("Rejected credentials for '{}': {}", credentials.username(), e))?;

    debug!("Authenticated {} ({})", identity.username, identity.id);
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
