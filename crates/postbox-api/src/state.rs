use std::sync::Arc;

use tracing::error;

use postbox_db::Database;

use crate::error::ApiError;
use crate::hasher::CredentialHasher;

pub type AppState = Arc<AppStateInner>;

/// Everything a handler may touch. Handlers hold no other state.
pub struct AppStateInner {
    pub db: Database,
    pub hasher: CredentialHasher,
    pub policy: Policy,
}

impl AppStateInner {
    pub fn new(db: Database, policy: Policy) -> AppState {
        Arc::new(Self {
            db,
            hasher: CredentialHasher::default(),
            policy,
        })
    }
}

/// Per-deployment switches for the behaviours that differ between API
/// revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// `GET /users` requires Basic credentials.
    pub auth_user_list: bool,
    /// `POST /messages` requires Basic credentials, and the sender must be
    /// the authenticated user.
    pub auth_messages: bool,
    /// `PUT /users/{id}` answers `201 Created` with a `Location` when it
    /// created the user, instead of the uniform `200 {}`.
    pub distinguish_upsert: bool,
    /// Credential given to users created through an upsert. `None` stores
    /// a hash that never verifies.
    pub placeholder_password: Option<String>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            auth_user_list: true,
            auth_messages: true,
            distinguish_upsert: false,
            placeholder_password: Some("userPassword".into()),
        }
    }
}

/// Run store (and hashing) work off the async runtime.
pub async fn run_blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppStateInner) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Store(e.into())
        })?
        .map_err(ApiError::Store)
}
