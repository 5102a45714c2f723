use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use postbox_types::api::{UserResponse, UserSummary};
use postbox_types::models::EntityKind;

use crate::error::ApiError;
use crate::pipeline::{self, NEW_USER, USER_RENAME};
use crate::state::{AppState, run_blocking};

/// Stored in place of a hash when upserts create users without a credential.
/// Not a PHC string, so it never verifies.
const NO_CREDENTIAL: &str = "!";

enum Upserted {
    Updated,
    Created,
}

/// GET /users
pub async fn list_users(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let rows = run_blocking(&state, |s| s.db.list_users()).await?;
    let users: Vec<UserSummary> = rows
        .into_iter()
        .map(|row| UserSummary {
            id: row.id,
            username: row.username,
        })
        .collect();
    Ok(Json(users))
}

/// GET /users/{key}, where `key` is an id or a username.
pub async fn get_user(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let row = run_blocking(&state, move |s| s.db.find_user(&key))
        .await?
        .ok_or(ApiError::NotFound(EntityKind::User))?;

    let created_at = crate::parse_timestamp(&row.created_at, &row.id);
    Ok(Json(UserResponse {
        id: row.id,
        username: row.username,
        password: row.password,
        created_at,
    }))
}

/// POST /users
pub async fn create_user(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let payload = pipeline::parse_payload(&body)?;

    let user_id = pipeline::submit(&state, &payload, &NEW_USER, None, |s, validated| {
        let user = validated.into_new_user()?;
        let hash = s.hasher.hash(&user.password)?;
        let id = Uuid::new_v4().to_string();
        s.db.create_user(&id, &user.username, &hash)?;
        info!("Created user {} ({})", user.username, id);
        Ok(id)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/users/{}", user_id))],
        Json(json!({})),
    ))
}

/// PUT /users/{id}: rename the user, or create it under this id.
///
/// The existence check and the insert are separate store calls. Two racing
/// upserts of a new id can both miss; the primary key then rejects the
/// second insert and that request fails with a store error.
pub async fn upsert_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload = pipeline::parse_payload(&body)?;

    let id = user_id.clone();
    let outcome = pipeline::submit(&state, &payload, &USER_RENAME, None, move |s, validated| {
        let rename = validated.into_user_rename()?;
        if s.db.rename_user(&id, &rename.username)? {
            return Ok(Upserted::Updated);
        }

        let hash = match &s.policy.placeholder_password {
            Some(placeholder) => s.hasher.hash(placeholder)?,
            None => NO_CREDENTIAL.to_string(),
        };
        s.db.create_user(&id, &rename.username, &hash)?;
        info!("Created user {} ({}) by upsert", rename.username, id);
        Ok(Upserted::Created)
    })
    .await?;

    let response = match outcome {
        Upserted::Created if state.policy.distinguish_upsert => (
            StatusCode::CREATED,
            [(header::LOCATION, format!("/users/{}", user_id))],
            Json(json!({})),
        )
            .into_response(),
        _ => Json(json!({})).into_response(),
    };
    Ok(response)
}

/// DELETE /users/{id}
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = user_id.clone();
    if !run_blocking(&state, move |s| s.db.delete_user(&id)).await? {
        return Err(ApiError::NotFound(EntityKind::User));
    }
    info!("Deleted user {}", user_id);
    Ok(Json(json!({})))
}
