use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use postbox_db::models::MessageRow;
use postbox_types::api::{MessageFilter, MessageResponse, UserSummary};
use postbox_types::models::{EntityKind, Identity};

use crate::error::ApiError;
use crate::pipeline::{self, NEW_MESSAGE};
use crate::state::{AppState, run_blocking};

/// POST /messages
///
/// `caller` is present only when the route sits behind the Basic auth
/// layer; without it the sender is taken on trust.
pub async fn send_message(
    State(state): State<AppState>,
    caller: Option<Extension<Identity>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let payload = pipeline::parse_payload(&body)?;
    let caller = caller.map(|Extension(identity)| identity);

    let message_id = pipeline::submit(&state, &payload, &NEW_MESSAGE, caller.as_ref(), |s, validated| {
        let message = validated.into_new_message()?;
        let id = Uuid::new_v4().to_string();
        s.db.insert_message(&id, &message.text, &message.from, &message.to)?;
        info!("Message {} from {} to {}", id, message.from, message.to);
        Ok(id)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/messages/{}", message_id))],
        Json(json!({})),
    ))
}

/// GET /messages?from=&to=
pub async fn get_messages(
    State(state): State<AppState>,
    Query(filter): Query<MessageFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = run_blocking(&state, move |s| {
        s.db.get_messages(filter.from.as_deref(), filter.to.as_deref())
    })
    .await?;

    let messages: Vec<MessageResponse> = rows.into_iter().map(expand).collect();
    Ok(Json(messages))
}

/// GET /messages/{id}
pub async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let row = run_blocking(&state, move |s| s.db.get_message(&message_id))
        .await?
        .ok_or(ApiError::NotFound(EntityKind::Message))?;
    Ok(Json(expand(row)))
}

/// Resolve the stored user ids into user summaries.
fn expand(row: MessageRow) -> MessageResponse {
    let created_at = crate::parse_timestamp(&row.created_at, &row.id);
    MessageResponse {
        from: row.from_username.map(|username| UserSummary {
            id: row.from_id,
            username,
        }),
        to: row.to_username.map(|username| UserSummary {
            id: row.to_id,
            username,
        }),
        id: row.id,
        text: row.text,
        created_at,
    }
}
