use axum::{
    Json, Router, middleware,
    response::IntoResponse,
    routing::{MethodRouter, get, post},
};
use serde_json::json;

use crate::identity::require_basic_auth;
use crate::messages;
use crate::state::AppState;
use crate::users;

/// All HTTP routes. Which endpoints sit behind Basic auth depends on
/// `state.policy`.
pub fn build_router(state: AppState) -> Router {
    let auth = middleware::from_fn_with_state(state.clone(), require_basic_auth);

    let mut list_users: MethodRouter<AppState> = get(users::list_users);
    if state.policy.auth_user_list {
        list_users = list_users.route_layer(auth.clone());
    }

    let mut send_message: MethodRouter<AppState> = post(messages::send_message);
    if state.policy.auth_messages {
        send_message = send_message.route_layer(auth);
    }

    Router::new()
        .route("/health", get(health))
        .route("/users", list_users.post(users::create_user))
        .route(
            "/users/{id}",
            get(users::get_user)
                .put(users::upsert_user)
                .delete(users::delete_user),
        )
        .route("/messages", send_message.get(messages::get_messages))
        .route("/messages/{id}", get(messages::get_message))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
