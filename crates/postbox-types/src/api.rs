use serde::{Deserialize, Serialize};

// -- Users --

/// Entry in `GET /users` and the expanded form of a message reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
}

/// `GET /users/{key}` returns the whole record, password hash included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// -- Messages --

/// Query string of `GET /messages`. Unrecognised parameters are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct MessageFilter {
    pub to: Option<String>,
    pub from: Option<String>,
}

/// A message with `from`/`to` expanded. A reference whose user has since been
/// deleted expands to `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: String,
    pub text: String,
    pub from: Option<UserSummary>,
    pub to: Option<UserSummary>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// -- Errors --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}
