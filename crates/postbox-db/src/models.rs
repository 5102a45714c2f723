//! Database row types — these map directly to SQLite rows.
//! Distinct from postbox-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

/// A message joined with both of its referenced users. The username columns
/// are `None` when the referenced user no longer exists.
pub struct MessageRow {
    pub id: String,
    pub text: String,
    pub from_id: String,
    pub from_username: Option<String>,
    pub to_id: String,
    pub to_username: Option<String>,
    pub created_at: String,
}
