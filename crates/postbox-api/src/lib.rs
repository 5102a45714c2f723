pub mod error;
pub mod hasher;
pub mod identity;
pub mod messages;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod users;

pub use error::ApiError;
pub use routes::build_router;
pub use state::{AppState, AppStateInner, Policy};

use tracing::warn;

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
/// Parse as naive UTC; a corrupt value degrades to the epoch.
pub(crate) fn parse_timestamp(raw: &str, row_id: &str) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on row '{}': {}", raw, row_id, e);
            chrono::DateTime::default()
        })
}
