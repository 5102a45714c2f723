use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use postbox_types::api::ErrorBody;
use postbox_types::models::EntityKind;

use crate::identity::AuthError;

/// Every way a request can fail. Each variant is terminal: the handler that
/// detects it returns immediately and nothing is retried.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No request body")]
    NoBody,

    #[error("Malformed JSON body")]
    MalformedBody,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Incorrect field type: {0}")]
    WrongType(&'static str),

    #[error("Incorrect field length: {0}")]
    EmptyValue(&'static str),

    #[error("Incorrect field value: {0}")]
    UnresolvedReference(&'static str),

    #[error("You can only send messages as yourself")]
    IdentityMismatch,

    #[error("Unauthorized: {0}")]
    Auth(#[from] AuthError),

    #[error("{0} not found")]
    NotFound(EntityKind),

    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoBody | Self::MalformedBody => StatusCode::BAD_REQUEST,
            Self::MissingField(_)
            | Self::WrongType(_)
            | Self::EmptyValue(_)
            | Self::UnresolvedReference(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::IdentityMismatch | Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Never say whether the username or the password was wrong.
            Self::Auth(_) => "Unauthorized".to_string(),
            Self::Store(e) => {
                error!("Store error: {:#}", e);
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let mut response = (status, Json(ErrorBody { message })).into_response();
        if let Self::Auth(_) = self {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"postbox\""),
            );
        }
        response
    }
}
