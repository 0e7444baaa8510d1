//! Error types for the signup pipeline

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::mail::MailError;
use crate::store::StoreError;

/// Why a subscribe request did not end in `{ok: true}`.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("Too many requests")]
    RateLimited,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Content-Type must be application/json")]
    UnsupportedContentType,

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Invalid request body")]
    BodyRead(#[source] axum::Error),

    #[error("Invalid JSON")]
    MalformedJson(#[source] serde_json::Error),

    #[error("Unexpected field: {0}")]
    UnexpectedField(String),

    #[error("Missing bot verification token")]
    MissingToken,

    #[error("Bot verification failed")]
    BotCheckFailed,

    #[error("Invalid email")]
    InvalidEmail,

    #[error("Too many signups from this address")]
    TooManyFromIp,

    #[error("Storage error")]
    Storage(#[from] StoreError),

    #[error("Email delivery failed")]
    Email(#[from] MailError),
}

impl SubscribeError {
    pub fn status(&self) -> StatusCode {
        match self {
            SubscribeError::RateLimited | SubscribeError::TooManyFromIp => {
                StatusCode::TOO_MANY_REQUESTS
            }
            SubscribeError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            SubscribeError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            SubscribeError::UnsupportedContentType
            | SubscribeError::BodyRead(_)
            | SubscribeError::MalformedJson(_)
            | SubscribeError::UnexpectedField(_)
            | SubscribeError::MissingToken
            | SubscribeError::BotCheckFailed
            | SubscribeError::InvalidEmail => StatusCode::BAD_REQUEST,
            SubscribeError::Storage(_) | SubscribeError::Email(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Metric label for this rejection.
    pub fn reason(&self) -> &'static str {
        match self {
            SubscribeError::RateLimited => "rate_limited",
            SubscribeError::MethodNotAllowed => "method",
            SubscribeError::UnsupportedContentType => "content_type",
            SubscribeError::PayloadTooLarge => "too_large",
            SubscribeError::BodyRead(_) => "body_read",
            SubscribeError::MalformedJson(_) => "malformed_json",
            SubscribeError::UnexpectedField(_) => "unexpected_field",
            SubscribeError::MissingToken => "missing_token",
            SubscribeError::BotCheckFailed => "bot_check",
            SubscribeError::InvalidEmail => "invalid_email",
            SubscribeError::TooManyFromIp => "ip_abuse",
            SubscribeError::Storage(_) => "storage",
            SubscribeError::Email(_) => "email",
        }
    }

    pub fn is_dependency_failure(&self) -> bool {
        matches!(self, SubscribeError::Storage(_) | SubscribeError::Email(_))
    }
}

impl IntoResponse for SubscribeError {
    fn into_response(self) -> Response {
        // Display is the safe category; sources stay in the server log
        let body = Json(json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}
