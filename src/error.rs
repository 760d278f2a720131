use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::engine::otp::OtpError;
use crate::models::booking::TransitionError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("not allowed: {0}")]
    Authorization(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("expired: {0}")]
    Expired(String),

    #[error("mismatch: {0}")]
    Mismatch(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Unauthenticated(_) => "unauthenticated",
            AppError::Authorization(_) => "authorization",
            AppError::Precondition(_) => "precondition",
            AppError::NotFound(_) => "not_found",
            AppError::Expired(_) => "expired",
            AppError::Mismatch(_) => "mismatch",
            AppError::Conflict(_) => "conflict",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Duplicate(what) => AppError::Conflict(what),
            StoreError::StatusMismatch { actual, .. } => AppError::Precondition(format!(
                "booking is {actual}; the requested change no longer applies"
            )),
            StoreError::Backend(msg) => AppError::Internal(msg),
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        AppError::Precondition(err.to_string())
    }
}

impl From<OtpError> for AppError {
    fn from(err: OtpError) -> Self {
        match err {
            OtpError::NotFound => {
                AppError::NotFound("code not found; please request a new one".to_string())
            }
            OtpError::Expired => AppError::Expired("code expired; please request a new one".to_string()),
            OtpError::Mismatch => AppError::Mismatch("invalid code".to_string()),
            OtpError::Store(err) => err.into(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Authorization(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Precondition(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Expired(msg) => (StatusCode::GONE, msg.clone()),
            AppError::Mismatch(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message,
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

/// Failure of an outbound side channel (mail relay, geocoder). Callers log it
/// and degrade; it never becomes an [`AppError`].
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport failed: {0}")]
    Transport(String),

    #[error("upstream rejected request: {0}")]
    Rejected(String),

    #[error("unreadable upstream response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            DeliveryError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            DeliveryError::Rejected(status.to_string())
        } else {
            DeliveryError::Transport(err.to_string())
        }
    }
}
