//! # Error Handling
//!
//! The HTTP-boundary error type and how each failure is rendered.
//!
//! Every failure becomes a non-2xx response with a JSON body:
//!
//! ```json
//! { "error": "counter_replay", "message": "Signature counter 6 does not exceed stored counter 6" }
//! ```
//!
//! `error` is a stable machine-readable kind; `message` is for humans.
//! Storage faults are reported as `storage_unavailable` (503) so a client can
//! tell "try again" apart from "your authenticator was rejected".

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::bridge::BridgeError;
use crate::db::StoreError;
use crate::webauthn::CeremonyError;

/// Application-wide error type
///
/// The `#[from]` attributes let handlers use `?` on coordinator, store,
/// session and bridge results directly.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Ceremony(#[from] CeremonyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    #[error("Token error: {0}")]
    Token(#[from] BridgeError),

    /// Client sent something unusable (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// No logged-in session (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl AppError {
    /// Machine-readable kind and status code of this error.
    pub fn kind(&self) -> (&'static str, StatusCode) {
        match self {
            AppError::Ceremony(e) => match e {
                CeremonyError::NoPendingChallenge => ("no_pending_challenge", StatusCode::BAD_REQUEST),
                CeremonyError::ChallengeExpired => ("challenge_expired", StatusCode::BAD_REQUEST),
                CeremonyError::NoSuchCredential => ("no_such_credential", StatusCode::NOT_FOUND),
                CeremonyError::NoAuthenticatorsRegistered => {
                    ("no_authenticators_registered", StatusCode::NOT_FOUND)
                }
                CeremonyError::CounterReplay { .. } => ("counter_replay", StatusCode::UNAUTHORIZED),
                CeremonyError::VerificationFailure(_) => {
                    ("verification_failure", StatusCode::UNAUTHORIZED)
                }
                CeremonyError::DuplicateCredential => ("duplicate_credential", StatusCode::CONFLICT),
                CeremonyError::IdentityTaken => ("identity_taken", StatusCode::CONFLICT),
                CeremonyError::Store(_) => ("storage_unavailable", StatusCode::SERVICE_UNAVAILABLE),
                CeremonyError::Session(_) => ("session_error", StatusCode::INTERNAL_SERVER_ERROR),
            },
            AppError::Store(StoreError::Duplicate(_)) => {
                ("duplicate_credential", StatusCode::CONFLICT)
            }
            AppError::Store(StoreError::NameTaken(_)) => ("identity_taken", StatusCode::CONFLICT),
            AppError::Store(_) => ("storage_unavailable", StatusCode::SERVICE_UNAVAILABLE),
            AppError::Session(_) => ("session_error", StatusCode::INTERNAL_SERVER_ERROR),
            AppError::Token(_) => ("token_error", StatusCode::INTERNAL_SERVER_ERROR),
            AppError::BadRequest(_) => ("bad_request", StatusCode::BAD_REQUEST),
            AppError::Unauthorized(_) => ("unauthorized", StatusCode::UNAUTHORIZED),
            AppError::Internal(_) => ("internal", StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

/// Convert AppError into an HTTP response
///
/// Server-side faults are logged in full and shown to the client with a
/// generic message; ceremony rejections carry their own message.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (kind, status) = self.kind();

        let message = if status.is_server_error() {
            tracing::error!("{}: {:?}", kind, self);
            match kind {
                "storage_unavailable" => "Storage is unavailable, try again".to_string(),
                "session_error" => "Session error".to_string(),
                "token_error" => "Could not mint sign-in token".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            tracing::debug!("{}: {}", kind, self);
            self.to_string()
        };

        let body = Json(json!({
            "error": kind,
            "message": message,
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;
