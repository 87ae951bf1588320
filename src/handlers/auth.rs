//! # Ceremony Handlers
//!
//! Registration, authentication, session and logout endpoints.
//!
//! Requests sharing a session cookie reach these handlers one at a time,
//! see `middleware::session_lock`.

use axum::extract::rejection::JsonRejection;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use tower_sessions::Session;

use crate::error::{AppError, AppResult};
use crate::session::ChallengeSession;
use crate::state::AppState;
use crate::webauthn::types::{
    AuthenticationOptionsRequest, CredentialResponse, RegistrationOptionsRequest,
};

fn require_username(username: &str) -> AppResult<&str> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AppError::BadRequest("username is required".to_string()));
    }
    Ok(username)
}

/// Attach a sign-in token to a verify response when the bridge is enabled.
fn with_token(state: &AppState, mut body: Value, uid: &str) -> AppResult<Json<Value>> {
    if let Some(token) = state.mint_token(uid)? {
        body["token"] = Value::String(token);
    }
    Ok(Json(body))
}

/// POST /registration/options
///
/// ```json
/// { "username": "alice", "displayName": "Alice Smith" }
/// ```
///
/// Returns the `PublicKeyCredentialCreationOptions` for `navigator.credentials.create()`.
pub async fn registration_options(
    State(state): State<AppState>,
    session: Session,
    body: Result<Json<RegistrationOptionsRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(req) = body?;
    let username = require_username(&req.username)?;
    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(username);

    let options = state
        .coordinator
        .begin_registration(&ChallengeSession::new(session), username, display_name)
        .await?;

    Ok(Json(options))
}

/// POST /registration/verify
///
/// Body is the credential returned by the browser, bare or as `{ "attResp": ... }`.
pub async fn registration_verify(
    State(state): State<AppState>,
    session: Session,
    body: Result<Json<CredentialResponse>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(CredentialResponse(response)) = body?;

    let outcome = state
        .coordinator
        .complete_registration(&ChallengeSession::new(session), &response)
        .await?;

    tracing::debug!(
        "Credential {} now usable by '{}' over {:?}",
        outcome.record.credential_id,
        outcome.identity.name,
        outcome.record.transports
    );
    with_token(&state, json!({ "verified": true }), &outcome.identity.id.to_string())
}

/// POST /authentication/options
///
/// ```json
/// { "username": "alice" }
/// ```
pub async fn authentication_options(
    State(state): State<AppState>,
    session: Session,
    body: Result<Json<AuthenticationOptionsRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(req) = body?;
    let username = require_username(&req.username)?;

    let options = state
        .coordinator
        .begin_authentication(&ChallengeSession::new(session), username)
        .await?;

    Ok(Json(options))
}

/// POST /authentication/verify
///
/// On success the session is logged in as the returned identity.
pub async fn authentication_verify(
    State(state): State<AppState>,
    session: Session,
    body: Result<Json<CredentialResponse>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(CredentialResponse(response)) = body?;

    let outcome = state
        .coordinator
        .complete_authentication(&ChallengeSession::new(session), &response)
        .await?;

    tracing::debug!(
        "Session logged in as '{}' (credential {}, counter {})",
        outcome.identity.name,
        outcome.credential_id,
        outcome.counter
    );
    let uid = outcome.identity.id.to_string();
    with_token(
        &state,
        json!({ "verified": true, "identity": outcome.identity }),
        &uid,
    )
}

/// POST /logout
pub async fn logout(session: Session) -> AppResult<Json<Value>> {
    ChallengeSession::new(session).destroy().await?;

    Ok(Json(json!({ "success": true })))
}

/// GET /session
pub async fn session_info(session: Session) -> AppResult<Json<Value>> {
    let identity = ChallengeSession::new(session).identity().await?;

    Ok(Json(json!({
        "loggedIn": identity.is_some(),
        "identity": identity,
    })))
}
