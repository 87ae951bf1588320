//! # User Handlers
//!
//! Read-only view of the logged-in user.

use axum::{extract::State, Json};
use serde_json::{json, Value};
use tower_sessions::Session;

use crate::error::{AppError, AppResult};
use crate::session::ChallengeSession;
use crate::state::AppState;

/// Get the logged-in identity and its registered authenticators
///
/// ## Route
/// GET /me (behind `require_auth`)
///
/// ## Response
/// ```json
/// {
///   "identity": { "id": "550e8400-...", "name": "alice", "displayName": "Alice" },
///   "credentials": [
///     { "credentialId": "a2V5LTE", "owner": "550e8400-...", "signCounter": 6,
///       "transports": ["internal"], "createdAt": "...", "lastUsedAt": "..." }
///   ]
/// }
/// ```
///
/// Public keys are never included.
pub async fn get_current_user(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<Value>> {
    let identity = ChallengeSession::new(session)
        .identity()
        .await?
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))?;

    // The directory entry is authoritative over what the session cached
    let identity = state
        .users
        .find_by_id(&identity.id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("user {} is not in the directory", identity.id)))?;
    let credentials = state
        .coordinator
        .credentials()
        .list_by_owner(&identity.id)
        .await?;

    Ok(Json(json!({
        "identity": identity,
        "credentials": credentials,
    })))
}
