use crate::error::AppError;
use crate::session::ChallengeSession;
use axum::{extract::Request, middleware::Next, response::Response};
use tower_sessions::Session;

/// Reject requests whose session has not completed an authentication.
pub async fn require_auth(
    session: Session,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if ChallengeSession::new(session).is_logged_in().await? {
        Ok(next.run(request).await)
    } else {
        Err(AppError::Unauthorized("Not authenticated".to_string()))
    }
}
