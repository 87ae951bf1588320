use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tower_sessions::cookie::Cookie;

use crate::session::SessionLocks;

/// Value of the cookie `name` among the request's `Cookie` headers.
fn session_cookie(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

/// Run at most one request per session cookie at a time.
///
/// Must sit outside the session layer: the session is loaded before the
/// handler and saved after it, and both have to happen under the lock.
pub async fn serialize_session(
    State(locks): State<Arc<SessionLocks>>,
    request: Request,
    next: Next,
) -> Response {
    let key = session_cookie(&request, locks.cookie_name());
    let _guard = locks.acquire(key.as_deref()).await;
    next.run(request).await
}
