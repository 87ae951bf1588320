//! # Router
//!
//! Route table shared by the server binary and the router tests. The caller
//! builds the session layer, since the session store depends on the
//! configured backend, and adds CORS and tracing on top.

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_sessions::{SessionManagerLayer, SessionStore};

use crate::handlers::auth::*;
use crate::handlers::health::health_check;
use crate::handlers::users::get_current_user;
use crate::middleware::auth::require_auth;
use crate::middleware::session_lock::serialize_session;
use crate::state::AppState;

pub fn router<S>(state: AppState, session_layer: SessionManagerLayer<S>) -> Router
where
    S: SessionStore + Clone,
{
    let session_locks = state.session_locks.clone();

    // Routes behind a logged-in session
    let protected_routes = Router::new()
        .route("/me", get(get_current_user))
        .layer(axum_middleware::from_fn(require_auth));

    Router::new()
        .route("/health", get(health_check))
        // Registration: options, then verify the attestation
        .route("/registration/options", post(registration_options))
        .route("/registration/verify", post(registration_verify))
        // Authentication: options, then verify the assertion
        .route("/authentication/options", post(authentication_options))
        .route("/authentication/verify", post(authentication_verify))
        .route("/logout", post(logout))
        .route("/session", get(session_info))
        .merge(protected_routes)
        .with_state(state)
        .layer(session_layer)
        // Outermost, so the lock also covers loading and saving the session
        .layer(axum_middleware::from_fn_with_state(session_locks, serialize_session))
}
