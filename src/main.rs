//! # Passkey Bridge
//!
//! Passwordless sign-in server: runs WebAuthn registration and
//! authentication ceremonies against a per-browser session, and can hand a
//! successfully authenticated user a custom sign-in token for an external
//! identity provider.
//!
//! ## Key Concepts
//! - **Ceremony**: an options/verify exchange that registers a new passkey
//!   or proves possession of one
//! - **Challenge session**: server-side session holding the one challenge a
//!   browser may currently answer
//! - **Identity bridge**: exchanges the verified identity for a provider token

mod app;
mod bridge;
mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod session;
mod state;
mod webauthn;

#[cfg(test)]
mod test_utils;

use crate::config::{Config, StoreBackend};
use crate::state::AppState;
use axum::http::{header, HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tower_sessions::cookie::SameSite;
use tower_sessions::session_store::ExpiredDeletion;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, SessionStore};
use tower_sessions_sqlx_store::SqliteStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired sessions are purged from the SQLite session table
const SESSION_CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: info for dependencies, debug for this crate; RUST_LOG overrides
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,passkey_bridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded: {:?}", config);

    let app_state = AppState::new(&config).await?;
    tracing::info!(
        "Application state initialized (backend: {:?}, rp_id: {})",
        config.store_backend,
        config.rp_id
    );

    match (config.store_backend, app_state.db.clone()) {
        (StoreBackend::Sqlite, Some(pool)) => {
            let session_store = SqliteStore::new(pool);
            session_store.migrate().await?;

            let cleanup_store = session_store.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(SESSION_CLEANUP_INTERVAL);
                loop {
                    interval.tick().await;
                    tracing::debug!("Running expired session cleanup");
                    if let Err(e) = cleanup_store.delete_expired().await {
                        tracing::error!("Session cleanup failed: {:?}", e);
                    }
                }
            });

            serve(&config, app_state, session_store).await
        }
        _ => serve(&config, app_state, MemoryStore::default()).await,
    }
}

/// Build the session layer, wrap the router in CORS and tracing, and serve it.
async fn serve<S>(config: &Config, app_state: AppState, session_store: S) -> anyhow::Result<()>
where
    S: SessionStore + Clone,
{
    let session_layer = SessionManagerLayer::new(session_store)
        .with_name(config.session_cookie_name.clone())
        .with_same_site(SameSite::Lax)
        .with_http_only(true)
        .with_secure(config.cookie_secure)
        .with_expiry(Expiry::OnInactivity(config.session_max_age));

    // Cookies are sent cross-origin, so the origin must be explicit
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_str(&config.cors_origin)?)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    let app = app::router(app_state, session_layer)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let bind_addr = config.bind_address();
    tracing::info!("Starting server on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
