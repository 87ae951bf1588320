//! # Application State
//!
//! Shared state handed to every request handler. Axum clones it per request,
//! which is cheap because everything inside is behind an `Arc` (or is a pool
//! handle, itself reference counted).

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;

use crate::bridge::IdentityBridge;
use crate::config::{Config, StoreBackend};
use crate::db::memory::InMemoryStore;
use crate::db::sqlite::SqliteCredentialStore;
use crate::db::{CredentialStore, UserStore};
use crate::session::SessionLocks;
use crate::webauthn::verifier::{CeremonyVerifier, WebauthnVerifier};
use crate::webauthn::Coordinator;

/// Cookie name `SessionManagerLayer` uses unless told otherwise
const DEFAULT_SESSION_COOKIE: &str = "id";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,

    pub users: Arc<dyn UserStore>,

    /// Mints provider sign-in tokens after successful ceremonies, when configured
    pub bridge: Option<Arc<IdentityBridge>>,

    /// Keyed by the value of the session cookie
    pub session_locks: Arc<SessionLocks>,

    /// Connection pool of the SQLite backend, shared with the session store
    pub db: Option<SqlitePool>,
}

impl AppState {
    /// Initialize application state
    ///
    /// 1. Opens the configured backend (running migrations for SQLite)
    /// 2. Configures WebAuthn with the relying party information
    /// 3. Loads the bridge service account, if any
    pub async fn new(config: &Config) -> Result<Self> {
        let verifier = WebauthnVerifier::new(&config.rp_id, &config.rp_origin, &config.rp_name)
            .context("invalid relying party configuration")?;

        let bridge = match &config.bridge_service_account {
            Some(path) => {
                let bridge = IdentityBridge::from_service_account_file(path)
                    .with_context(|| format!("cannot load service account {}", path.display()))?;
                tracing::info!("Identity bridge enabled for {}", bridge.issuer());
                Some(Arc::new(bridge))
            }
            None => None,
        };

        let mut state = match config.store_backend {
            StoreBackend::Memory => {
                let store = Arc::new(InMemoryStore::new());
                Self::from_parts(store.clone(), store, Arc::new(verifier), config.challenge_ttl, bridge)
            }
            StoreBackend::Sqlite => {
                let pool = SqlitePool::connect(&config.database_url)
                    .await
                    .with_context(|| format!("cannot open {}", config.database_url))?;
                let store = Arc::new(SqliteCredentialStore::new(pool.clone()).await?);
                tracing::info!("Using SQLite store at {}", config.database_url);
                let mut state = Self::from_parts(
                    store.clone(),
                    store,
                    Arc::new(verifier),
                    config.challenge_ttl,
                    bridge,
                );
                state.db = Some(pool);
                state
            }
        };
        state.session_locks = Arc::new(SessionLocks::new(config.session_cookie_name.clone()));

        Ok(state)
    }

    /// Assemble state from already constructed components.
    ///
    /// Session locks follow the default tower-sessions cookie name.
    pub fn from_parts(
        users: Arc<dyn UserStore>,
        credentials: Arc<dyn CredentialStore>,
        verifier: Arc<dyn CeremonyVerifier>,
        challenge_ttl: chrono::Duration,
        bridge: Option<Arc<IdentityBridge>>,
    ) -> Self {
        let coordinator = Coordinator::new(users.clone(), credentials, verifier, challenge_ttl);
        AppState {
            coordinator: Arc::new(coordinator),
            users,
            bridge,
            session_locks: Arc::new(SessionLocks::new(DEFAULT_SESSION_COOKIE)),
            db: None,
        }
    }

    /// Mint a sign-in token for `uid` if the bridge is enabled.
    pub fn mint_token(&self, uid: &str) -> Result<Option<String>, crate::bridge::BridgeError> {
        self.bridge
            .as_ref()
            .map(|bridge| bridge.mint_token(uid))
            .transpose()
    }
}
