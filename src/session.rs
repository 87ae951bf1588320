//! # Ceremony Session State
//!
//! Per-browser state kept server-side by tower-sessions: the one outstanding
//! ceremony (if any) and the logged-in identity.
//!
//! [`ChallengeSession`] is the handle the coordinator is given explicitly;
//! [`SessionLocks`] serializes requests that share a session cookie.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tower_sessions::session::Error as SessionError;
use tower_sessions::Session;
use uuid::Uuid;

use crate::db::models::UserIdentity;

const PENDING_KEY: &str = "pending_ceremony";
const LOGGED_IN_KEY: &str = "logged_in";
const IDENTITY_KEY: &str = "identity";
const CLAIMED_KEY: &str = "claimed_identity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CeremonyKind {
    Registration,
    Authentication,
}

/// The challenge issued by the last options call, with what it was issued for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCeremony {
    pub kind: CeremonyKind,

    /// Verifier state carrying the challenge, opaque to everything but the verifier
    pub state: Vec<u8>,

    pub identity: UserIdentity,

    pub issued_at: DateTime<Utc>,
}

/// Explicit handle over the transport session.
#[derive(Clone)]
pub struct ChallengeSession {
    session: Session,
}

impl ChallengeSession {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Record a freshly issued challenge, replacing whatever was pending.
    ///
    /// Written through to the store immediately; the session layer saves
    /// again after the handler, still under the per-session lock.
    pub async fn set_pending(&self, pending: &PendingCeremony) -> Result<(), SessionError> {
        self.session.insert(PENDING_KEY, pending).await?;
        self.session.save().await
    }

    pub async fn get_pending(&self) -> Result<Option<PendingCeremony>, SessionError> {
        self.session.get(PENDING_KEY).await
    }

    pub async fn clear_pending(&self) -> Result<(), SessionError> {
        self.session.remove_value(PENDING_KEY).await?;
        Ok(())
    }

    /// Remove and return the pending ceremony in one step.
    ///
    /// The removal is written to the store before returning, so a failure
    /// later in the request cannot leave the challenge reusable.
    pub async fn take_pending(&self) -> Result<Option<PendingCeremony>, SessionError> {
        let pending = self.get_pending().await?;
        if pending.is_some() {
            self.clear_pending().await?;
            self.session.save().await?;
        }
        Ok(pending)
    }

    /// Remember that this session created the user `id` and may register its
    /// first authenticator without logging in.
    pub async fn claim_identity(&self, id: &Uuid) -> Result<(), SessionError> {
        self.session.insert(CLAIMED_KEY, id).await
    }

    pub async fn claimed_identity(&self) -> Result<Option<Uuid>, SessionError> {
        self.session.get(CLAIMED_KEY).await
    }

    pub async fn release_claim(&self) -> Result<(), SessionError> {
        self.session.remove_value(CLAIMED_KEY).await?;
        self.session.save().await
    }

    /// Whether this session may add authenticators to `id`: it is logged in
    /// as that user, or created it and has not completed a registration yet.
    pub async fn may_extend(&self, id: &Uuid) -> Result<bool, SessionError> {
        if self.identity().await?.is_some_and(|identity| &identity.id == id) {
            return Ok(true);
        }
        Ok(self.claimed_identity().await?.as_ref() == Some(id))
    }

    pub async fn set_logged_in(&self, identity: &UserIdentity) -> Result<(), SessionError> {
        self.session.insert(IDENTITY_KEY, identity).await?;
        self.session.insert(LOGGED_IN_KEY, true).await?;
        self.session.save().await
    }

    pub async fn is_logged_in(&self) -> Result<bool, SessionError> {
        Ok(self.session.get::<bool>(LOGGED_IN_KEY).await?.unwrap_or(false))
    }

    /// The identity of a logged-in session, `None` otherwise.
    pub async fn identity(&self) -> Result<Option<UserIdentity>, SessionError> {
        if !self.is_logged_in().await? {
            return Ok(None);
        }
        self.session.get(IDENTITY_KEY).await
    }

    /// Drop all session data and the session itself.
    pub async fn destroy(&self) -> Result<(), SessionError> {
        self.session.flush().await
    }
}

/// Per-session mutual exclusion, keyed by the session cookie value.
///
/// Held by [`crate::middleware::session_lock::serialize_session`] around the
/// session layer, so a request's session is loaded and saved back while no
/// other request on the same cookie is running.
///
/// Entries nobody holds are pruned on every acquire, so the map only grows
/// with the number of sessions currently being served.
pub struct SessionLocks {
    cookie_name: String,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            locks: Mutex::default(),
        }
    }

    /// Name of the cookie carrying the session id.
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Wait for exclusive use of the session behind cookie value `key`.
    ///
    /// A request without a session cookie gets a brand new session, which no
    /// other request can share, so no lock is taken.
    pub async fn acquire(&self, key: Option<&str>) -> Option<OwnedMutexGuard<()>> {
        let key = key?;
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key.to_string()).or_default().clone()
        };
        Some(lock.lock_owned().await)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
