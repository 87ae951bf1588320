//! # WebAuthn Ceremony Coordinator
//!
//! Sequences the two WebAuthn ceremonies over the verifier and the stores.
//!
//! ## Submodules
//! - `types`: request/response bodies of the ceremony endpoints
//! - `verifier`: the cryptographic seam and its webauthn-rs implementation
//! - `registration`: `begin_registration` / `complete_registration`
//! - `authentication`: `begin_authentication` / `complete_authentication`
//!
//! ## Per-session state machine
//!
//! ```text
//!   Idle --options--> ChallengeIssued(kind) --verify (ok or error)--> Idle
//!                          |    ^
//!                          +----+ options again: overwrite
//! ```
//!
//! Every verify call consumes the pending challenge, whatever its outcome.
//! A successful authentication also marks the session logged in.

pub mod authentication;
pub mod registration;
pub mod types;
pub mod verifier;

use chrono::{Duration, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::db::{CredentialStore, StoreError, UserStore};
use crate::session::{CeremonyKind, ChallengeSession, PendingCeremony};
use crate::webauthn::verifier::{CeremonyVerifier, VerifierError};

#[derive(Error, Debug)]
pub enum CeremonyError {
    #[error("No ceremony is pending for this session")]
    NoPendingChallenge,

    #[error("The pending challenge has expired")]
    ChallengeExpired,

    #[error("Credential is not registered")]
    NoSuchCredential,

    #[error("No authenticators are registered for this user")]
    NoAuthenticatorsRegistered,

    /// The authenticator's counter did not move past the stored one: a cloned
    /// authenticator or a replayed assertion.
    #[error("Signature counter {presented} does not exceed stored counter {stored}")]
    CounterReplay { stored: u32, presented: u32 },

    #[error("Verification failed: {0}")]
    VerificationFailure(#[from] VerifierError),

    #[error("Credential is already registered")]
    DuplicateCredential,

    /// The user name belongs to someone this session is not logged in as.
    #[error("User name is already taken")]
    IdentityTaken,

    #[error(transparent)]
    Store(StoreError),

    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),
}

impl From<StoreError> for CeremonyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(_) => CeremonyError::DuplicateCredential,
            StoreError::NameTaken(_) => CeremonyError::IdentityTaken,
            other => CeremonyError::Store(other),
        }
    }
}

pub type CeremonyResult<T> = Result<T, CeremonyError>;

/// Storage-agnostic ceremony orchestration.
pub struct Coordinator {
    users: Arc<dyn UserStore>,
    credentials: Arc<dyn CredentialStore>,
    verifier: Arc<dyn CeremonyVerifier>,
    challenge_ttl: Duration,
}

impl Coordinator {
    pub fn new(
        users: Arc<dyn UserStore>,
        credentials: Arc<dyn CredentialStore>,
        verifier: Arc<dyn CeremonyVerifier>,
        challenge_ttl: Duration,
    ) -> Self {
        Self {
            users,
            credentials,
            verifier,
            challenge_ttl,
        }
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Consume the pending ceremony of `kind`.
    ///
    /// The pending entry is removed whatever happens next: a wrong kind or an
    /// expired challenge still burns it.
    async fn consume_pending(
        &self,
        session: &ChallengeSession,
        kind: CeremonyKind,
    ) -> CeremonyResult<PendingCeremony> {
        let pending = session
            .take_pending()
            .await?
            .ok_or(CeremonyError::NoPendingChallenge)?;

        if pending.kind != kind {
            tracing::warn!(
                "Expected a pending {:?} ceremony, found {:?}",
                kind,
                pending.kind
            );
            return Err(CeremonyError::NoPendingChallenge);
        }

        if Utc::now() - pending.issued_at > self.challenge_ttl {
            tracing::warn!(
                "Challenge for '{}' issued at {} has expired",
                pending.identity.name,
                pending.issued_at
            );
            return Err(CeremonyError::ChallengeExpired);
        }

        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::CredentialId;
    use crate::db::models::UserIdentity;
    use crate::test_utils::{coordinator_with_ttl, fresh_session};

    fn pending(kind: CeremonyKind, age: Duration) -> PendingCeremony {
        PendingCeremony {
            kind,
            state: Vec::new(),
            identity: UserIdentity::new("alice".into(), "Alice".into()),
            issued_at: Utc::now() - age,
        }
    }

    #[tokio::test]
    async fn test_consume_without_pending() {
        let (coordinator, _) = coordinator_with_ttl(Duration::minutes(5));
        let session = fresh_session();

        let err = coordinator
            .consume_pending(&session, CeremonyKind::Registration)
            .await
            .unwrap_err();

        assert!(matches!(err, CeremonyError::NoPendingChallenge));
    }

    #[tokio::test]
    async fn test_consume_wrong_kind_burns_challenge() {
        // Given a pending authentication
        let (coordinator, _) = coordinator_with_ttl(Duration::minutes(5));
        let session = fresh_session();
        session
            .set_pending(&pending(CeremonyKind::Authentication, Duration::zero()))
            .await
            .unwrap();

        // When a registration tries to consume it
        let err = coordinator
            .consume_pending(&session, CeremonyKind::Registration)
            .await
            .unwrap_err();

        // Then it is refused and gone
        assert!(matches!(err, CeremonyError::NoPendingChallenge));
        assert!(session.get_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_consume_expired_challenge() {
        let (coordinator, _) = coordinator_with_ttl(Duration::minutes(5));
        let session = fresh_session();
        session
            .set_pending(&pending(CeremonyKind::Registration, Duration::minutes(6)))
            .await
            .unwrap();

        let err = coordinator
            .consume_pending(&session, CeremonyKind::Registration)
            .await
            .unwrap_err();

        assert!(matches!(err, CeremonyError::ChallengeExpired));
        assert!(session.get_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_consume_fresh_challenge() {
        let (coordinator, _) = coordinator_with_ttl(Duration::minutes(5));
        let session = fresh_session();
        session
            .set_pending(&pending(CeremonyKind::Registration, Duration::minutes(4)))
            .await
            .unwrap();

        let taken = coordinator
            .consume_pending(&session, CeremonyKind::Registration)
            .await
            .unwrap();

        assert_eq!(taken.identity.name, "alice");
    }

    #[test]
    fn test_duplicate_store_error_maps_to_ceremony_error() {
        let err = CeremonyError::from(StoreError::Duplicate(CredentialId::from(vec![1])));
        assert!(matches!(err, CeremonyError::DuplicateCredential));

        let err = CeremonyError::from(StoreError::NameTaken("alice".into()));
        assert!(matches!(err, CeremonyError::IdentityTaken));

        let err = CeremonyError::from(StoreError::Corrupt("x".into()));
        assert!(matches!(err, CeremonyError::Store(_)));
    }
}
