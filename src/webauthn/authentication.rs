//! # Passkey Authentication
//!
//! 1. **Begin**: look up the user's authenticators, issue a challenge limited
//!    to them, park it in the session.
//! 2. **Complete**: consume the parked challenge, find the presented
//!    credential, let the verifier check the assertion, then enforce the
//!    signature counter and log the session in.
//!
//! The counter check is done here regardless of what the verifier decided:
//! a counter that does not move forward fails the ceremony.

use chrono::Utc;
use serde_json::Value;

use crate::db::models::CredentialId;
use crate::session::{CeremonyKind, ChallengeSession, PendingCeremony};
use crate::webauthn::types::AuthenticationOutcome;
use crate::webauthn::verifier::VerifierError;
use crate::webauthn::{CeremonyError, CeremonyResult, Coordinator};

/// Credential id the browser says signed the assertion (`rawId`, else `id`).
fn presented_credential_id(response: &Value) -> CeremonyResult<CredentialId> {
    let encoded = response
        .get("rawId")
        .or_else(|| response.get("id"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            VerifierError::Rejected("assertion carries no credential id".to_string())
        })?;

    CredentialId::from_base64url(encoded).map_err(|e| {
        CeremonyError::VerificationFailure(VerifierError::Rejected(format!(
            "credential id is not base64url: {e}"
        )))
    })
}

impl Coordinator {
    /// Issue authentication options for `username`.
    ///
    /// Fails with `NoAuthenticatorsRegistered`, leaving the session untouched,
    /// when the user is unknown or has nothing registered.
    pub async fn begin_authentication(
        &self,
        session: &ChallengeSession,
        username: &str,
    ) -> CeremonyResult<Value> {
        let identity = self
            .users
            .find_by_name(username)
            .await?
            .ok_or(CeremonyError::NoAuthenticatorsRegistered)?;

        let allowed = self.credentials.list_by_owner(&identity.id).await?;
        if allowed.is_empty() {
            return Err(CeremonyError::NoAuthenticatorsRegistered);
        }

        let issued = self.verifier.authentication_options(&allowed)?;

        session
            .set_pending(&PendingCeremony {
                kind: CeremonyKind::Authentication,
                state: issued.state,
                identity,
                issued_at: Utc::now(),
            })
            .await?;

        tracing::debug!(
            "Issued authentication challenge for '{}' allowing {} credential(s)",
            username,
            allowed.len()
        );
        Ok(issued.options)
    }

    /// Verify an assertion against the pending authentication challenge.
    pub async fn complete_authentication(
        &self,
        session: &ChallengeSession,
        response: &Value,
    ) -> CeremonyResult<AuthenticationOutcome> {
        let pending = self
            .consume_pending(session, CeremonyKind::Authentication)
            .await?;

        let credential_id = presented_credential_id(response)?;
        let record = self
            .credentials
            .get(&credential_id)
            .await?
            .filter(|record| record.owner == pending.identity.id)
            .ok_or_else(|| {
                tracing::warn!(
                    "Credential {} is not registered to '{}'",
                    credential_id,
                    pending.identity.name
                );
                CeremonyError::NoSuchCredential
            })?;

        let verified = self
            .verifier
            .verify_authentication(response, &pending.state, &record)
            .inspect_err(|e| {
                tracing::warn!("Assertion for '{}' rejected: {}", pending.identity.name, e)
            })?;
        if verified.credential_id != credential_id {
            tracing::warn!(
                "Assertion presented as {} was signed by {}",
                credential_id,
                verified.credential_id
            );
            let mismatch = VerifierError::Rejected("signed by another credential".to_string());
            return Err(mismatch.into());
        }

        let replay = CeremonyError::CounterReplay {
            stored: record.sign_counter,
            presented: verified.counter,
        };
        if verified.counter <= record.sign_counter {
            tracing::warn!("Credential {}: {}", credential_id, replay);
            return Err(replay);
        }
        // Another session may have used the same authenticator since we read the record
        if !self
            .credentials
            .advance_counter(&credential_id, verified.counter)
            .await?
        {
            tracing::warn!("Credential {}: lost counter race, {}", credential_id, replay);
            return Err(replay);
        }

        session.set_logged_in(&pending.identity).await?;

        tracing::info!(
            "Authenticated '{}' with credential {}",
            pending.identity.name,
            credential_id
        );
        Ok(AuthenticationOutcome {
            identity: pending.identity,
            credential_id,
            counter: verified.counter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UserStore;
    use crate::test_utils::{assertion, attestation, challenge_of, coordinator, fresh_session};
    use serde_json::json;

    /// Register `cred` for `username` with the given initial counter, returning
    /// the session it was registered from.
    async fn register(
        coordinator: &Coordinator,
        username: &str,
        cred: &[u8],
        counter: u32,
    ) -> ChallengeSession {
        let session = fresh_session();
        let options = coordinator
            .begin_registration(&session, username, username)
            .await
            .unwrap();
        coordinator
            .complete_registration(&session, &attestation(&challenge_of(&options), cred, Some(counter)))
            .await
            .unwrap();
        session
    }

    #[test]
    fn test_presented_credential_id() {
        assert_eq!(
            presented_credential_id(&json!({"rawId": "AQID", "id": "ignored"})).unwrap(),
            CredentialId::from(vec![1, 2, 3])
        );
        assert_eq!(
            presented_credential_id(&json!({"id": "AQID"})).unwrap(),
            CredentialId::from(vec![1, 2, 3])
        );
        assert!(matches!(
            presented_credential_id(&json!({})),
            Err(CeremonyError::VerificationFailure(_))
        ));
        assert!(matches!(
            presented_credential_id(&json!({"rawId": "%%%"})),
            Err(CeremonyError::VerificationFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_no_authenticators_issues_nothing() {
        // Given alice exists but never finished registering
        let (coordinator, _) = coordinator();
        let session = fresh_session();
        coordinator
            .begin_registration(&session, "alice", "Alice")
            .await
            .unwrap();
        let login = fresh_session();

        // When she asks to authenticate
        let err = coordinator
            .begin_authentication(&login, "alice")
            .await
            .unwrap_err();

        // Then it fails and no challenge is parked
        assert!(matches!(err, CeremonyError::NoAuthenticatorsRegistered));
        assert!(login.get_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_created() {
        let (coordinator, store) = coordinator();
        let session = fresh_session();

        let err = coordinator
            .begin_authentication(&session, "mallory")
            .await
            .unwrap_err();

        assert!(matches!(err, CeremonyError::NoAuthenticatorsRegistered));
        assert!(store.find_by_name("mallory").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_allow_list_lists_user_credentials() {
        let (coordinator, _) = coordinator();
        register(&coordinator, "alice", b"key-1", 0).await;
        register(&coordinator, "bob", b"key-9", 0).await;
        let session = fresh_session();

        let options = coordinator.begin_authentication(&session, "alice").await.unwrap();

        let allowed = options["allowCredentials"].as_array().unwrap();
        assert_eq!(allowed.len(), 1);
        assert_eq!(allowed[0]["id"], "a2V5LTE");
    }

    #[tokio::test]
    async fn test_login_raises_counter_and_replay_fails() {
        // Given alice's authenticator stored at counter 5
        let (coordinator, _) = coordinator();
        register(&coordinator, "alice", b"key-1", 5).await;
        let session = fresh_session();
        let options = coordinator.begin_authentication(&session, "alice").await.unwrap();

        // When she signs with counter 6
        let response = assertion(&challenge_of(&options), b"key-1", 6);
        let outcome = coordinator
            .complete_authentication(&session, &response)
            .await
            .unwrap();

        // Then the session is logged in and the stored counter moved to 6
        assert!(session.is_logged_in().await.unwrap());
        assert_eq!(outcome.counter, 6);
        assert_eq!(outcome.identity.name, "alice");
        let id = CredentialId::from(&b"key-1"[..]);
        let stored = coordinator.credentials().get(&id).await.unwrap().unwrap();
        assert_eq!(stored.sign_counter, 6);

        // And replaying the identical assertion under a fresh challenge fails
        let replay_session = fresh_session();
        let options = coordinator
            .begin_authentication(&replay_session, "alice")
            .await
            .unwrap();
        let replayed = assertion(&challenge_of(&options), b"key-1", 6);
        let err = coordinator
            .complete_authentication(&replay_session, &replayed)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CeremonyError::CounterReplay { stored: 6, presented: 6 }
        ));
        assert!(!replay_session.is_logged_in().await.unwrap());
    }

    #[tokio::test]
    async fn test_lower_counter_fails_even_with_valid_signature() {
        let (coordinator, _) = coordinator();
        register(&coordinator, "alice", b"key-1", 10).await;
        let session = fresh_session();
        let options = coordinator.begin_authentication(&session, "alice").await.unwrap();

        let err = coordinator
            .complete_authentication(&session, &assertion(&challenge_of(&options), b"key-1", 3))
            .await
            .unwrap_err();

        assert!(matches!(err, CeremonyError::CounterReplay { stored: 10, presented: 3 }));
        let id = CredentialId::from(&b"key-1"[..]);
        let stored = coordinator.credentials().get(&id).await.unwrap().unwrap();
        assert_eq!(stored.sign_counter, 10);
    }

    #[tokio::test]
    async fn test_zero_counter_is_not_an_increase() {
        let (coordinator, _) = coordinator();
        register(&coordinator, "alice", b"key-1", 0).await;
        let session = fresh_session();
        let options = coordinator.begin_authentication(&session, "alice").await.unwrap();

        // An authenticator that never counts fails its very first sign-in
        let err = coordinator
            .complete_authentication(&session, &assertion(&challenge_of(&options), b"key-1", 0))
            .await
            .unwrap_err();

        assert!(matches!(err, CeremonyError::CounterReplay { .. }));
    }

    #[tokio::test]
    async fn test_second_completion_fails() {
        let (coordinator, _) = coordinator();
        register(&coordinator, "alice", b"key-1", 0).await;
        let session = fresh_session();
        let options = coordinator.begin_authentication(&session, "alice").await.unwrap();
        let response = assertion(&challenge_of(&options), b"key-1", 1);

        coordinator
            .complete_authentication(&session, &response)
            .await
            .unwrap();
        let err = coordinator
            .complete_authentication(&session, &response)
            .await
            .unwrap_err();

        assert!(matches!(err, CeremonyError::NoPendingChallenge));
    }

    #[tokio::test]
    async fn test_unknown_credential() {
        let (coordinator, _) = coordinator();
        register(&coordinator, "alice", b"key-1", 0).await;
        let session = fresh_session();
        let options = coordinator.begin_authentication(&session, "alice").await.unwrap();

        let err = coordinator
            .complete_authentication(&session, &assertion(&challenge_of(&options), b"other", 1))
            .await
            .unwrap_err();

        assert!(matches!(err, CeremonyError::NoSuchCredential));
        assert!(session.get_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_credential_of_another_user() {
        // Given bob's key presented in a ceremony issued for alice
        let (coordinator, _) = coordinator();
        register(&coordinator, "alice", b"key-1", 0).await;
        register(&coordinator, "bob", b"key-9", 0).await;
        let session = fresh_session();
        let options = coordinator.begin_authentication(&session, "alice").await.unwrap();

        let err = coordinator
            .complete_authentication(&session, &assertion(&challenge_of(&options), b"key-9", 1))
            .await
            .unwrap_err();

        assert!(matches!(err, CeremonyError::NoSuchCredential));
    }

    #[tokio::test]
    async fn test_bad_signature() {
        let (coordinator, _) = coordinator();
        register(&coordinator, "alice", b"key-1", 0).await;
        let session = fresh_session();
        let options = coordinator.begin_authentication(&session, "alice").await.unwrap();

        let mut response = assertion(&challenge_of(&options), b"key-1", 1);
        response["valid"] = json!(false);
        let err = coordinator
            .complete_authentication(&session, &response)
            .await
            .unwrap_err();

        assert!(matches!(err, CeremonyError::VerificationFailure(_)));
        assert!(!session.is_logged_in().await.unwrap());
    }

    #[tokio::test]
    async fn test_two_authenticators_each_authenticate() {
        // Given alice registered a laptop, logged in with it and added a phone
        let (coordinator, _) = coordinator();
        let session = register(&coordinator, "alice", b"laptop", 0).await;
        let options = coordinator.begin_authentication(&session, "alice").await.unwrap();
        coordinator
            .complete_authentication(&session, &assertion(&challenge_of(&options), b"laptop", 1))
            .await
            .unwrap();
        let options = coordinator
            .begin_registration(&session, "alice", "alice")
            .await
            .unwrap();
        coordinator
            .complete_registration(&session, &attestation(&challenge_of(&options), b"phone", Some(0)))
            .await
            .unwrap();

        // Then each one authenticates a new browser
        for cred in [&b"laptop"[..], &b"phone"[..]] {
            let session = fresh_session();
            let options = coordinator.begin_authentication(&session, "alice").await.unwrap();
            assert_eq!(options["allowCredentials"].as_array().unwrap().len(), 2);

            coordinator
                .complete_authentication(&session, &assertion(&challenge_of(&options), cred, 2))
                .await
                .unwrap();
            assert!(session.is_logged_in().await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_registration_challenge_cannot_complete_authentication() {
        let (coordinator, _) = coordinator();
        register(&coordinator, "alice", b"key-1", 0).await;
        let session = fresh_session();
        let options = coordinator
            .begin_registration(&session, "bob", "Bob")
            .await
            .unwrap();

        let err = coordinator
            .complete_authentication(&session, &assertion(&challenge_of(&options), b"key-1", 1))
            .await
            .unwrap_err();

        assert!(matches!(err, CeremonyError::NoPendingChallenge));
    }

    #[tokio::test]
    async fn test_assertion_signed_by_other_credential_is_rejected() {
        // Given alice's registered key
        let (coordinator, _) = coordinator();
        register(&coordinator, "alice", b"key-1", 0).await;
        let session = fresh_session();
        let options = coordinator.begin_authentication(&session, "alice").await.unwrap();

        // When the verifier reports a different signing credential than the one presented
        let mut response = assertion(&challenge_of(&options), b"key-1", 1);
        response["signedBy"] = json!(CredentialId::from(&b"key-2"[..]));
        let err = coordinator
            .complete_authentication(&session, &response)
            .await
            .unwrap_err();

        // Then nothing is logged in and the counter did not move
        assert!(matches!(err, CeremonyError::VerificationFailure(_)));
        assert!(!session.is_logged_in().await.unwrap());
        let id = CredentialId::from(&b"key-1"[..]);
        let stored = coordinator.credentials().get(&id).await.unwrap().unwrap();
        assert_eq!(stored.sign_counter, 0);
    }
}
