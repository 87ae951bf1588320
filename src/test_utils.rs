//! Shared test fixtures.
//!
//! [`FakeVerifier`] stands in for webauthn-rs: it issues UUID challenges and
//! accepts any response that echoes the issued challenge, reporting whatever
//! counter the response carries. Responses are built with [`attestation`]
//! and [`assertion`].

use base64::prelude::*;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_sessions::{MemoryStore, Session};
use uuid::Uuid;

use crate::db::memory::InMemoryStore;
use crate::db::models::{AuthenticatorRecord, CredentialId, Transport, UserIdentity};
use crate::session::ChallengeSession;
use crate::webauthn::verifier::{
    CeremonyVerifier, IssuedChallenge, VerifiedAssertion, VerifiedCredential, VerifierError,
};
use crate::webauthn::Coordinator;

#[derive(Serialize, Deserialize)]
struct FakeState {
    challenge: String,
    #[serde(default)]
    allowed: Vec<CredentialId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FakeAttestation {
    challenge: String,
    raw_id: CredentialId,
    counter: Option<u32>,
    #[serde(default)]
    response: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FakeAssertion {
    challenge: String,
    raw_id: CredentialId,
    counter: u32,
    valid: bool,
    /// Credential the verifier reports as the signer, `raw_id` when absent
    #[serde(default)]
    signed_by: Option<CredentialId>,
}

pub struct FakeVerifier;

impl FakeVerifier {
    fn issue(allowed: Vec<CredentialId>) -> Result<(String, Vec<u8>), VerifierError> {
        let challenge = BASE64_URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes());
        let state = serde_json::to_vec(&FakeState {
            challenge: challenge.clone(),
            allowed,
        })?;
        Ok((challenge, state))
    }

    fn check_challenge(expected: &str, presented: &str) -> Result<(), VerifierError> {
        if expected != presented {
            return Err(VerifierError::Rejected("challenge mismatch".to_string()));
        }
        Ok(())
    }
}

impl CeremonyVerifier for FakeVerifier {
    fn registration_options(
        &self,
        user: &UserIdentity,
        exclude: &[CredentialId],
    ) -> Result<IssuedChallenge, VerifierError> {
        let (challenge, state) = Self::issue(Vec::new())?;
        Ok(IssuedChallenge {
            options: json!({
                "challenge": challenge,
                "rp": {"id": "localhost", "name": "Test RP"},
                "user": {"id": user.id, "name": user.name, "displayName": user.display_name},
                "excludeCredentials": exclude,
            }),
            state,
        })
    }

    fn verify_registration(
        &self,
        response: &Value,
        state: &[u8],
    ) -> Result<VerifiedCredential, VerifierError> {
        let state: FakeState = serde_json::from_slice(state)?;
        let response: FakeAttestation = serde_json::from_value(response.clone())?;
        Self::check_challenge(&state.challenge, &response.challenge)?;

        Ok(VerifiedCredential {
            public_key: response.raw_id.as_bytes().to_vec(),
            credential_id: response.raw_id,
            counter: response.counter,
            transports: Transport::parse_list(response.response.get("transports")),
        })
    }

    fn authentication_options(
        &self,
        allowed: &[AuthenticatorRecord],
    ) -> Result<IssuedChallenge, VerifierError> {
        let ids: Vec<CredentialId> = allowed.iter().map(|r| r.credential_id.clone()).collect();
        let (challenge, state) = Self::issue(ids)?;
        let allow_credentials: Vec<Value> = allowed
            .iter()
            .map(|r| json!({"type": "public-key", "id": r.credential_id, "transports": r.transports}))
            .collect();

        Ok(IssuedChallenge {
            options: json!({"challenge": challenge, "allowCredentials": allow_credentials}),
            state,
        })
    }

    fn verify_authentication(
        &self,
        response: &Value,
        state: &[u8],
        record: &AuthenticatorRecord,
    ) -> Result<VerifiedAssertion, VerifierError> {
        let state: FakeState = serde_json::from_slice(state)?;
        let response: FakeAssertion = serde_json::from_value(response.clone())?;
        Self::check_challenge(&state.challenge, &response.challenge)?;

        if !state.allowed.contains(&response.raw_id) || response.raw_id != record.credential_id {
            return Err(VerifierError::Rejected("credential not allowed".to_string()));
        }
        if !response.valid {
            return Err(VerifierError::Rejected("bad signature".to_string()));
        }

        Ok(VerifiedAssertion {
            credential_id: response.signed_by.unwrap_or(response.raw_id),
            counter: response.counter,
        })
    }
}

pub fn coordinator_with_ttl(ttl: Duration) -> (Coordinator, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let coordinator = Coordinator::new(store.clone(), store.clone(), Arc::new(FakeVerifier), ttl);
    (coordinator, store)
}

pub fn coordinator() -> (Coordinator, Arc<InMemoryStore>) {
    coordinator_with_ttl(Duration::minutes(5))
}

pub fn fresh_session() -> ChallengeSession {
    ChallengeSession::new(Session::new(None, Arc::new(MemoryStore::default()), None))
}

/// The challenge embedded in options issued by [`FakeVerifier`].
pub fn challenge_of(options: &Value) -> String {
    options["challenge"].as_str().unwrap_or_default().to_string()
}

/// An attestation over `challenge` for a new credential `raw_id`.
pub fn attestation(challenge: &str, raw_id: &[u8], counter: Option<u32>) -> Value {
    json!({
        "challenge": challenge,
        "rawId": BASE64_URL_SAFE_NO_PAD.encode(raw_id),
        "counter": counter,
        "response": {"transports": ["internal", "hybrid"]},
    })
}

/// A correctly signed assertion over `challenge` by `raw_id`.
pub fn assertion(challenge: &str, raw_id: &[u8], counter: u32) -> Value {
    json!({
        "challenge": challenge,
        "rawId": BASE64_URL_SAFE_NO_PAD.encode(raw_id),
        "counter": counter,
        "valid": true,
    })
}
