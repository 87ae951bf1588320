//! # Passkey Registration
//!
//! 1. **Begin**: create the user, or check that the session may add to an
//!    existing one, then issue a challenge that excludes the authenticators
//!    already registered and park it in the session.
//! 2. **Complete**: consume the parked challenge, let the verifier check the
//!    attestation, persist the new authenticator.

use chrono::Utc;
use serde_json::Value;

use crate::db::models::{AuthenticatorRecord, CredentialId};
use crate::session::{CeremonyKind, ChallengeSession, PendingCeremony};
use crate::webauthn::types::RegistrationOutcome;
use crate::webauthn::{CeremonyError, CeremonyResult, Coordinator};

impl Coordinator {
    /// Issue registration options for `username`.
    ///
    /// An unknown name is created and claimed by `session`. An existing user
    /// can only be extended by a session logged in as that user, or by the
    /// session that created it and has not finished registering yet; anyone
    /// else gets [`CeremonyError::IdentityTaken`] and no challenge.
    ///
    /// Any ceremony already pending on `session` is replaced.
    pub async fn begin_registration(
        &self,
        session: &ChallengeSession,
        username: &str,
        display_name: &str,
    ) -> CeremonyResult<Value> {
        let identity = match self.users.find_by_name(username).await? {
            Some(existing) => {
                if !session.may_extend(&existing.id).await? {
                    tracing::warn!("Registration for existing user '{}' refused", username);
                    return Err(CeremonyError::IdentityTaken);
                }
                existing
            }
            None => {
                let created = self.users.create(username, display_name).await?;
                session.claim_identity(&created.id).await?;
                created
            }
        };

        let exclude: Vec<CredentialId> = self
            .credentials
            .list_by_owner(&identity.id)
            .await?
            .into_iter()
            .map(|record| record.credential_id)
            .collect();

        let issued = self.verifier.registration_options(&identity, &exclude)?;

        session
            .set_pending(&PendingCeremony {
                kind: CeremonyKind::Registration,
                state: issued.state,
                identity,
                issued_at: Utc::now(),
            })
            .await?;

        tracing::debug!(
            "Issued registration challenge for '{}' excluding {} credential(s)",
            username,
            exclude.len()
        );
        Ok(issued.options)
    }

    /// Verify an attestation against the pending registration challenge and
    /// store the new authenticator.
    ///
    /// The challenge is consumed before verification, so a failed attempt
    /// cannot be retried with the same challenge.
    pub async fn complete_registration(
        &self,
        session: &ChallengeSession,
        response: &Value,
    ) -> CeremonyResult<RegistrationOutcome> {
        let pending = self
            .consume_pending(session, CeremonyKind::Registration)
            .await?;

        let verified = self
            .verifier
            .verify_registration(response, &pending.state)
            .inspect_err(|e| {
                tracing::warn!("Registration for '{}' rejected: {}", pending.identity.name, e)
            })?;

        let record = AuthenticatorRecord {
            credential_id: verified.credential_id,
            owner: pending.identity.id,
            public_key: verified.public_key,
            sign_counter: verified.counter.unwrap_or(0),
            transports: verified.transports,
            created_at: Utc::now(),
            last_used_at: None,
        };

        self.credentials.put(record.clone()).await?;
        // Further authenticators need a login
        session.release_claim().await?;

        tracing::info!(
            "Registered credential {} for '{}'",
            record.credential_id,
            pending.identity.name
        );
        Ok(RegistrationOutcome {
            identity: pending.identity,
            record,
        })
    }
}
