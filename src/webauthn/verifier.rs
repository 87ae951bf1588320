//! # Verifier Seam
//!
//! Everything cryptographic (challenge generation, attestation and assertion
//! signature checks, origin and RP id binding) happens behind
//! [`CeremonyVerifier`]. The coordinator only sequences calls to it.
//!
//! [`WebauthnVerifier`] is the production implementation on top of
//! webauthn-rs. Ceremony state is serialized so it can travel in the session,
//! which is why the crate is built with `danger-allow-state-serialisation`.

use serde_json::Value;
use thiserror::Error;
use webauthn_rs::prelude::*;

use crate::db::models::{AuthenticatorRecord, CredentialId, Transport, UserIdentity};

#[derive(Error, Debug)]
pub enum VerifierError {
    /// The verifier looked at the response and said no: bad signature,
    /// origin or RP id mismatch, challenge mismatch, untrusted attestation.
    #[error("{0}")]
    Rejected(String),

    #[error("Malformed response or state: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Options to hand to the browser plus the state needed to check the answer.
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub options: Value,
    pub state: Vec<u8>,
}

/// Result of a successful attestation check.
#[derive(Debug, Clone)]
pub struct VerifiedCredential {
    pub credential_id: CredentialId,
    pub public_key: Vec<u8>,

    /// Counter reported at registration, if the verifier exposes one
    pub counter: Option<u32>,

    pub transports: Vec<Transport>,
}

/// Result of a successful assertion check.
#[derive(Debug, Clone)]
pub struct VerifiedAssertion {
    pub credential_id: CredentialId,
    pub counter: u32,
}

pub trait CeremonyVerifier: Send + Sync {
    fn registration_options(
        &self,
        user: &UserIdentity,
        exclude: &[CredentialId],
    ) -> Result<IssuedChallenge, VerifierError>;

    fn verify_registration(
        &self,
        response: &Value,
        state: &[u8],
    ) -> Result<VerifiedCredential, VerifierError>;

    fn authentication_options(
        &self,
        allowed: &[AuthenticatorRecord],
    ) -> Result<IssuedChallenge, VerifierError>;

    fn verify_authentication(
        &self,
        response: &Value,
        state: &[u8],
        record: &AuthenticatorRecord,
    ) -> Result<VerifiedAssertion, VerifierError>;
}

pub struct WebauthnVerifier {
    webauthn: Webauthn,
}

impl WebauthnVerifier {
    pub fn new(rp_id: &str, rp_origin: &Url, rp_name: &str) -> Result<Self, WebauthnError> {
        let webauthn = WebauthnBuilder::new(rp_id, rp_origin)?
            .rp_name(rp_name)
            .build()?;
        Ok(Self { webauthn })
    }
}

fn rejected(e: WebauthnError) -> VerifierError {
    VerifierError::Rejected(e.to_string())
}

impl CeremonyVerifier for WebauthnVerifier {
    fn registration_options(
        &self,
        user: &UserIdentity,
        exclude: &[CredentialId],
    ) -> Result<IssuedChallenge, VerifierError> {
        let exclude_credentials = (!exclude.is_empty()).then(|| {
            exclude
                .iter()
                .map(|id| CredentialID::from(id.as_bytes().to_vec()))
                .collect()
        });

        let (ccr, reg_state) = self
            .webauthn
            .start_passkey_registration(user.id, &user.name, &user.display_name, exclude_credentials)
            .map_err(rejected)?;

        Ok(IssuedChallenge {
            options: serde_json::to_value(&ccr)?,
            state: serde_json::to_vec(&reg_state)?,
        })
    }

    fn verify_registration(
        &self,
        response: &Value,
        state: &[u8],
    ) -> Result<VerifiedCredential, VerifierError> {
        let reg_state: PasskeyRegistration = serde_json::from_slice(state)?;
        let reg_credential: RegisterPublicKeyCredential = serde_json::from_value(response.clone())?;

        let passkey = self
            .webauthn
            .finish_passkey_registration(&reg_credential, &reg_state)
            .map_err(rejected)?;

        // Passkey keeps its counter private; it is visible in the serialized form
        let serialized = serde_json::to_value(&passkey)?;
        let counter = serialized
            .pointer("/cred/counter")
            .and_then(Value::as_u64)
            .and_then(|c| u32::try_from(c).ok());

        Ok(VerifiedCredential {
            credential_id: CredentialId::from(passkey.cred_id().to_vec()),
            public_key: serde_json::to_vec(&serialized)?,
            counter,
            transports: Transport::parse_list(response.pointer("/response/transports")),
        })
    }

    fn authentication_options(
        &self,
        allowed: &[AuthenticatorRecord],
    ) -> Result<IssuedChallenge, VerifierError> {
        let passkeys = allowed
            .iter()
            .map(|record| serde_json::from_slice::<Passkey>(&record.public_key))
            .collect::<Result<Vec<_>, _>>()?;

        let (rcr, auth_state) = self
            .webauthn
            .start_passkey_authentication(&passkeys)
            .map_err(rejected)?;

        let mut options = serde_json::to_value(&rcr)?;
        attach_transports(&mut options, allowed);

        Ok(IssuedChallenge {
            options,
            state: serde_json::to_vec(&auth_state)?,
        })
    }

    fn verify_authentication(
        &self,
        response: &Value,
        state: &[u8],
        record: &AuthenticatorRecord,
    ) -> Result<VerifiedAssertion, VerifierError> {
        let auth_state: PasskeyAuthentication = serde_json::from_slice(state)?;
        let credential: PublicKeyCredential = serde_json::from_value(response.clone())?;

        let result = self
            .webauthn
            .finish_passkey_authentication(&credential, &auth_state)
            .map_err(rejected)?;

        let credential_id = CredentialId::from(result.cred_id().to_vec());
        if credential_id != record.credential_id {
            return Err(VerifierError::Rejected(format!(
                "assertion signed by {credential_id}, expected {}",
                record.credential_id
            )));
        }

        Ok(VerifiedAssertion {
            credential_id,
            counter: result.counter(),
        })
    }
}

/// Fill in `transports` on allow-list entries from what was recorded at
/// registration, so the browser can pick the right channel.
fn attach_transports(options: &mut Value, allowed: &[AuthenticatorRecord]) {
    let Some(entries) = options
        .pointer_mut("/publicKey/allowCredentials")
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    for entry in entries {
        let Some(id) = entry
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| CredentialId::from_base64url(id).ok())
        else {
            continue;
        };
        let Some(record) = allowed.iter().find(|r| r.credential_id == id) else {
            continue;
        };
        if !record.transports.is_empty() {
            entry["transports"] = serde_json::json!(record.transports);
        }
    }
}
