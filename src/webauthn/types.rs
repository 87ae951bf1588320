//! # Ceremony API Types
//!
//! Bodies of the ceremony endpoints and what the coordinator hands back.
//!
//! The authenticator responses themselves are taken as raw JSON and passed
//! straight to the verifier, which owns their format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::models::{AuthenticatorRecord, CredentialId, UserIdentity};

/// Body of `POST /registration/options`
///
/// ```json
/// { "username": "alice", "displayName": "Alice Smith" }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrationOptionsRequest {
    pub username: String,

    /// Defaults to the username
    #[serde(default, rename = "displayName", alias = "display_name")]
    pub display_name: Option<String>,
}

/// Body of `POST /authentication/options`
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthenticationOptionsRequest {
    pub username: String,
}

/// Body of both verify endpoints.
///
/// Browser clients either post the credential as-is or wrap it as
/// `{ "attResp": <credential> }`.
#[derive(Debug, Deserialize)]
#[serde(from = "Value")]
pub struct CredentialResponse(pub Value);

impl From<Value> for CredentialResponse {
    fn from(mut value: Value) -> Self {
        match value.get_mut("attResp").map(Value::take) {
            Some(inner) => CredentialResponse(inner),
            None => CredentialResponse(value),
        }
    }
}

/// A completed registration.
#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub identity: UserIdentity,
    pub record: AuthenticatorRecord,
}

/// A completed authentication.
#[derive(Debug, Clone)]
pub struct AuthenticationOutcome {
    pub identity: UserIdentity,
    pub credential_id: CredentialId,

    /// Counter now stored for the credential
    pub counter: u32,
}
