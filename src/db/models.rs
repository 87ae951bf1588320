//! # Data Models
//!
//! The records the ceremony coordinator reads and writes. They are storage
//! agnostic: the in-memory backend keeps them as-is, the SQLite backend maps
//! them to rows.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// A user known to the relying party.
///
/// The `id` is assigned once, on the first registration attempt, and is the
/// user handle every one of this user's credentials is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: Uuid,

    /// Unique login name
    pub name: String,

    pub display_name: String,
}

impl UserIdentity {
    pub fn new(name: String, display_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            display_name,
        }
    }
}

/// Raw credential id as chosen by the authenticator.
///
/// Serialized as unpadded base64url, the encoding browsers use for `rawId`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CredentialId(Vec<u8>);

impl CredentialId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decode from base64url, tolerating trailing padding.
    pub fn from_base64url(encoded: &str) -> Result<Self, base64::DecodeError> {
        BASE64_URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map(Self)
    }

    pub fn to_base64url(&self) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(&self.0)
    }
}

impl From<Vec<u8>> for CredentialId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for CredentialId {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64url())
    }
}

impl fmt::Debug for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialId({self})")
    }
}

impl Serialize for CredentialId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64url())
    }
}

impl<'de> Deserialize<'de> for CredentialId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64url(&encoded).map_err(serde::de::Error::custom)
    }
}

/// How the client can reach an authenticator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Internal,
    Usb,
    Nfc,
    Ble,
    Hybrid,
}

impl Transport {
    /// Collect the transports from a JSON array of strings, skipping values
    /// we don't recognize and duplicates.
    pub fn parse_list(value: Option<&Value>) -> Vec<Transport> {
        let mut transports = Vec::new();
        let Some(items) = value.and_then(Value::as_array) else {
            return transports;
        };
        for item in items {
            if let Ok(transport) = serde_json::from_value::<Transport>(item.clone()) {
                if !transports.contains(&transport) {
                    transports.push(transport);
                }
            }
        }
        transports
    }
}

/// A registered authenticator.
///
/// `credential_id` is unique across the whole store. `sign_counter` only ever
/// moves forward; the store enforces this in `advance_counter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorRecord {
    pub credential_id: CredentialId,

    /// Id of the owning [`UserIdentity`]
    pub owner: Uuid,

    /// Opaque key material handed back to the verifier on authentication.
    /// With the webauthn-rs verifier this is the serialized `Passkey`,
    /// which embeds the COSE public key.
    #[serde(skip_serializing, default)]
    pub public_key: Vec<u8>,

    pub sign_counter: u32,

    pub transports: Vec<Transport>,

    pub created_at: DateTime<Utc>,

    pub last_used_at: Option<DateTime<Utc>>,
}
