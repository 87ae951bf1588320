//! # Identity Bridge
//!
//! Exchanges a locally verified identity for a custom sign-in token that an
//! external identity provider accepts (Firebase-style custom tokens): a JWT
//! signed with a service account key, carrying the user id as `uid`.
//!
//! The client hands the token to the provider's SDK to obtain a provider
//! session for the same user id.

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Audience every custom token is minted for
pub const CUSTOM_TOKEN_AUDIENCE: &str =
    "https://identitytoolkit.googleapis.com/google.identity.identitytoolkit.v1.IdentityToolkit";

/// Longest lifetime the provider accepts for a custom token
const TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Cannot read service account: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid service account: {0}")]
    ServiceAccount(#[from] serde_json::Error),

    #[error("Token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// The fields of a service account JSON file the bridge needs.
#[derive(Debug, Deserialize)]
struct ServiceAccount {
    client_email: String,
    private_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CustomTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub uid: String,
}

pub struct IdentityBridge {
    issuer: String,
    key: EncodingKey,
    algorithm: Algorithm,
}

impl std::fmt::Debug for IdentityBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityBridge")
            .field("issuer", &self.issuer)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl IdentityBridge {
    pub fn new(issuer: String, key: EncodingKey, algorithm: Algorithm) -> Self {
        Self {
            issuer,
            key,
            algorithm,
        }
    }

    /// Build a bridge from a service account JSON file (RS256).
    pub fn from_service_account_file(path: &Path) -> Result<Self, BridgeError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_service_account_json(&raw)
    }

    pub fn from_service_account_json(raw: &str) -> Result<Self, BridgeError> {
        let account: ServiceAccount = serde_json::from_str(raw)?;
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())?;
        Ok(Self::new(account.client_email, key, Algorithm::RS256))
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Mint a custom token for `uid`.
    pub fn mint_token(&self, uid: &str) -> Result<String, BridgeError> {
        let now = Utc::now().timestamp();
        let claims = CustomTokenClaims {
            iss: self.issuer.clone(),
            sub: self.issuer.clone(),
            aud: CUSTOM_TOKEN_AUDIENCE.to_string(),
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
            uid: uid.to_string(),
        };

        let token = jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.key)?;
        tracing::debug!("Minted custom token for uid {}", uid);
        Ok(token)
    }
}
