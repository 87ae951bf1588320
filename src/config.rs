//! # Configuration Management
//!
//! Configuration comes from the environment (an optional `.env` file is
//! loaded first) and is read once at start-up.
//!
//! ## Environment Variables
//! - `HOST` / `PORT`: bind address (default: 127.0.0.1:3000)
//! - `RP_ID`: WebAuthn Relying Party ID, a bare hostname
//! - `RP_ORIGIN`: expected origin of browser requests (full URL)
//! - `RP_NAME`: human-readable service name shown by authenticators
//! - `STORE_BACKEND`: `memory` or `sqlite`
//! - `DATABASE_URL`: SQLite connection string (sqlite backend only)
//! - `SESSION_COOKIE_NAME`, `SESSION_MAX_AGE_SECS`, `COOKIE_SECURE`: session cookie
//! - `CHALLENGE_TTL_SECS`: how long an issued challenge can be answered
//! - `CORS_ORIGIN`: allowed browser origin (default: `RP_ORIGIN`)
//! - `BRIDGE_SERVICE_ACCOUNT`: service account JSON enabling sign-in tokens

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use webauthn_rs::prelude::Url;

/// Where users and credentials live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local maps; everything is lost on restart
    Memory,
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "sqlite" => Ok(StoreBackend::Sqlite),
            other => Err(anyhow!("unknown STORE_BACKEND '{}', expected 'memory' or 'sqlite'", other)),
        }
    }
}

/// Application configuration
///
/// ## WebAuthn Terminology
/// - **RP (Relying Party)**: this service
/// - **RP ID**: its domain name (e.g. "example.com" or "localhost")
/// - **RP Origin**: the URL pages calling the API are served from
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub rp_id: String,
    pub rp_origin: Url,
    pub rp_name: String,

    pub store_backend: StoreBackend,

    /// Format: "sqlite:filename.db?mode=rwc" (read, write, create)
    pub database_url: String,

    pub session_cookie_name: String,

    /// Sessions expire after this long without activity
    pub session_max_age: time::Duration,

    pub cookie_secure: bool,

    pub challenge_ttl: chrono::Duration,

    pub cors_origin: String,

    /// Path to the identity provider service account; no tokens are minted without it
    pub bridge_service_account: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// ## Example .env file
    /// ```text
    /// PORT=3000
    /// RP_ID=localhost
    /// RP_ORIGIN=http://localhost:9200
    /// STORE_BACKEND=sqlite
    /// DATABASE_URL=sqlite:passkey.db?mode=rwc
    /// ```
    pub fn from_env() -> Result<Self> {
        // dotenvy doesn't error if the file is missing
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let rp_origin_raw = var("RP_ORIGIN", "http://localhost:9200");
        let rp_origin = Url::parse(&rp_origin_raw)
            .with_context(|| format!("RP_ORIGIN '{}' is not a valid URL", rp_origin_raw))?;

        // Browsers send the origin without a trailing slash
        let cors_origin = lookup("CORS_ORIGIN")
            .unwrap_or_else(|| rp_origin.origin().ascii_serialization());

        Ok(Config {
            host: var("HOST", "127.0.0.1"),
            port: parse_var(&lookup, "PORT", 3000)?,
            rp_id: var("RP_ID", "localhost"),
            rp_origin,
            rp_name: var("RP_NAME", "Passkey Bridge"),
            store_backend: var("STORE_BACKEND", "memory").parse()?,
            database_url: var("DATABASE_URL", "sqlite:passkey.db?mode=rwc"),
            session_cookie_name: var("SESSION_COOKIE_NAME", "passkey.sid"),
            session_max_age: time::Duration::seconds(parse_var(&lookup, "SESSION_MAX_AGE_SECS", 3600)?),
            cookie_secure: parse_var(&lookup, "COOKIE_SECURE", false)?,
            challenge_ttl: chrono::Duration::seconds(parse_var(&lookup, "CHALLENGE_TTL_SECS", 300)?),
            cors_origin,
            bridge_service_account: lookup("BRIDGE_SERVICE_ACCOUNT")
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    /// Get the socket address to bind the server to, e.g. "127.0.0.1:3000"
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}
