//! # Database Module
//!
//! Storage contracts the ceremony coordinator depends on, and the two
//! backends that implement them:
//! - `models`: identities and authenticator records
//! - `memory`: process-local maps, lost on restart
//! - `sqlite`: SQLx-backed tables, created by the embedded migrations
//!
//! The coordinator only sees `Arc<dyn UserStore>` and `Arc<dyn CredentialStore>`,
//! so either backend (or a test fake) can be injected.

pub mod memory;
pub mod models;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::db::models::{AuthenticatorRecord, CredentialId, UserIdentity};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Credential '{0}' is already registered")]
    Duplicate(CredentialId),

    #[error("User name '{0}' is already taken")]
    NameTaken(String),

    /// A stored row could not be mapped back into a model
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Directory of known users.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Register `name` under a fresh id.
    ///
    /// Fails with [`StoreError::NameTaken`] if the name exists; of several
    /// concurrent callers with the same name exactly one succeeds.
    async fn create(&self, name: &str, display_name: &str) -> Result<UserIdentity, StoreError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<UserIdentity>, StoreError>;

    async fn find_by_id(&self, id: &Uuid) -> Result<Option<UserIdentity>, StoreError>;
}

/// Registered authenticators, keyed by credential id.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Persist a new record. Fails with [`StoreError::Duplicate`] if the
    /// credential id is already taken.
    async fn put(&self, record: AuthenticatorRecord) -> Result<(), StoreError>;

    async fn get(&self, id: &CredentialId) -> Result<Option<AuthenticatorRecord>, StoreError>;

    async fn list_by_owner(&self, owner: &Uuid) -> Result<Vec<AuthenticatorRecord>, StoreError>;

    /// Move the signature counter of `id` to `new_counter` and stamp
    /// `last_used_at`, but only if the stored counter is strictly lower.
    ///
    /// Returns `false` when the record is missing or its counter is already
    /// at or above `new_counter`. Check and update happen as one step.
    async fn advance_counter(&self, id: &CredentialId, new_counter: u32)
        -> Result<bool, StoreError>;
}
