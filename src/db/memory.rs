//! In-memory storage backend.
//!
//! Everything lives behind `tokio::sync::RwLock`s, so it is only suitable for
//! development and tests: nothing survives a restart.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{AuthenticatorRecord, CredentialId, UserIdentity};
use crate::db::{CredentialStore, StoreError, UserStore};

#[derive(Default)]
pub struct InMemoryStore {
    /// Login name to identity
    users: RwLock<HashMap<String, UserIdentity>>,
    credentials: RwLock<HashMap<CredentialId, AuthenticatorRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        tracing::info!("Creating in-memory credential store");
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn create(&self, name: &str, display_name: &str) -> Result<UserIdentity, StoreError> {
        let mut users = self.users.write().await;
        if users.contains_key(name) {
            return Err(StoreError::NameTaken(name.to_string()));
        }
        let user = UserIdentity::new(name.to_string(), display_name.to_string());
        users.insert(name.to_string(), user.clone());
        tracing::debug!("Created user '{}'", name);
        Ok(user)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<UserIdentity>, StoreError> {
        Ok(self.users.read().await.get(name).cloned())
    }

    async fn find_by_id(&self, id: &Uuid) -> Result<Option<UserIdentity>, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| &u.id == id).cloned())
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn put(&self, record: AuthenticatorRecord) -> Result<(), StoreError> {
        let mut credentials = self.credentials.write().await;
        if credentials.contains_key(&record.credential_id) {
            return Err(StoreError::Duplicate(record.credential_id));
        }
        credentials.insert(record.credential_id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &CredentialId) -> Result<Option<AuthenticatorRecord>, StoreError> {
        Ok(self.credentials.read().await.get(id).cloned())
    }

    async fn list_by_owner(&self, owner: &Uuid) -> Result<Vec<AuthenticatorRecord>, StoreError> {
        let credentials = self.credentials.read().await;
        let mut records: Vec<_> = credentials
            .values()
            .filter(|r| &r.owner == owner)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn advance_counter(
        &self,
        id: &CredentialId,
        new_counter: u32,
    ) -> Result<bool, StoreError> {
        // The write lock makes compare and update a single step
        let mut credentials = self.credentials.write().await;
        match credentials.get_mut(id) {
            Some(record) if record.sign_counter < new_counter => {
                record.sign_counter = new_counter;
                record.last_used_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
