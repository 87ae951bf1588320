//! # SQLite Storage Backend
//!
//! Persists users and passkey credentials with SQLx. The schema lives in
//! `./migrations` and is applied on connect.
//!
//! ## Column encodings
//! - ids: text (UUID string for users, base64url for credentials)
//! - timestamps: RFC3339 text
//! - transports: JSON array text, e.g. `["usb","nfc"]`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use crate::db::models::{AuthenticatorRecord, CredentialId, Transport, UserIdentity};
use crate::db::{CredentialStore, StoreError, UserStore};

#[derive(Clone)]
pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    display_name: String,
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: String,
    user_id: String,
    credential_public_key: Vec<u8>,
    counter: i64,
    transports: Option<String>,
    created_at: String,
    last_used_at: Option<String>,
}

impl TryFrom<UserRow> for UserIdentity {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(UserIdentity {
            id: parse_uuid(&row.id)?,
            name: row.username,
            display_name: row.display_name,
        })
    }
}

impl TryFrom<CredentialRow> for AuthenticatorRecord {
    type Error = StoreError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        let credential_id = CredentialId::from_base64url(&row.id)
            .map_err(|e| StoreError::Corrupt(format!("credential id '{}': {}", row.id, e)))?;
        let sign_counter = u32::try_from(row.counter)
            .map_err(|_| StoreError::Corrupt(format!("counter {} out of range", row.counter)))?;
        let transports = match row.transports {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| StoreError::Corrupt(format!("transports: {e}")))?,
            None => Vec::new(),
        };

        Ok(AuthenticatorRecord {
            credential_id,
            owner: parse_uuid(&row.user_id)?,
            public_key: row.credential_public_key,
            sign_counter,
            transports,
            created_at: parse_timestamp(&row.created_at)?,
            last_used_at: row.last_used_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::Corrupt(format!("user id '{value}': {e}")))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{value}': {e}")))
}

impl SqliteCredentialStore {
    /// Wrap an existing pool and bring its schema up to date.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("SQLite credential store ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl UserStore for SqliteCredentialStore {
    async fn create(&self, name: &str, display_name: &str) -> Result<UserIdentity, StoreError> {
        let user = UserIdentity::new(name.to_string(), display_name.to_string());

        let result = sqlx::query(
            "INSERT INTO users (id, username, display_name, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user.id.to_string())
        .bind(&user.name)
        .bind(&user.display_name)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(user),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::NameTaken(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<UserIdentity>, StoreError> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, username, display_name FROM users WHERE username = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .map(UserIdentity::try_from)
        .transpose()
    }

    async fn find_by_id(&self, id: &Uuid) -> Result<Option<UserIdentity>, StoreError> {
        sqlx::query_as::<_, UserRow>("SELECT id, username, display_name FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(UserIdentity::try_from)
            .transpose()
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn put(&self, record: AuthenticatorRecord) -> Result<(), StoreError> {
        let transports_json = serde_json::to_string(&record.transports)
            .map_err(|e| StoreError::Corrupt(format!("transports: {e}")))?;

        let result = sqlx::query(
            "INSERT INTO passkey_credentials
             (id, user_id, credential_public_key, counter, transports, created_at, last_used_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.credential_id.to_base64url())
        .bind(record.owner.to_string())
        .bind(&record.public_key)
        .bind(i64::from(record.sign_counter))
        .bind(transports_json)
        .bind(record.created_at.to_rfc3339())
        .bind(record.last_used_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Duplicate(record.credential_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &CredentialId) -> Result<Option<AuthenticatorRecord>, StoreError> {
        sqlx::query_as::<_, CredentialRow>("SELECT * FROM passkey_credentials WHERE id = ?")
            .bind(id.to_base64url())
            .fetch_optional(&self.pool)
            .await?
            .map(AuthenticatorRecord::try_from)
            .transpose()
    }

    async fn list_by_owner(&self, owner: &Uuid) -> Result<Vec<AuthenticatorRecord>, StoreError> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            "SELECT * FROM passkey_credentials WHERE user_id = ? ORDER BY created_at",
        )
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuthenticatorRecord::try_from).collect()
    }

    async fn advance_counter(
        &self,
        id: &CredentialId,
        new_counter: u32,
    ) -> Result<bool, StoreError> {
        // The counter guard in the WHERE clause makes this a compare-and-swap
        let result = sqlx::query(
            "UPDATE passkey_credentials
             SET counter = ?, last_used_at = ?
             WHERE id = ? AND counter < ?",
        )
        .bind(i64::from(new_counter))
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_base64url())
        .bind(i64::from(new_counter))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
