// Credential store — user records looked up during the auth handshake

use super::backend::StorageBackend;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

const USER_PREFIX: &str = "user/";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached at all
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),
    /// The store was reached but the operation failed
    #[error("Persistence error: {0}")]
    Persist(String),
    #[error("User name already taken: {0}")]
    NameTaken(String),
    #[error("User not found: {0}")]
    NotFound(String),
}

/// A stored user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    /// Verifier-specific hash string, never the plaintext
    pub password_hash: String,
    /// Unix timestamp (seconds)
    pub created_at: u64,
}

impl UserRecord {
    pub fn new(name: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            password_hash: password_hash.into(),
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

/// Where the server learns who is allowed in.
///
/// Every call may fail; callers treat failure as "cannot authenticate"
/// and never retry on their own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn list(&self) -> Result<Vec<UserRecord>, StoreError>;
    async fn create(&self, record: UserRecord) -> Result<UserRecord, StoreError>;
    async fn update(&self, id: &str, record: UserRecord) -> Result<UserRecord, StoreError>;
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// Credential store over any [`StorageBackend`], records kept as JSON
#[derive(Clone)]
pub struct UserStore {
    backend: Arc<dyn StorageBackend>,
}

impl UserStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    fn key(id: &str) -> Vec<u8> {
        format!("{}{}", USER_PREFIX, id).into_bytes()
    }

    fn load_all(&self) -> Result<Vec<UserRecord>, StoreError> {
        let entries = self
            .backend
            .scan_prefix(USER_PREFIX.as_bytes())
            .map_err(StoreError::Unavailable)?;

        entries
            .into_iter()
            .map(|(_, value)| {
                serde_json::from_slice(&value).map_err(|e| StoreError::Persist(e.to_string()))
            })
            .collect()
    }

    fn save(&self, record: &UserRecord) -> Result<(), StoreError> {
        let value = serde_json::to_vec(record).map_err(|e| StoreError::Persist(e.to_string()))?;
        self.backend
            .put(&Self::key(&record.id), &value)
            .map_err(StoreError::Persist)?;
        self.backend.flush().map_err(StoreError::Persist)
    }

    fn name_taken_by_other(&self, name: &str, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .load_all()?
            .iter()
            .any(|u| u.name == name && u.id != id))
    }
}

#[async_trait]
impl CredentialStore for UserStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.load_all()?.into_iter().find(|u| u.name == name))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        match self
            .backend
            .get(&Self::key(id))
            .map_err(StoreError::Unavailable)?
        {
            Some(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| StoreError::Persist(e.to_string())),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<UserRecord>, StoreError> {
        let mut users = self.load_all()?;
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }

    async fn create(&self, record: UserRecord) -> Result<UserRecord, StoreError> {
        if self.name_taken_by_other(&record.name, &record.id)? {
            return Err(StoreError::NameTaken(record.name));
        }
        self.save(&record)?;
        tracing::debug!("Created user {}", record.name);
        Ok(record)
    }

    async fn update(&self, id: &str, mut record: UserRecord) -> Result<UserRecord, StoreError> {
        if self.find_by_id(id).await?.is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        if self.name_taken_by_other(&record.name, id)? {
            return Err(StoreError::NameTaken(record.name));
        }
        record.id = id.to_string();
        self.save(&record)?;
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self
            .backend
            .remove(&Self::key(id))
            .map_err(StoreError::Persist)?;
        self.backend.flush().map_err(StoreError::Persist)?;
        Ok(removed)
    }
}
