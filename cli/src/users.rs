// User administration over the sled-backed credential store

use anyhow::{Context, Result};
use murmur_core::{CredentialStore, Pbkdf2Verifier, SledStorage, UserRecord, UserStore};
use std::path::Path;
use std::sync::Arc;

pub struct UserAdmin {
    store: UserStore,
    verifier: Pbkdf2Verifier,
}

impl UserAdmin {
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_verifier(path, Pbkdf2Verifier::new())
    }

    pub fn with_verifier(path: &Path, verifier: Pbkdf2Verifier) -> Result<Self> {
        let path = path.to_str().context("User database path is not valid UTF-8")?;
        let storage = SledStorage::new(path)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to open user database")?;
        Ok(Self {
            store: UserStore::new(Arc::new(storage)),
            verifier,
        })
    }

    /// Store handle for the server's auth path
    pub fn store(&self) -> Arc<dyn CredentialStore> {
        Arc::new(self.store.clone())
    }

    pub fn verifier(&self) -> Pbkdf2Verifier {
        self.verifier.clone()
    }

    pub async fn add(&self, name: &str, password: &str) -> Result<UserRecord> {
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("User name must not be empty");
        }
        let record = UserRecord::new(name, self.verifier.hash(password));
        Ok(self.store.create(record).await?)
    }

    pub async fn set_password(&self, name: &str, password: &str) -> Result<UserRecord> {
        let mut record = self
            .store
            .find_by_name(name)
            .await?
            .with_context(|| format!("No such user: {}", name))?;
        record.password_hash = self.verifier.hash(password);
        let id = record.id.clone();
        Ok(self.store.update(&id, record).await?)
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        let record = self
            .store
            .find_by_name(name)
            .await?
            .with_context(|| format!("No such user: {}", name))?;
        self.store.delete(&record.id).await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<UserRecord>> {
        Ok(self.store.list().await?)
    }
}
