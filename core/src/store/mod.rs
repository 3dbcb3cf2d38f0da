// Store module — recent history and the credential collaborators

pub mod backend;
pub mod credentials;
pub mod history;
pub mod verifier;

pub use backend::{MemoryStorage, SledStorage, StorageBackend};
pub use credentials::{CredentialStore, StoreError, UserRecord, UserStore};
#[cfg(test)]
pub use credentials::MockCredentialStore;
pub use history::HistoryBuffer;
pub use verifier::{CredentialVerifier, Pbkdf2Verifier};
