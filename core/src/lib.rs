// Murmur Core — real-time text chat over plain TCP
//
// One server, many peers. Every peer authenticates, receives the recent
// history, then sees every line any other peer sends, in order.

pub mod client;
pub mod envelope;
pub mod server;
pub mod store;
pub mod transport;

pub use client::{ChatClient, ClientConfig, ClientError, ClientEvent, ClientEvents};
pub use envelope::{ChatLine, Envelope, Notification, Presence};
pub use server::{
    AgentId, AuthRejection, BroadcastReport, ChatServer, PeerInfo, ServerConfig, ServerError,
    ServerEvent, ServerEvents, MAX_HISTORY_CAPACITY,
};
pub use store::{
    CredentialStore, CredentialVerifier, HistoryBuffer, MemoryStorage, Pbkdf2Verifier,
    SledStorage, StorageBackend, StoreError, UserRecord, UserStore,
};
pub use transport::{Connection, TransportError};
