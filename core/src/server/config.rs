// Server configuration

use crate::transport::{DEFAULT_PROBE_TARGET, DEFAULT_SEND_TIMEOUT};
use std::time::Duration;

/// Upper bound on `history_capacity`
pub const MAX_HISTORY_CAPACITY: usize = 10_000;

/// Chat server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind the listener on
    pub bind_host: String,
    /// Maximum number of authenticated peers in the roster
    pub max_connections: usize,
    /// Number of recent chat lines replayed to new peers
    pub history_capacity: usize,
    /// Period of the keep-alive broadcast
    pub keep_alive_interval: Duration,
    /// Pause after a failed accept
    pub accept_backoff: Duration,
    /// Upper bound for writing one envelope to one peer
    pub send_timeout: Duration,
    /// Sender name on lines typed by the server operator
    pub operator_name: String,
    /// Target used to discover the outward address
    pub probe_target: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            max_connections: 100,
            history_capacity: 50,
            keep_alive_interval: Duration::from_secs(5),
            accept_backoff: Duration::from_millis(100),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            operator_name: "Server".to_string(),
            probe_target: DEFAULT_PROBE_TARGET.to_string(),
        }
    }
}

impl ServerConfig {
    /// Reject configurations the server cannot run with
    pub fn validate(&self) -> Result<(), String> {
        if self.bind_host.trim().is_empty() {
            return Err("bind_host must not be empty".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }
        if self.history_capacity == 0 {
            return Err("history_capacity must be at least 1".to_string());
        }
        if self.history_capacity > MAX_HISTORY_CAPACITY {
            return Err(format!(
                "history_capacity must be at most {}",
                MAX_HISTORY_CAPACITY
            ));
        }
        if self.keep_alive_interval.is_zero() {
            return Err("keep_alive_interval must be non-zero".to_string());
        }
        if self.accept_backoff.is_zero() {
            return Err("accept_backoff must be non-zero".to_string());
        }
        if self.send_timeout.is_zero() {
            return Err("send_timeout must be non-zero".to_string());
        }
        if self.operator_name.trim().is_empty() {
            return Err("operator_name must not be empty".to_string());
        }
        Ok(())
    }
}
