// Client configuration

use crate::transport::{DEFAULT_PROBE_TARGET, DEFAULT_SEND_TIMEOUT};
use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

#[derive(Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Name to authenticate as; also the sender of every line
    pub name: String,
    pub credential: Zeroizing<String>,
    pub send_timeout: Duration,
    /// Target used to discover the outward address
    pub probe_target: String,
}

impl ClientConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        name: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            name: name.into(),
            credential: Zeroizing::new(credential.into()),
            ..Default::default()
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host must not be empty".to_string());
        }
        if self.port == 0 {
            return Err("port must be between 1 and 65535".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.send_timeout.is_zero() {
            return Err("send_timeout must be non-zero".to_string());
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7000,
            name: String::new(),
            credential: Zeroizing::new(String::new()),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            probe_target: DEFAULT_PROBE_TARGET.to_string(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("credential", &"<redacted>")
            .field("send_timeout", &self.send_timeout)
            .field("probe_target", &self.probe_target)
            .finish()
    }
}
