// Transport module — framed TCP connections

pub mod connection;
pub mod probe;

pub use connection::{Connection, TransportError, DEFAULT_SEND_TIMEOUT};
pub use probe::{outward_ip, DEFAULT_PROBE_TARGET};
