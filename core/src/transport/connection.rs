// Connection — one TCP socket carrying length-prefixed envelopes
//
// The read and write halves are locked independently: one receive loop and
// any number of serialized senders can use the same connection at once.
// `close()` is the only cancellation primitive; it wakes any pending
// receive or send on this connection and releases the socket.

use crate::envelope::codec::{read_frame, write_frame};
use crate::envelope::{decode_envelope, encode_envelope, CodecError, Envelope};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// Default upper bound for writing one envelope
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure of a single connection. Never affects any other connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("Protocol violation: {0}")]
    Protocol(String),
    #[error("Encode error: {0}")]
    Encode(String),
    #[error("Send timed out")]
    Timeout,
}

impl From<CodecError> for TransportError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => TransportError::Io(e),
            CodecError::FrameTooLarge(len) => TransportError::FrameTooLarge(len),
            CodecError::EmptyFrame => TransportError::Protocol("empty frame".to_string()),
            other => TransportError::Encode(other.to_string()),
        }
    }
}

pub struct Connection {
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    closed: watch::Sender<bool>,
    send_timeout: Duration,
}

impl Connection {
    /// Wrap an accepted or dialed stream
    pub fn new(stream: TcpStream, send_timeout: Duration) -> std::io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let (closed, _) = watch::channel(false);

        Ok(Self {
            reader: Mutex::new(Some(read_half)),
            writer: Mutex::new(Some(write_half)),
            peer_addr,
            local_addr,
            closed,
            send_timeout,
        })
    }

    /// Dial a server
    pub async fn connect(addr: &str, send_timeout: Duration) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::new(stream, send_timeout)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once `close()` has been called
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        wait_closed(&mut closed).await;
    }

    /// Encode, write and flush one envelope.
    ///
    /// Concurrent callers are serialized on the write half.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let bytes = encode_envelope(envelope)?;

        let mut closed = self.closed.subscribe();
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;

        tokio::select! {
            result = tokio::time::timeout(self.send_timeout, write_frame(writer, &bytes)) => {
                match result {
                    Ok(Ok(())) => {
                        debug!("→ {} {}", self.peer_addr, envelope.kind());
                        Ok(())
                    }
                    Ok(Err(e)) => Err(e.into()),
                    Err(_) => Err(TransportError::Timeout),
                }
            }
            _ = wait_closed(&mut closed) => Err(TransportError::Closed),
        }
    }

    /// Wait for the next envelope.
    ///
    /// `Ok(None)` means a whole frame arrived but did not decode; the stream
    /// is still aligned and the caller should simply read again.
    pub async fn receive(&self) -> Result<Option<Envelope>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut closed = self.closed.subscribe();
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(TransportError::Closed)?;

        let frame = tokio::select! {
            result = read_frame(reader) => result?,
            _ = wait_closed(&mut closed) => return Err(TransportError::Closed),
        };

        match decode_envelope(&frame) {
            Ok(envelope) => {
                debug!("← {} {}", self.peer_addr, envelope.kind());
                Ok(Some(envelope))
            }
            Err(e) => {
                debug!("Skipping undecodable frame from {}: {}", self.peer_addr, e);
                Ok(None)
            }
        }
    }

    /// Close the connection. Idempotent; returns `true` only for the call
    /// that actually closed it.
    pub async fn close(&self) -> bool {
        let newly_closed = self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        if !newly_closed {
            return false;
        }

        // Pending sends/receives have been woken and will drop their locks.
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.reader.lock().await.take();
        debug!("Closed connection to {}", self.peer_addr);
        true
    }
}

#[cfg(test)]
impl Connection {
    /// Drop the write half without raising the closed flag, leaving the
    /// read side unaware
    pub(crate) async fn sever_writer(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|c| *c).await;
}
