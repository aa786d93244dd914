//! Adopted-socket transport: wraps a socket this process did not dial itself
//! (an accepted TCP connection handed in by a gateway's listener loop).
//!
//! `open` is a deliberate no-op (spec §9, resolving the "adopted socket open"
//! open question): the socket is already connected by the time it is handed
//! to this transport, so there is nothing left to establish.

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

use crate::errors::{IoOperation, RelayError, TransportError};

use super::Transport;

pub struct AdoptedSocketTransport {
    stream: TcpStream,
}

impl AdoptedSocketTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Applies TCP keepalive to the adopted socket via `socket2` (tokio's
    /// `TcpStream` exposes no keepalive API of its own).
    pub fn set_keepalive(&self, idle: Duration) -> Result<(), RelayError> {
        let sock_ref = SockRef::from(&self.stream);
        sock_ref.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle)).map_err(|e| {
            RelayError::Transport(TransportError::Io {
                operation: IoOperation::Configure,
                details: "failed to set TCP keepalive".into(),
                source: e,
            })
        })
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

impl Transport for AdoptedSocketTransport {
    async fn open(&mut self) -> Result<(), RelayError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        use tokio::io::AsyncWriteExt;
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    async fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, RelayError> {
        match self.stream.try_read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(RelayError::Transport(TransportError::from(e))),
        }
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, RelayError> {
        use tokio::io::AsyncWriteExt;
        self.stream.write_all(buf).await.map_err(TransportError::from)?;
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), RelayError> {
        use tokio::io::AsyncWriteExt;
        self.stream.flush().await.map_err(|e| RelayError::Transport(TransportError::from(e)))
    }
}
