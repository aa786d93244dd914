//! TCP client transport: a master connecting out to a TCP-side Modbus server.

use tokio::net::TcpStream;

use crate::errors::{IoOperation, RelayError, TransportError};

use super::Transport;

pub struct TcpClientTransport {
    addr: String,
    stream: Option<TcpStream>,
}

impl TcpClientTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { addr: format!("{}:{}", host.into(), port), stream: None }
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream, RelayError> {
        self.stream.as_mut().ok_or_else(|| {
            RelayError::Transport(TransportError::Io {
                operation: IoOperation::Read,
                details: "TCP connection not open".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotConnected, "not open"),
            })
        })
    }
}

impl Transport for TcpClientTransport {
    async fn open(&mut self) -> Result<(), RelayError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            RelayError::Transport(TransportError::Io {
                operation: IoOperation::Configure,
                details: format!("failed to connect to {}", self.addr),
                source: e,
            })
        })?;
        stream.set_nodelay(true).map_err(TransportError::from)?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        self.stream = None;
        Ok(())
    }

    async fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, RelayError> {
        let stream = self.stream_mut()?;
        match stream.try_read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(RelayError::Transport(TransportError::from(e))),
        }
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, RelayError> {
        use tokio::io::AsyncWriteExt;
        let stream = self.stream_mut()?;
        stream.write_all(buf).await.map_err(TransportError::from)?;
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), RelayError> {
        use tokio::io::AsyncWriteExt;
        self.stream_mut()?.flush().await.map_err(|e| RelayError::Transport(TransportError::from(e)))
    }
}
