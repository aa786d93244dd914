//! RTU transport backed by a real serial device via the `serialport` crate.

use std::time::Duration;

use serialport::SerialPort;
use tracing::trace;

use crate::config::RtuConfig;
use crate::errors::{IoOperation, RelayError, TransportError};

use super::Transport;

/// How long the underlying blocking read call is allowed to wait before
/// returning with nothing: short enough that the dual-timeout framing loop
/// in [`super::read_framed`] stays responsive to its own clock.
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(5);

pub struct RtuSerialTransport {
    config: RtuConfig,
    port: Option<Box<dyn SerialPort>>,
}

impl RtuSerialTransport {
    pub fn new(config: RtuConfig) -> Self {
        Self { config, port: None }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, RelayError> {
        self.port.as_mut().ok_or_else(|| {
            RelayError::Transport(TransportError::Io {
                operation: IoOperation::Read,
                details: "serial port not open".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotConnected, "not open"),
            })
        })
    }

    async fn set_rts(&mut self, active: bool) -> Result<(), RelayError> {
        if self.config.rts_type == crate::config::RtsType::None {
            return Ok(());
        }
        let level = self.config.rts_type.to_signal_level(active);
        self.port_mut()?.write_request_to_send(level).map_err(|e| {
            RelayError::Transport(TransportError::Serial {
                kind: crate::errors::SerialErrorKind::WriteFailed,
                port: self.config.device.clone(),
                details: "failed to drive RTS".into(),
                source: Some(e),
            })
        })?;
        if self.config.rts_delay_us > 0 {
            tokio::time::sleep(Duration::from_micros(self.config.rts_delay_us)).await;
        }
        Ok(())
    }
}

impl Transport for RtuSerialTransport {
    async fn open(&mut self) -> Result<(), RelayError> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(&self.config.device, self.config.baud_rate)
            .data_bits(self.config.data_bits.into())
            .parity(self.config.parity.into())
            .stop_bits(self.config.stop_bits.into())
            .timeout(PORT_POLL_TIMEOUT)
            .open()
            .map_err(TransportError::from)?;
        self.port = Some(port);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        self.port = None;
        Ok(())
    }

    async fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, RelayError> {
        use std::io::Read;
        let port = self.port_mut()?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(RelayError::Transport(TransportError::from(e))),
        }
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, RelayError> {
        use std::io::Write;
        self.set_rts(true).await?;
        let result = self.port_mut()?.write_all(buf).map(|_| buf.len());
        self.set_rts(false).await?;
        result.map_err(|e| RelayError::Transport(TransportError::from(e)))
    }

    async fn flush(&mut self) -> Result<(), RelayError> {
        use std::io::Write;
        if self.config.flush_after_write {
            trace!(device = %self.config.device, "flushing serial port");
            self.port_mut()?.flush().map_err(|e| RelayError::Transport(TransportError::from(e)))?;
        }
        Ok(())
    }
}
