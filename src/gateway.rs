//! `modbus-gateway`'s bridge: accepts TCP/MBAP clients and forwards each
//! request onto a single shared RTU bus, returning the RTU reply re-wrapped
//! as MBAP. One instance per process; the RTU transport is shared behind a
//! mutex since it is one physical bus serving every TCP client.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, Mutex},
    time::sleep,
};
use tracing::{debug, error, info};

use crate::config::RelayConfig;
use crate::connection::ConnectionManager;
use crate::errors::{ConnectionError, RelayError};
use crate::frame::{self, FrameParseError};
use crate::transport::rtu_serial::RtuSerialTransport;
use crate::transport::socket::AdoptedSocketTransport;
use crate::transport::{self, FramingOutcome, Transport};

/// Modbus exception code for "gateway target device failed to respond"
/// (spec §4.1/§7): what the front door returns to a TCP client when the RTU
/// bus side times out or the frame it sent back fails CRC.
const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

const FRONT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const FRONT_INTER_BYTE_TIMEOUT: Duration = Duration::from_millis(20);

pub struct Gateway {
    config: RelayConfig,
    rtu: Arc<Mutex<RtuSerialTransport>>,
    connection_manager: Arc<ConnectionManager>,
    shutdown: broadcast::Sender<()>,
}

impl Gateway {
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;

        let rtu = RtuSerialTransport::new(config.rtu.clone());

        Ok(Self {
            connection_manager: Arc::new(ConnectionManager::new(config.connection.clone())),
            rtu: Arc::new(Mutex::new(rtu)),
            config,
            shutdown: broadcast::channel(1).0,
        })
    }

    pub fn connection_manager(&self) -> Arc<ConnectionManager> {
        Arc::clone(&self.connection_manager)
    }

    /// Subscribes to the gateway's shutdown broadcast, so other services
    /// started alongside it (e.g. the HTTP API) can shut down in step.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    fn spawn_task<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(future);
        debug!("spawned {} task: {:?}", name, task.id());
    }

    pub async fn run(self: Arc<Self>) -> Result<(), RelayError> {
        let addr = format!("{}:{}", self.config.tcp.bind_addr, self.config.tcp.bind_port);

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            RelayError::Transport(crate::errors::TransportError::Io {
                operation: crate::errors::IoOperation::Listen,
                details: format!("failed to bind to {addr}"),
                source: e,
            })
        })?;

        info!("listening on {}", addr);

        let manager = Arc::clone(&self.connection_manager);
        let mut shutdown_rx = self.shutdown.subscribe();
        self.spawn_task("cleanup", async move {
            loop {
                tokio::select! {
                    _ = sleep(Duration::from_secs(60)) => {
                        if let Err(e) = manager.cleanup_idle_connections().await {
                            error!("error during connection cleanup: {e}");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("cleanup task received shutdown signal");
                        break;
                    }
                }
            }
        });

        let manager = Arc::clone(&self.connection_manager);
        let mut shutdown_rx = self.shutdown.subscribe();
        self.spawn_task("stats", async move {
            loop {
                tokio::select! {
                    _ = sleep(Duration::from_secs(300)) => {
                        match manager.get_stats().await {
                            Ok(stats) => info!("connection stats: {:?}", stats),
                            Err(e) => error!("failed to get connection stats: {e}"),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("stats task received shutdown signal");
                        break;
                    }
                }
            }
        });

        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!("accept error: {e}");
                    sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            info!("new connection from {}", peer);

            match self.connection_manager.accept_connection(peer).await {
                Ok(guard) => {
                    let rtu = Arc::clone(&self.rtu);
                    let manager = Arc::clone(&self.connection_manager);
                    let transaction_timeout = self.config.rtu.transaction_timeout;
                    let keep_alive = self.config.tcp.keep_alive;

                    self.spawn_task("client", async move {
                        if let Err(e) =
                            handle_client(socket, rtu, &manager, peer, transaction_timeout, keep_alive).await
                        {
                            error!("client error: {e}");
                            if let Err(stat_err) = manager.record_client_error(&peer).await {
                                error!("failed to record client error: {stat_err}");
                            }
                        }
                        drop(guard);
                    });
                }
                Err(e) => {
                    error!("connection rejected: {e}");
                    sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub async fn shutdown(&self) -> Result<(), RelayError> {
        info!("initiating graceful shutdown");
        self.shutdown.send(()).map_err(|e| {
            RelayError::Connection(ConnectionError::InvalidState(format!(
                "failed to send shutdown signal: {e}"
            )))
        })?;
        sleep(Duration::from_secs(5)).await;
        Ok(())
    }
}

async fn handle_client(
    socket: TcpStream,
    rtu: Arc<Mutex<RtuSerialTransport>>,
    manager: &ConnectionManager,
    peer_addr: SocketAddr,
    rtu_transaction_timeout: Duration,
    keep_alive: Duration,
) -> Result<(), RelayError> {
    socket.set_nodelay(true).map_err(|e| {
        RelayError::Transport(crate::errors::TransportError::Io {
            operation: crate::errors::IoOperation::Configure,
            details: "failed to set TCP_NODELAY".into(),
            source: e,
        })
    })?;

    let mut front = AdoptedSocketTransport::new(socket);
    front.set_keepalive(keep_alive)?;
    let mut front_buf = vec![0u8; frame::tcp::MAX_FRAME_LEN];
    let mut rtu_request = Vec::with_capacity(frame::rtu::MAX_FRAME_LEN);
    let mut rtu_buf = vec![0u8; frame::rtu::MAX_FRAME_LEN];
    let mut tcp_response = Vec::with_capacity(frame::tcp::MAX_FRAME_LEN);

    loop {
        let outcome = transport::read_framed(
            &mut front,
            &mut front_buf,
            FRONT_IDLE_TIMEOUT,
            FRONT_INTER_BYTE_TIMEOUT,
        )
        .await?;

        let n = match outcome {
            FramingOutcome::Timeout => {
                info!("client {} idle, disconnecting", peer_addr);
                return Ok(());
            }
            FramingOutcome::Frame(n) => n,
        };

        let decoded = match frame::tcp::decode(&front_buf[..n]) {
            Ok(decoded) => decoded,
            Err(e) => {
                manager.record_request(peer_addr, false).await;
                return Err(frame_parse_error(e));
            }
        };

        let request_id = crate::utils::generate_request_id();
        debug!(
            "{}: request {} tcp unit={} pdu={:02X?}",
            peer_addr, request_id, decoded.unit_id, decoded.pdu
        );

        frame::rtu::encode(decoded.unit_id, decoded.pdu, &mut rtu_request);

        let rtu_pdu_len = {
            let mut transport = rtu.lock().await;
            transport.open().await?;
            if let Err(e) = transport.flush().await {
                manager.record_request(peer_addr, false).await;
                return Err(e);
            }
            if let Err(e) = transport.write(&rtu_request).await {
                manager.record_request(peer_addr, false).await;
                return Err(e);
            }

            let outcome =
                transport::read_framed(&mut *transport, &mut rtu_buf, rtu_transaction_timeout, transport::DEFAULT_INTER_BYTE_TIMEOUT)
                    .await?;

            match outcome {
                FramingOutcome::Timeout => {
                    manager.record_request(peer_addr, false).await;
                    send_exception(
                        &mut front,
                        &mut tcp_response,
                        decoded.transaction_id,
                        decoded.unit_id,
                        decoded.pdu[0],
                        EXCEPTION_GATEWAY_TARGET_FAILED,
                    )
                    .await?;
                    continue;
                }
                FramingOutcome::Frame(n) => match frame::rtu::decode(&rtu_buf[..n]) {
                    Ok(rtu_decoded) => rtu_decoded.pdu.len(),
                    Err(e) => {
                        manager.record_request(peer_addr, false).await;
                        return Err(frame_parse_error(e));
                    }
                },
            }
        };

        let rtu_pdu = &rtu_buf[1..1 + rtu_pdu_len];
        frame::tcp::encode(decoded.transaction_id, decoded.unit_id, rtu_pdu, &mut tcp_response);

        debug!("{}: request {} tcp response {:02X?}", peer_addr, request_id, &tcp_response);

        if let Err(e) = front.write(&tcp_response).await {
            manager.record_request(peer_addr, false).await;
            return Err(e);
        }
        front.flush().await?;

        manager.record_request(peer_addr, true).await;
    }
}

async fn send_exception(
    front: &mut AdoptedSocketTransport,
    scratch: &mut Vec<u8>,
    transaction_id: u16,
    unit_id: u8,
    request_fc: u8,
    exception_code: u8,
) -> Result<(), RelayError> {
    let pdu = [request_fc | 0x80, exception_code];
    frame::tcp::encode(transaction_id, unit_id, &pdu, scratch);
    front.write(scratch).await?;
    front.flush().await
}

fn frame_parse_error(e: FrameParseError) -> RelayError {
    match e {
        FrameParseError::TooShort => {
            RelayError::frame(crate::errors::FrameErrorKind::TooShort, e.to_string(), None)
        }
        FrameParseError::CrcMismatch => {
            RelayError::frame(crate::errors::FrameErrorKind::InvalidCrc, e.to_string(), None)
        }
        FrameParseError::LengthMismatch | FrameParseError::InvalidHeader => {
            RelayError::frame(crate::errors::FrameErrorKind::InvalidFormat, e.to_string(), None)
        }
        FrameParseError::Pdu(pdu_err) => {
            RelayError::frame(crate::errors::FrameErrorKind::InvalidFormat, pdu_err.to_string(), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gateway_builds_from_default_config() {
        let gateway = Gateway::new(RelayConfig::default()).unwrap();
        assert_eq!(gateway.connection_manager().connection_count().await, 0);
    }

    #[test]
    fn exception_pdu_mirrors_function_code_with_high_bit_set() {
        let mut scratch = Vec::new();
        frame::tcp::encode(0x0001, 0x11, &[0x83, EXCEPTION_GATEWAY_TARGET_FAILED], &mut scratch);
        assert_eq!(scratch[7], 0x83);
        assert_eq!(scratch[8], EXCEPTION_GATEWAY_TARGET_FAILED);
    }
}
