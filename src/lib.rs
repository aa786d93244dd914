pub mod byte_codec;
pub mod config;
pub mod connection;
#[cfg(feature = "rtu-protocol")]
pub mod crc;
pub mod errors;
pub mod frame;
#[cfg(feature = "gateway")]
pub mod gateway;
pub mod http_api;
#[cfg(feature = "master")]
pub mod instance;
pub mod logging;
pub mod outcome;
pub mod pdu;
#[cfg(feature = "slave")]
pub mod slave;
pub mod transport;
mod utils;

pub use config::{ConnectionConfig, HttpConfig, LoggingConfig, RelayConfig, RtuConfig, TcpConfig};
pub use config::{DataBits, Parity, RtsType, StopBits};
pub use connection::BackoffStrategy;
pub use connection::{ClientStats, ConnectionStats, IpStats};
pub use connection::{ConnectionGuard, ConnectionManager};
pub use errors::{
    BackoffError, ClientErrorKind, ConfigValidationError, ConnectionError, FrameErrorKind,
    IoOperation, ProtocolErrorKind, RelayError, RtsError, SerialErrorKind, TransportError,
};
#[cfg(feature = "gateway")]
pub use gateway::Gateway;
pub use http_api::start_http_server;
#[cfg(feature = "master")]
pub use instance::Instance;
pub use logging::setup_logging;
pub use outcome::ModbusOutcome;
#[cfg(feature = "slave")]
pub use slave::{DeviceStatus, SlaveDevice, SlaveEngine, TickOutcome};
pub use transport::Transport;
