//! Slave engine (spec §4.7): a single-iteration `tick()` state machine that
//! a host loop drives repeatedly, dispatching requests onto an
//! application-supplied [`SlaveDevice`].

use std::sync::Arc;
use std::time::Duration;

use crate::byte_codec::{get_bit, get_u16_be, pack_bits, packed_bit_len, put_u16_be};
use crate::errors::RelayError;
use crate::frame;
use crate::pdu::{self, Request, Response};
use crate::transport::{self, FramingOutcome, Transport};

/// Outcome of a callback on [`SlaveDevice`] (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    IllegalAddress,
    IllegalValue,
    DeviceFailure,
}

impl DeviceStatus {
    fn exception_code(self) -> u8 {
        match self {
            DeviceStatus::IllegalAddress => 0x02,
            DeviceStatus::IllegalValue => 0x03,
            DeviceStatus::DeviceFailure => 0x04,
        }
    }
}

/// The callback table a slave dispatches onto (spec §6). Implementors are
/// shared behind `Arc<dyn SlaveDevice>`, so any mutation of backing state
/// must synchronise itself (a `Mutex`/`RwLock` inside the implementation,
/// not a lock this engine takes on the application's behalf).
pub trait SlaveDevice: Send + Sync {
    fn read_discrete(&self, addr: u16) -> Result<bool, DeviceStatus>;
    fn read_coil(&self, addr: u16) -> Result<bool, DeviceStatus>;
    fn write_coil(&self, addr: u16, value: bool) -> Result<(), DeviceStatus>;
    fn read_input(&self, addr: u16) -> Result<u16, DeviceStatus>;
    fn read_holding(&self, addr: u16) -> Result<u16, DeviceStatus>;
    fn write_holding(&self, addr: u16, value: u16) -> Result<(), DeviceStatus>;
}

enum Protocol {
    Rtu { address: u8, check_address: bool },
    Tcp { unit_id: u8, strict_unit_check: bool },
}

/// What a `tick()` call did, for a caller that wants to log or count ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing arrived before the response-timeout.
    Idle,
    /// A frame arrived but was not addressed to this slave, or failed to
    /// parse; dropped silently per spec §4.7.
    Dropped,
    /// A broadcast request was applied with no reply sent.
    Broadcast,
    /// A request was answered (with a normal or exception response).
    Responded,
}

const MAX_FRAME_LEN: usize = 260;

pub struct SlaveEngine<T: Transport> {
    transport: T,
    protocol: Protocol,
    device: Arc<dyn SlaveDevice>,
    response_timeout: Duration,
    inter_byte_timeout: Duration,
    request_buf: Vec<u8>,
    response_scratch: Vec<u8>,
    frame_scratch: Vec<u8>,
    /// Scratch buffer a read-shaped response's payload is written into
    /// (spec §9's zero-copy design, applied to the slave side: the payload
    /// borrows from this engine-owned buffer instead of being leaked).
    read_scratch: Vec<u8>,
    opened: bool,
}

impl<T: Transport> SlaveEngine<T> {
    pub fn new_rtu(transport: T, address: u8, device: Arc<dyn SlaveDevice>) -> Self {
        Self::with_protocol(
            transport,
            Protocol::Rtu { address, check_address: cfg!(feature = "strict-unit-check") },
            device,
        )
    }

    pub fn new_tcp(transport: T, unit_id: u8, device: Arc<dyn SlaveDevice>) -> Self {
        Self::with_protocol(
            transport,
            Protocol::Tcp { unit_id, strict_unit_check: cfg!(feature = "mbap-strict") },
            device,
        )
    }

    fn with_protocol(transport: T, protocol: Protocol, device: Arc<dyn SlaveDevice>) -> Self {
        Self {
            transport,
            protocol,
            device,
            response_timeout: transport::DEFAULT_RESPONSE_TIMEOUT,
            inter_byte_timeout: transport::DEFAULT_INTER_BYTE_TIMEOUT,
            request_buf: vec![0u8; MAX_FRAME_LEN],
            response_scratch: Vec::with_capacity(MAX_FRAME_LEN),
            frame_scratch: Vec::with_capacity(MAX_FRAME_LEN),
            read_scratch: Vec::with_capacity(MAX_FRAME_LEN),
            opened: false,
        }
    }

    pub fn with_timeouts(mut self, response_timeout: Duration, inter_byte_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self.inter_byte_timeout = inter_byte_timeout;
        self
    }

    /// Runs one receive/dispatch/respond cycle. Returns promptly with
    /// `Idle` when nothing is waiting; a host loop is expected to call this
    /// repeatedly.
    pub async fn tick(&mut self) -> Result<TickOutcome, RelayError> {
        if !self.opened {
            self.transport.open().await?;
            self.opened = true;
        }

        let outcome = match transport::read_framed(
            &mut self.transport,
            &mut self.request_buf,
            self.response_timeout,
            self.inter_byte_timeout,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = self.transport.close().await;
                self.opened = false;
                return Err(e);
            }
        };

        let n = match outcome {
            FramingOutcome::Timeout => return Ok(TickOutcome::Idle),
            FramingOutcome::Frame(n) => n,
        };

        let frame = &self.request_buf[..n];

        let (pdu_bytes, transaction_id, is_broadcast) = match &self.protocol {
            Protocol::Rtu { address, check_address } => match frame::rtu::decode(frame) {
                Ok(decoded) => {
                    let broadcast = decoded.address == frame::rtu::BROADCAST_ADDRESS;
                    if *check_address && decoded.address != *address && !broadcast {
                        return Ok(TickOutcome::Dropped);
                    }
                    (decoded.pdu, None, broadcast)
                }
                Err(_) => return Ok(TickOutcome::Dropped),
            },
            Protocol::Tcp { unit_id, strict_unit_check } => match frame::tcp::decode(frame) {
                Ok(decoded) => {
                    if *strict_unit_check && decoded.unit_id != *unit_id {
                        return Ok(TickOutcome::Dropped);
                    }
                    (decoded.pdu, Some(decoded.transaction_id), false)
                }
                Err(_) => return Ok(TickOutcome::Dropped),
            },
        };

        let (response, request_fc) = match pdu::parse_request(pdu_bytes) {
            Ok(req) => {
                let fc = req.function_code();
                (dispatch(&self.device, &mut self.read_scratch, &req), fc)
            }
            // A byte-count that disagrees with the declared quantity is a
            // well-formed-but-invalid request (spec §4.7/§8), not noise to
            // drop: the function code is still readable, so reply with
            // exception 0x03 instead of staying silent.
            Err(pdu::PduError::InconsistentLength) => {
                let fc = pdu_bytes[0];
                (exception(fc, DeviceStatus::IllegalValue), fc)
            }
            Err(_) => return Ok(TickOutcome::Dropped),
        };

        if is_broadcast {
            return Ok(TickOutcome::Broadcast);
        }

        self.response_scratch.clear();
        pdu::make_response(&response, request_fc, &mut self.response_scratch);

        match &self.protocol {
            Protocol::Rtu { address, .. } => {
                frame::rtu::encode(*address, &self.response_scratch, &mut self.frame_scratch);
            }
            Protocol::Tcp { unit_id, .. } => {
                frame::tcp::encode(
                    transaction_id.unwrap_or(0),
                    *unit_id,
                    &self.response_scratch,
                    &mut self.frame_scratch,
                );
            }
        }

        if let Err(e) = self.transport.write(&self.frame_scratch).await {
            let _ = self.transport.close().await;
            self.opened = false;
            return Err(e);
        }
        let _ = self.transport.flush().await;

        Ok(TickOutcome::Responded)
    }
}

/// Dispatches a parsed request onto the device callback table, producing a
/// normal or exception response PDU (never an I/O result: callback failures
/// become exception responses, per spec §4.7). A free function rather than
/// a `&mut self` method so the borrow checker can see `device` and
/// `read_scratch` as the two disjoint fields they are: a read-shaped
/// response borrows from `read_scratch` (spec §9's zero-copy design) while
/// the rest of the engine (transport, frame buffers) stays usable once the
/// response has been written out by the caller.
fn dispatch<'s>(
    device: &Arc<dyn SlaveDevice>,
    read_scratch: &'s mut Vec<u8>,
    request: &Request<'_>,
) -> Response<'s> {
    match *request {
        Request::ReadCoils { addr, count } | Request::ReadDiscreteInputs { addr, count } => {
            if !pdu::validate_read_bits_count(count) {
                return exception(request.function_code(), DeviceStatus::IllegalValue);
            }
            let is_coils = matches!(request, Request::ReadCoils { .. });
            let mut bits = Vec::with_capacity(count as usize);
            for i in 0..count {
                let a = addr.wrapping_add(i);
                let result = if is_coils { device.read_coil(a) } else { device.read_discrete(a) };
                match result {
                    Ok(bit) => bits.push(bit),
                    Err(status) => return exception(request.function_code(), status),
                }
            }
            read_scratch.clear();
            read_scratch.resize(packed_bit_len(count), 0);
            pack_bits(&bits, read_scratch);
            Response::ReadBits { payload: read_scratch }
        }
        Request::ReadHoldingRegisters { addr, count } | Request::ReadInputRegisters { addr, count } => {
            if !pdu::validate_read_registers_count(count) {
                return exception(request.function_code(), DeviceStatus::IllegalValue);
            }
            let is_holding = matches!(request, Request::ReadHoldingRegisters { .. });
            match read_registers_into(device, read_scratch, addr, count, is_holding) {
                Ok(()) => Response::ReadRegisters { payload: read_scratch },
                Err(status) => exception(request.function_code(), status),
            }
        }
        Request::WriteSingleCoil { addr, value } => match device.write_coil(addr, value) {
            Ok(()) => Response::WriteSingleCoil { addr, value },
            Err(status) => exception(request.function_code(), status),
        },
        Request::WriteSingleRegister { addr, value } => match device.write_holding(addr, value) {
            Ok(()) => Response::WriteSingleRegister { addr, value },
            Err(status) => exception(request.function_code(), status),
        },
        Request::WriteMultipleCoils { addr, count, payload } => {
            if !pdu::validate_write_coils_count(count) {
                return exception(request.function_code(), DeviceStatus::IllegalValue);
            }
            for i in 0..count {
                let bit = get_bit(payload, i as usize);
                if let Err(status) = device.write_coil(addr.wrapping_add(i), bit) {
                    return exception(request.function_code(), status);
                }
            }
            Response::WriteMultiple { addr, count }
        }
        Request::WriteMultipleRegisters { addr, count, payload } => {
            if !pdu::validate_write_registers_count(count) {
                return exception(request.function_code(), DeviceStatus::IllegalValue);
            }
            for i in 0..count {
                let value = get_u16_be(payload, i as usize * 2);
                if let Err(status) = device.write_holding(addr.wrapping_add(i), value) {
                    return exception(request.function_code(), status);
                }
            }
            Response::WriteMultiple { addr, count }
        }
        Request::MaskWriteRegister { addr, and_mask, or_mask } => {
            let current = match device.read_holding(addr) {
                Ok(v) => v,
                Err(status) => return exception(request.function_code(), status),
            };
            let new_value = (current & and_mask) | (or_mask & !and_mask);
            if let Err(status) = device.write_holding(addr, new_value) {
                return exception(request.function_code(), status);
            }
            Response::MaskWriteRegister { addr, and_mask, or_mask }
        }
        Request::ReadWriteMultipleRegisters {
            read_addr,
            read_count,
            write_addr,
            write_count,
            payload,
        } => {
            if !pdu::validate_read_write_counts(read_count, write_count) {
                return exception(request.function_code(), DeviceStatus::IllegalValue);
            }
            for i in 0..write_count {
                let value = get_u16_be(payload, i as usize * 2);
                if let Err(status) = device.write_holding(write_addr.wrapping_add(i), value) {
                    return exception(request.function_code(), status);
                }
            }
            match read_registers_into(device, read_scratch, read_addr, read_count, true) {
                Ok(()) => Response::ReadRegisters { payload: read_scratch },
                Err(status) => exception(request.function_code(), status),
            }
        }
    }
}

fn read_registers_into(
    device: &Arc<dyn SlaveDevice>,
    read_scratch: &mut Vec<u8>,
    addr: u16,
    count: u16,
    holding: bool,
) -> Result<(), DeviceStatus> {
    read_scratch.clear();
    read_scratch.resize(count as usize * 2, 0);
    for i in 0..count {
        let a = addr.wrapping_add(i);
        let value = if holding { device.read_holding(a) } else { device.read_input(a) }?;
        put_u16_be(read_scratch, i as usize * 2, value);
    }
    Ok(())
}

fn exception(function: u8, status: DeviceStatus) -> Response<'static> {
    Response::Exception { function, code: status.exception_code() }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::transport::mock::MockTransport;

    struct MapDevice {
        holding: Mutex<std::collections::HashMap<u16, u16>>,
        coils: Mutex<std::collections::HashMap<u16, bool>>,
    }

    impl MapDevice {
        fn new() -> Self {
            Self { holding: Mutex::new(Default::default()), coils: Mutex::new(Default::default()) }
        }
    }

    impl SlaveDevice for MapDevice {
        fn read_discrete(&self, addr: u16) -> Result<bool, DeviceStatus> {
            self.read_coil(addr)
        }

        fn read_coil(&self, addr: u16) -> Result<bool, DeviceStatus> {
            Ok(*self.coils.lock().unwrap().get(&addr).unwrap_or(&false))
        }

        fn write_coil(&self, addr: u16, value: bool) -> Result<(), DeviceStatus> {
            self.coils.lock().unwrap().insert(addr, value);
            Ok(())
        }

        fn read_input(&self, addr: u16) -> Result<u16, DeviceStatus> {
            self.read_holding(addr)
        }

        fn read_holding(&self, addr: u16) -> Result<u16, DeviceStatus> {
            Ok(*self.holding.lock().unwrap().get(&addr).unwrap_or(&0))
        }

        fn write_holding(&self, addr: u16, value: u16) -> Result<(), DeviceStatus> {
            if addr == 0xFFFF {
                return Err(DeviceStatus::IllegalAddress);
            }
            self.holding.lock().unwrap().insert(addr, value);
            Ok(())
        }
    }

    fn frame_with_crc(bytes: &[u8]) -> Vec<u8> {
        let mut out = bytes.to_vec();
        let crc = crate::crc::crc16(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    #[tokio::test]
    async fn scenario_1_rtu_read_holding_responds() {
        let device = Arc::new(MapDevice::new());
        device.holding.lock().unwrap().insert(0x006B, 0xAE41);
        device.holding.lock().unwrap().insert(0x006C, 0x5652);
        device.holding.lock().unwrap().insert(0x006D, 0x4340);

        let mut t = MockTransport::default();
        t.push(frame_with_crc(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]));

        let mut engine = SlaveEngine::new_rtu(t, 0x11, device);
        let outcome = engine.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Responded);
        assert_eq!(
            engine.transport.written,
            vec![0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40, 0x49, 0xAD]
        );
    }

    #[tokio::test]
    async fn write_single_coil_echoes_request() {
        let device = Arc::new(MapDevice::new());
        let mut t = MockTransport::default();
        t.push(frame_with_crc(&[0x11, 0x05, 0x00, 0xAC, 0xFF, 0x00]));
        let mut engine = SlaveEngine::new_rtu(t, 0x11, device.clone());
        let outcome = engine.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Responded);
        assert_eq!(engine.transport.written, vec![0x11, 0x05, 0x00, 0xAC, 0xFF, 0x00, 0x4E, 0x8B]);
        assert!(device.read_coil(0x00AC).unwrap());
    }

    #[tokio::test]
    async fn unaddressed_frame_is_dropped_silently() {
        let device = Arc::new(MapDevice::new());
        let mut t = MockTransport::default();
        t.push(frame_with_crc(&[0x12, 0x03, 0x00, 0x6B, 0x00, 0x03]));
        let mut engine = SlaveEngine::new_rtu(t, 0x11, device);
        let outcome = engine.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Dropped);
        assert!(engine.transport.written.is_empty());
    }

    #[tokio::test]
    async fn broadcast_write_produces_no_response() {
        let device = Arc::new(MapDevice::new());
        let mut t = MockTransport::default();
        t.push(frame_with_crc(&[0x00, 0x05, 0x00, 0xAC, 0xFF, 0x00]));
        let mut engine = SlaveEngine::new_rtu(t, 0x11, device.clone());
        let outcome = engine.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Broadcast);
        assert!(engine.transport.written.is_empty());
        assert!(device.read_coil(0x00AC).unwrap());
    }

    #[tokio::test]
    async fn illegal_value_count_is_rejected_with_exception() {
        let device = Arc::new(MapDevice::new());
        let mut t = MockTransport::default();
        t.push(frame_with_crc(&[0x11, 0x03, 0x00, 0x00, 0x00, 0x00]));
        let mut engine = SlaveEngine::new_rtu(t, 0x11, device);
        let outcome = engine.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Responded);
        assert_eq!(engine.transport.written[1], 0x83);
        assert_eq!(engine.transport.written[2], 0x03);
    }

    #[tokio::test]
    async fn write_multiple_coils_with_wrong_byte_count_gets_exception_not_silence() {
        let device = Arc::new(MapDevice::new());
        let mut t = MockTransport::default();
        // Function 0x0F, addr 0x0013, quantity 10 (needs ceil(10/8) = 2 payload
        // bytes) but byte-count field says 1: declared length is inconsistent.
        t.push(frame_with_crc(&[0x11, 0x0F, 0x00, 0x13, 0x00, 0x0A, 0x01, 0xFF]));
        let mut engine = SlaveEngine::new_rtu(t, 0x11, device);
        let outcome = engine.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Responded);
        assert_eq!(engine.transport.written[1], 0x0F | 0x80);
        assert_eq!(engine.transport.written[2], 0x03);
    }

    #[tokio::test]
    async fn idle_tick_with_no_bytes_returns_idle() {
        let device = Arc::new(MapDevice::new());
        let t = MockTransport::default();
        let mut engine = SlaveEngine::new_rtu(t, 0x11, device)
            .with_timeouts(Duration::from_millis(15), Duration::from_millis(5));
        let outcome = engine.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Idle);
    }

    #[tokio::test]
    async fn tcp_read_holding_responds_with_matching_transaction_id() {
        let device = Arc::new(MapDevice::new());
        device.holding.lock().unwrap().insert(0x006B, 0xAE41);
        device.holding.lock().unwrap().insert(0x006C, 0x5652);
        device.holding.lock().unwrap().insert(0x006D, 0x4340);

        let mut t = MockTransport::default();
        t.push(vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]);
        let mut engine = SlaveEngine::new_tcp(t, 0x11, device);
        let outcome = engine.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Responded);
        assert_eq!(
            engine.transport.written,
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x09, 0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40]
        );
    }
}
