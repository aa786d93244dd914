//! Master engine (spec §4.6): issues requests over a [`Transport`] and
//! returns a [`ModbusOutcome`] per call, driving the RTU/TCP frame wrappers
//! and the PDU codec underneath.

use std::time::Duration;

use crate::byte_codec::{get_bit, get_u16_be, pack_bits};
use crate::errors::{FrameErrorKind, RelayError};
use crate::frame::{self, FrameParseError};
use crate::outcome::ModbusOutcome;
use crate::pdu::{self, PduError, Request, Response};
use crate::transport::{self, FramingOutcome, Transport};

/// RTU broadcast address (spec §4.6): a request to this slave address draws
/// no reply, and a master call against it returns success immediately after
/// the write.
pub use crate::frame::rtu::BROADCAST_ADDRESS;

const MAX_FRAME_LEN: usize = 260;

enum Protocol {
    Rtu { slave_address: u8 },
    Tcp { unit_id: u8, next_transaction_id: u16 },
}

/// A master engine bound to one transport and one addressing scheme.
///
/// Not `Sync` by convention (spec §5): the scratch buffers and transport
/// handle are only safe to touch from the task driving this instance. Share
/// it behind a mutex, or give each task its own.
pub struct Instance<T: Transport> {
    transport: T,
    protocol: Protocol,
    response_timeout: Duration,
    inter_byte_timeout: Duration,
    pdu_scratch: Vec<u8>,
    frame_scratch: Vec<u8>,
    response_buf: Vec<u8>,
    opened: bool,
}

/// Owned copy of a parsed response, detached from the frame buffer it was
/// parsed out of so it can outlive the next call's reuse of that buffer.
enum Owned {
    Bits(Vec<bool>),
    Registers(Vec<u16>),
    WriteSingleCoil { value: bool },
    WriteSingleRegister { value: u16 },
    WriteMultiple { count: u16 },
    MaskWriteRegister,
}

impl<T: Transport> Instance<T> {
    pub fn new_rtu(transport: T, slave_address: u8) -> Self {
        Self::with_protocol(transport, Protocol::Rtu { slave_address })
    }

    pub fn new_tcp(transport: T, unit_id: u8) -> Self {
        Self::with_protocol(transport, Protocol::Tcp { unit_id, next_transaction_id: 0 })
    }

    fn with_protocol(transport: T, protocol: Protocol) -> Self {
        Self {
            transport,
            protocol,
            response_timeout: transport::DEFAULT_RESPONSE_TIMEOUT,
            inter_byte_timeout: transport::DEFAULT_INTER_BYTE_TIMEOUT,
            pdu_scratch: Vec::with_capacity(MAX_FRAME_LEN),
            frame_scratch: Vec::with_capacity(MAX_FRAME_LEN),
            response_buf: vec![0u8; MAX_FRAME_LEN],
            opened: false,
        }
    }

    pub fn with_timeouts(mut self, response_timeout: Duration, inter_byte_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self.inter_byte_timeout = inter_byte_timeout;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn read_coils(&mut self, addr: u16, count: u16) -> ModbusOutcome<Vec<bool>> {
        if !pdu::validate_read_bits_count(count) {
            return ModbusOutcome::Exception(0x03);
        }
        self.execute(Request::ReadCoils { addr, count }).await.map_bits()
    }

    pub async fn read_discrete_inputs(&mut self, addr: u16, count: u16) -> ModbusOutcome<Vec<bool>> {
        if !pdu::validate_read_bits_count(count) {
            return ModbusOutcome::Exception(0x03);
        }
        self.execute(Request::ReadDiscreteInputs { addr, count }).await.map_bits()
    }

    pub async fn read_holding_registers(&mut self, addr: u16, count: u16) -> ModbusOutcome<Vec<u16>> {
        if !pdu::validate_read_registers_count(count) {
            return ModbusOutcome::Exception(0x03);
        }
        self.execute(Request::ReadHoldingRegisters { addr, count }).await.map_registers()
    }

    pub async fn read_input_registers(&mut self, addr: u16, count: u16) -> ModbusOutcome<Vec<u16>> {
        if !pdu::validate_read_registers_count(count) {
            return ModbusOutcome::Exception(0x03);
        }
        self.execute(Request::ReadInputRegisters { addr, count }).await.map_registers()
    }

    pub async fn write_single_coil(&mut self, addr: u16, value: bool) -> ModbusOutcome<()> {
        self.execute(Request::WriteSingleCoil { addr, value }).await.map_unit()
    }

    pub async fn write_single_register(&mut self, addr: u16, value: u16) -> ModbusOutcome<()> {
        self.execute(Request::WriteSingleRegister { addr, value }).await.map_unit()
    }

    pub async fn write_multiple_coils(&mut self, addr: u16, values: &[bool]) -> ModbusOutcome<u16> {
        let count = values.len() as u16;
        if !pdu::validate_write_coils_count(count) {
            return ModbusOutcome::Exception(0x03);
        }
        let mut payload = vec![0u8; crate::byte_codec::packed_bit_len(count)];
        pack_bits(values, &mut payload);
        self.execute(Request::WriteMultipleCoils { addr, count, payload: &payload }).await.map_count()
    }

    pub async fn write_multiple_registers(&mut self, addr: u16, values: &[u16]) -> ModbusOutcome<u16> {
        let count = values.len() as u16;
        if !pdu::validate_write_registers_count(count) {
            return ModbusOutcome::Exception(0x03);
        }
        let mut payload = vec![0u8; count as usize * 2];
        for (i, value) in values.iter().enumerate() {
            crate::byte_codec::put_u16_be(&mut payload, i * 2, *value);
        }
        self.execute(Request::WriteMultipleRegisters { addr, count, payload: &payload }).await.map_count()
    }

    pub async fn mask_write_register(
        &mut self,
        addr: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> ModbusOutcome<()> {
        self.execute(Request::MaskWriteRegister { addr, and_mask, or_mask }).await.map_unit()
    }

    pub async fn read_write_multiple_registers(
        &mut self,
        read_addr: u16,
        read_count: u16,
        write_addr: u16,
        write_values: &[u16],
    ) -> ModbusOutcome<Vec<u16>> {
        let write_count = write_values.len() as u16;
        if !pdu::validate_read_write_counts(read_count, write_count) {
            return ModbusOutcome::Exception(0x03);
        }
        let mut payload = vec![0u8; write_count as usize * 2];
        for (i, value) in write_values.iter().enumerate() {
            crate::byte_codec::put_u16_be(&mut payload, i * 2, *value);
        }
        self.execute(Request::ReadWriteMultipleRegisters {
            read_addr,
            read_count,
            write_addr,
            write_count,
            payload: &payload,
        })
        .await
        .map_registers()
    }

    /// The procedure from spec §4.6: flush, build PDU, wrap frame, write,
    /// read, parse, verify, return. Broadcast short-circuits after the
    /// write; transport faults close the transport so the next call reopens
    /// it.
    async fn execute(&mut self, request: Request<'_>) -> ModbusOutcome<Owned> {
        let request_fc = request.function_code();

        if !self.opened {
            if let Err(e) = self.transport.open().await {
                return ModbusOutcome::Transport(e);
            }
            self.opened = true;
        }

        if let Err(e) = self.transport.flush().await {
            self.close().await;
            return ModbusOutcome::Transport(e);
        }

        pdu::make_request(&request, &mut self.pdu_scratch);

        let is_broadcast = match &self.protocol {
            Protocol::Rtu { slave_address } => *slave_address == BROADCAST_ADDRESS,
            Protocol::Tcp { .. } => false,
        };

        let transaction_id = match &mut self.protocol {
            Protocol::Rtu { slave_address } => {
                frame::rtu::encode(*slave_address, &self.pdu_scratch, &mut self.frame_scratch);
                None
            }
            Protocol::Tcp { unit_id, next_transaction_id } => {
                let txn = *next_transaction_id;
                *next_transaction_id = next_transaction_id.wrapping_add(1);
                frame::tcp::encode(txn, *unit_id, &self.pdu_scratch, &mut self.frame_scratch);
                Some(txn)
            }
        };

        if let Err(e) = self.transport.write(&self.frame_scratch).await {
            self.close().await;
            return ModbusOutcome::Transport(e);
        }

        if is_broadcast {
            return ModbusOutcome::Ok(Owned::WriteMultiple { count: 0 });
        }

        let outcome =
            match transport::read_framed(
                &mut self.transport,
                &mut self.response_buf,
                self.response_timeout,
                self.inter_byte_timeout,
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.close().await;
                    return ModbusOutcome::Transport(e);
                }
            };

        let n = match outcome {
            FramingOutcome::Timeout => return ModbusOutcome::Timeout,
            FramingOutcome::Frame(n) => n,
        };

        let frame = &self.response_buf[..n];

        let pdu_bytes = match &self.protocol {
            Protocol::Rtu { .. } => match frame::rtu::decode(frame) {
                Ok(decoded) => decoded.pdu,
                Err(e) => return ModbusOutcome::Framing(frame_parse_error(e)),
            },
            Protocol::Tcp { .. } => match frame::tcp::decode(frame) {
                Ok(decoded) => {
                    if Some(decoded.transaction_id) != transaction_id {
                        return ModbusOutcome::Framing(frame_parse_error(FrameParseError::InvalidHeader));
                    }
                    decoded.pdu
                }
                Err(e) => return ModbusOutcome::Framing(frame_parse_error(e)),
            },
        };

        match pdu::parse_response(pdu_bytes, request_fc) {
            Ok(Response::Exception { code, .. }) => ModbusOutcome::Exception(code),
            Ok(response) => match verify_echo(&request, &response) {
                Ok(()) => ModbusOutcome::Ok(to_owned(response)),
                Err(e) => ModbusOutcome::Framing(e),
            },
            Err(e) => ModbusOutcome::Framing(pdu_parse_error(e)),
        }
    }

    async fn close(&mut self) {
        let _ = self.transport.close().await;
        self.opened = false;
    }
}

fn to_owned(response: Response<'_>) -> Owned {
    match response {
        Response::ReadBits { payload } => {
            let bits = (0..payload.len() * 8).map(|i| get_bit(payload, i)).collect();
            Owned::Bits(bits)
        }
        Response::ReadRegisters { payload } => {
            let regs = (0..payload.len() / 2).map(|i| get_u16_be(payload, i * 2)).collect();
            Owned::Registers(regs)
        }
        Response::WriteSingleCoil { value, .. } => Owned::WriteSingleCoil { value },
        Response::WriteSingleRegister { value, .. } => Owned::WriteSingleRegister { value },
        Response::WriteMultiple { count, .. } => Owned::WriteMultiple { count },
        Response::MaskWriteRegister { .. } => Owned::MaskWriteRegister,
        Response::Exception { .. } => unreachable!("exceptions are mapped before to_owned is called"),
    }
}

fn frame_parse_error(e: FrameParseError) -> RelayError {
    match e {
        FrameParseError::TooShort => RelayError::frame(FrameErrorKind::TooShort, e.to_string(), None),
        FrameParseError::LengthMismatch => {
            RelayError::frame(FrameErrorKind::InvalidFormat, e.to_string(), None)
        }
        FrameParseError::CrcMismatch => {
            RelayError::frame(FrameErrorKind::InvalidCrc, e.to_string(), None)
        }
        FrameParseError::InvalidHeader => {
            RelayError::frame(FrameErrorKind::InvalidHeader, e.to_string(), None)
        }
        FrameParseError::Pdu(pdu_err) => pdu_parse_error(pdu_err),
    }
}

fn pdu_parse_error(e: PduError) -> RelayError {
    RelayError::frame(FrameErrorKind::InvalidFormat, e.to_string(), None)
}

/// Verifies the echoed address/value/count fields a response carries back
/// against what was actually sent (spec §4.6: "verify echoed function code,
/// address, and count where applicable"). The function code itself is
/// already checked by [`pdu::parse_response`]; this covers the rest.
fn verify_echo(request: &Request<'_>, response: &Response<'_>) -> Result<(), RelayError> {
    let mismatch = match (request, response) {
        (Request::WriteSingleCoil { addr, value }, Response::WriteSingleCoil { addr: a, value: v }) => {
            addr != a || value != v
        }
        (
            Request::WriteSingleRegister { addr, value },
            Response::WriteSingleRegister { addr: a, value: v },
        ) => addr != a || value != v,
        (
            Request::WriteMultipleCoils { addr, count, .. },
            Response::WriteMultiple { addr: a, count: c },
        ) => addr != a || count != c,
        (
            Request::WriteMultipleRegisters { addr, count, .. },
            Response::WriteMultiple { addr: a, count: c },
        ) => addr != a || count != c,
        (
            Request::MaskWriteRegister { addr, and_mask, or_mask },
            Response::MaskWriteRegister { addr: a, and_mask: am, or_mask: om },
        ) => addr != a || and_mask != am || or_mask != om,
        // Read-only responses (and the read half of read-write-multiple) carry
        // no echoed address/count, only a payload; nothing to verify here.
        _ => false,
    };

    if mismatch {
        Err(RelayError::frame(
            FrameErrorKind::InvalidFormat,
            "response echoed address/value/count does not match the request",
            None,
        ))
    } else {
        Ok(())
    }
}

impl ModbusOutcome<Owned> {
    fn map_bits(self) -> ModbusOutcome<Vec<bool>> {
        match self {
            ModbusOutcome::Ok(Owned::Bits(bits)) => ModbusOutcome::Ok(bits),
            other => other.retag(),
        }
    }

    fn map_registers(self) -> ModbusOutcome<Vec<u16>> {
        match self {
            ModbusOutcome::Ok(Owned::Registers(regs)) => ModbusOutcome::Ok(regs),
            other => other.retag(),
        }
    }

    fn map_unit(self) -> ModbusOutcome<()> {
        match self {
            ModbusOutcome::Ok(_) => ModbusOutcome::Ok(()),
            other => other.retag(),
        }
    }

    fn map_count(self) -> ModbusOutcome<u16> {
        match self {
            ModbusOutcome::Ok(Owned::WriteMultiple { count }) => ModbusOutcome::Ok(count),
            other => other.retag(),
        }
    }

    /// Re-tags a non-`Ok` outcome to a different `T`; panics if called on
    /// `Ok` with a payload shape the caller didn't expect (a parser/dispatch
    /// bug, not a reachable runtime condition).
    fn retag<U>(self) -> ModbusOutcome<U> {
        match self {
            ModbusOutcome::Ok(_) => panic!("unexpected response shape for this request"),
            ModbusOutcome::Timeout => ModbusOutcome::Timeout,
            ModbusOutcome::Framing(e) => ModbusOutcome::Framing(e),
            ModbusOutcome::Transport(e) => ModbusOutcome::Transport(e),
            ModbusOutcome::Exception(code) => ModbusOutcome::Exception(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn crc_ok_frame(bytes: &[u8]) -> Vec<u8> {
        let mut out = bytes.to_vec();
        let crc = crate::crc::crc16(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    #[tokio::test]
    async fn scenario_1_rtu_read_holding() {
        let mut t = MockTransport::default();
        t.push(crc_ok_frame(&[0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40]));
        let mut instance = Instance::new_rtu(t, 0x11);
        let outcome = instance.read_holding_registers(0x006B, 3).await;
        match outcome {
            ModbusOutcome::Ok(regs) => assert_eq!(regs, vec![0xAE41, 0x5652, 0x4340]),
            _ => panic!("expected Ok"),
        }
        assert_eq!(
            instance.transport().written,
            vec![0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87]
        );
    }

    #[tokio::test]
    async fn scenario_2_rtu_exception() {
        let mut t = MockTransport::default();
        t.push(crc_ok_frame(&[0x11, 0x83, 0x02]));
        let mut instance = Instance::new_rtu(t, 0x11);
        let outcome = instance.read_holding_registers(0x006B, 3).await;
        assert!(matches!(outcome, ModbusOutcome::Exception(0x02)));
    }

    #[tokio::test]
    async fn scenario_3_rtu_write_single_coil() {
        let mut t = MockTransport::default();
        t.push(crc_ok_frame(&[0x11, 0x05, 0x00, 0xAC, 0xFF, 0x00]));
        let mut instance = Instance::new_rtu(t, 0x11);
        let outcome = instance.write_single_coil(0x00AC, true).await;
        assert!(matches!(outcome, ModbusOutcome::Ok(())));
    }

    #[tokio::test]
    async fn scenario_4_rtu_crc_failure_returns_timeout_like_framing_error() {
        let mut t = MockTransport::default();
        t.push(vec![0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40, 0x00, 0x00]);
        let mut instance = Instance::new_rtu(t, 0x11);
        let outcome = instance.read_holding_registers(0x006B, 3).await;
        assert!(matches!(outcome, ModbusOutcome::Framing(_)));
    }

    #[tokio::test]
    async fn scenario_5_tcp_read_holding() {
        let mut t = MockTransport::default();
        t.push(vec![
            0x00, 0x01, 0x00, 0x00, 0x00, 0x09, 0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43,
            0x40,
        ]);
        let mut instance = Instance::new_tcp(t, 0x11);
        let outcome = instance.read_holding_registers(0x006B, 3).await;
        match outcome {
            ModbusOutcome::Ok(regs) => assert_eq!(regs, vec![0xAE41, 0x5652, 0x4340]),
            _ => panic!("expected Ok"),
        }
    }

    #[tokio::test]
    async fn scenario_6_tcp_transaction_id_mismatch() {
        let mut t = MockTransport::default();
        t.push(vec![
            0x00, 0x02, 0x00, 0x00, 0x00, 0x09, 0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43,
            0x40,
        ]);
        let mut instance = Instance::new_tcp(t, 0x11);
        let outcome = instance.read_holding_registers(0x006B, 3).await;
        assert!(matches!(outcome, ModbusOutcome::Framing(_)));
    }

    #[tokio::test]
    async fn broadcast_request_returns_ok_without_reading() {
        let t = MockTransport::default();
        let mut instance = Instance::new_rtu(t, BROADCAST_ADDRESS);
        let outcome = instance.write_single_coil(0x0000, true).await;
        assert!(matches!(outcome, ModbusOutcome::Ok(())));
    }

    #[tokio::test]
    async fn no_response_before_timeout_is_timeout_outcome() {
        let t = MockTransport::default();
        let mut instance =
            Instance::new_rtu(t, 0x11).with_timeouts(Duration::from_millis(20), Duration::from_millis(5));
        let outcome = instance.read_holding_registers(0x006B, 1).await;
        assert!(matches!(outcome, ModbusOutcome::Timeout));
    }

    #[tokio::test]
    async fn invalid_count_is_rejected_before_any_io() {
        let t = MockTransport::default();
        let mut instance = Instance::new_rtu(t, 0x11);
        let outcome = instance.read_holding_registers(0x0000, 0).await;
        assert!(matches!(outcome, ModbusOutcome::Exception(0x03)));
        assert!(instance.transport().written.is_empty());
    }

    #[tokio::test]
    async fn stray_response_with_wrong_function_code_is_a_framing_error() {
        // A 0x06 (write single register) reply to a 0x03 (read holding
        // registers) request: buf[1..2] happens to look like a plausible
        // byte-count/address pair, but the function code itself disagrees.
        let mut t = MockTransport::default();
        t.push(crc_ok_frame(&[0x11, 0x06, 0x00, 0x6B, 0x00, 0x03]));
        let mut instance = Instance::new_rtu(t, 0x11);
        let outcome = instance.read_holding_registers(0x006B, 3).await;
        assert!(matches!(outcome, ModbusOutcome::Framing(_)));
    }

    #[tokio::test]
    async fn echoed_address_mismatch_is_a_framing_error() {
        // Correct function code, but the echoed address does not match what
        // was actually written.
        let mut t = MockTransport::default();
        t.push(crc_ok_frame(&[0x11, 0x05, 0x00, 0xAD, 0xFF, 0x00]));
        let mut instance = Instance::new_rtu(t, 0x11);
        let outcome = instance.write_single_coil(0x00AC, true).await;
        assert!(matches!(outcome, ModbusOutcome::Framing(_)));
    }
}
