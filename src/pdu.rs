//! Protocol Data Unit: the part of a Modbus frame that is shared by RTU and
//! TCP, everything the frame wrappers in [`crate::frame`] carry after their
//! own address/header fields.

use crate::byte_codec::{get_u16_be, packed_bit_len, put_u16_be};

pub const FC_READ_COILS: u8 = 0x01;
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
pub const FC_MASK_WRITE_REGISTER: u8 = 0x16;
pub const FC_READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;

const EXCEPTION_BIT: u8 = 0x80;

/// Why a PDU failed to parse. Distinguishes a short/malformed frame (the
/// master reports this as a timeout-like 0, the slave drops it silently)
/// from an unsupported function code (reported as exception 0x01).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PduError {
    #[error("PDU shorter than required for its function code")]
    TooShort,
    #[error("function code {0:#04X} is not implemented")]
    UnsupportedFunction(u8),
    #[error("write byte count does not match the declared quantity")]
    InconsistentLength,
    #[error("response function code {actual:#04X} does not match request function code {expected:#04X}")]
    FunctionMismatch { expected: u8, actual: u8 },
}

/// A parsed Modbus request. Payload-carrying variants borrow directly from
/// the caller's frame buffer; the borrow checker enforces that the frame
/// buffer outlives any use of the parsed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    ReadCoils { addr: u16, count: u16 },
    ReadDiscreteInputs { addr: u16, count: u16 },
    ReadHoldingRegisters { addr: u16, count: u16 },
    ReadInputRegisters { addr: u16, count: u16 },
    WriteSingleCoil { addr: u16, value: bool },
    WriteSingleRegister { addr: u16, value: u16 },
    WriteMultipleCoils { addr: u16, count: u16, payload: &'a [u8] },
    WriteMultipleRegisters { addr: u16, count: u16, payload: &'a [u8] },
    MaskWriteRegister { addr: u16, and_mask: u16, or_mask: u16 },
    ReadWriteMultipleRegisters {
        read_addr: u16,
        read_count: u16,
        write_addr: u16,
        write_count: u16,
        payload: &'a [u8],
    },
}

impl<'a> Request<'a> {
    pub fn function_code(&self) -> u8 {
        match self {
            Request::ReadCoils { .. } => FC_READ_COILS,
            Request::ReadDiscreteInputs { .. } => FC_READ_DISCRETE_INPUTS,
            Request::ReadHoldingRegisters { .. } => FC_READ_HOLDING_REGISTERS,
            Request::ReadInputRegisters { .. } => FC_READ_INPUT_REGISTERS,
            Request::WriteSingleCoil { .. } => FC_WRITE_SINGLE_COIL,
            Request::WriteSingleRegister { .. } => FC_WRITE_SINGLE_REGISTER,
            Request::WriteMultipleCoils { .. } => FC_WRITE_MULTIPLE_COILS,
            Request::WriteMultipleRegisters { .. } => FC_WRITE_MULTIPLE_REGISTERS,
            Request::MaskWriteRegister { .. } => FC_MASK_WRITE_REGISTER,
            Request::ReadWriteMultipleRegisters { .. } => FC_READ_WRITE_MULTIPLE_REGISTERS,
        }
    }
}

/// A parsed Modbus response, or the exception variant any request can draw
/// in reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response<'a> {
    ReadBits { payload: &'a [u8] },
    ReadRegisters { payload: &'a [u8] },
    WriteSingleCoil { addr: u16, value: bool },
    WriteSingleRegister { addr: u16, value: u16 },
    WriteMultiple { addr: u16, count: u16 },
    MaskWriteRegister { addr: u16, and_mask: u16, or_mask: u16 },
    Exception { function: u8, code: u8 },
}

/// Writes `req` as a PDU into `out` (which is cleared first).
pub fn make_request(req: &Request<'_>, out: &mut Vec<u8>) {
    out.clear();
    out.push(req.function_code());
    match *req {
        Request::ReadCoils { addr, count }
        | Request::ReadDiscreteInputs { addr, count }
        | Request::ReadHoldingRegisters { addr, count }
        | Request::ReadInputRegisters { addr, count } => {
            push_u16(out, addr);
            push_u16(out, count);
        }
        Request::WriteSingleCoil { addr, value } => {
            push_u16(out, addr);
            push_u16(out, if value { 0xFF00 } else { 0x0000 });
        }
        Request::WriteSingleRegister { addr, value } => {
            push_u16(out, addr);
            push_u16(out, value);
        }
        Request::WriteMultipleCoils { addr, count, payload } => {
            push_u16(out, addr);
            push_u16(out, count);
            out.push(payload.len() as u8);
            out.extend_from_slice(payload);
        }
        Request::WriteMultipleRegisters { addr, count, payload } => {
            push_u16(out, addr);
            push_u16(out, count);
            out.push(payload.len() as u8);
            out.extend_from_slice(payload);
        }
        Request::MaskWriteRegister { addr, and_mask, or_mask } => {
            push_u16(out, addr);
            push_u16(out, and_mask);
            push_u16(out, or_mask);
        }
        Request::ReadWriteMultipleRegisters {
            read_addr,
            read_count,
            write_addr,
            write_count,
            payload,
        } => {
            push_u16(out, read_addr);
            push_u16(out, read_count);
            push_u16(out, write_addr);
            push_u16(out, write_count);
            out.push(payload.len() as u8);
            out.extend_from_slice(payload);
        }
    }
}

/// Parses a request PDU from `buf`. Returns `PduError::TooShort` on a short
/// frame and `PduError::UnsupportedFunction` for an unrecognised code.
pub fn parse_request(buf: &[u8]) -> Result<Request<'_>, PduError> {
    if buf.is_empty() {
        return Err(PduError::TooShort);
    }
    let fc = buf[0];
    match fc {
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS | FC_READ_HOLDING_REGISTERS
        | FC_READ_INPUT_REGISTERS => {
            require_len(buf, 5)?;
            let addr = get_u16_be(buf, 1);
            let count = get_u16_be(buf, 3);
            Ok(match fc {
                FC_READ_COILS => Request::ReadCoils { addr, count },
                FC_READ_DISCRETE_INPUTS => Request::ReadDiscreteInputs { addr, count },
                FC_READ_HOLDING_REGISTERS => Request::ReadHoldingRegisters { addr, count },
                _ => Request::ReadInputRegisters { addr, count },
            })
        }
        FC_WRITE_SINGLE_COIL => {
            require_len(buf, 5)?;
            let addr = get_u16_be(buf, 1);
            let raw = get_u16_be(buf, 3);
            Ok(Request::WriteSingleCoil { addr, value: raw == 0xFF00 })
        }
        FC_WRITE_SINGLE_REGISTER => {
            require_len(buf, 5)?;
            Ok(Request::WriteSingleRegister {
                addr: get_u16_be(buf, 1),
                value: get_u16_be(buf, 3),
            })
        }
        FC_WRITE_MULTIPLE_COILS | FC_WRITE_MULTIPLE_REGISTERS => {
            require_len(buf, 6)?;
            let addr = get_u16_be(buf, 1);
            let count = get_u16_be(buf, 3);
            let byte_count = buf[5] as usize;
            require_len(buf, 6 + byte_count)?;
            let payload = &buf[6..6 + byte_count];
            if fc == FC_WRITE_MULTIPLE_COILS {
                if byte_count != packed_bit_len(count) {
                    return Err(PduError::InconsistentLength);
                }
                Ok(Request::WriteMultipleCoils { addr, count, payload })
            } else {
                if byte_count != count as usize * 2 {
                    return Err(PduError::InconsistentLength);
                }
                Ok(Request::WriteMultipleRegisters { addr, count, payload })
            }
        }
        FC_MASK_WRITE_REGISTER => {
            require_len(buf, 7)?;
            Ok(Request::MaskWriteRegister {
                addr: get_u16_be(buf, 1),
                and_mask: get_u16_be(buf, 3),
                or_mask: get_u16_be(buf, 5),
            })
        }
        FC_READ_WRITE_MULTIPLE_REGISTERS => {
            require_len(buf, 10)?;
            let read_addr = get_u16_be(buf, 1);
            let read_count = get_u16_be(buf, 3);
            let write_addr = get_u16_be(buf, 5);
            let write_count = get_u16_be(buf, 7);
            let byte_count = buf[9] as usize;
            require_len(buf, 10 + byte_count)?;
            if byte_count != write_count as usize * 2 {
                return Err(PduError::InconsistentLength);
            }
            Ok(Request::ReadWriteMultipleRegisters {
                read_addr,
                read_count,
                write_addr,
                write_count,
                payload: &buf[10..10 + byte_count],
            })
        }
        other => Err(PduError::UnsupportedFunction(other)),
    }
}

/// Writes `resp` (for the given request function code) as a PDU into `out`.
pub fn make_response(resp: &Response<'_>, request_fc: u8, out: &mut Vec<u8>) {
    out.clear();
    match *resp {
        Response::Exception { function, code } => {
            out.push(function | EXCEPTION_BIT);
            out.push(code);
        }
        Response::ReadBits { payload } => {
            out.push(request_fc);
            out.push(payload.len() as u8);
            out.extend_from_slice(payload);
        }
        Response::ReadRegisters { payload } => {
            out.push(request_fc);
            out.push(payload.len() as u8);
            out.extend_from_slice(payload);
        }
        Response::WriteSingleCoil { addr, value } => {
            out.push(request_fc);
            push_u16(out, addr);
            push_u16(out, if value { 0xFF00 } else { 0x0000 });
        }
        Response::WriteSingleRegister { addr, value } => {
            out.push(request_fc);
            push_u16(out, addr);
            push_u16(out, value);
        }
        Response::WriteMultiple { addr, count } => {
            out.push(request_fc);
            push_u16(out, addr);
            push_u16(out, count);
        }
        Response::MaskWriteRegister { addr, and_mask, or_mask } => {
            out.push(request_fc);
            push_u16(out, addr);
            push_u16(out, and_mask);
            push_u16(out, or_mask);
        }
    }
}

/// Parses a response PDU. `request_fc` is the function code of the request
/// this is a reply to, used only to sanity-check non-exception replies
/// against the shape the caller expects.
pub fn parse_response<'a>(buf: &'a [u8], request_fc: u8) -> Result<Response<'a>, PduError> {
    if buf.is_empty() {
        return Err(PduError::TooShort);
    }
    let fc = buf[0];
    if fc & EXCEPTION_BIT != 0 {
        require_len(buf, 2)?;
        let exception_function = fc & !EXCEPTION_BIT;
        if exception_function != request_fc {
            return Err(PduError::FunctionMismatch { expected: request_fc, actual: exception_function });
        }
        return Ok(Response::Exception { function: exception_function, code: buf[1] });
    }
    if fc != request_fc {
        return Err(PduError::FunctionMismatch { expected: request_fc, actual: fc });
    }
    match request_fc {
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS => {
            require_len(buf, 2)?;
            let byte_count = buf[1] as usize;
            require_len(buf, 2 + byte_count)?;
            Ok(Response::ReadBits { payload: &buf[2..2 + byte_count] })
        }
        FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS | FC_READ_WRITE_MULTIPLE_REGISTERS => {
            require_len(buf, 2)?;
            let byte_count = buf[1] as usize;
            require_len(buf, 2 + byte_count)?;
            Ok(Response::ReadRegisters { payload: &buf[2..2 + byte_count] })
        }
        FC_WRITE_SINGLE_COIL => {
            require_len(buf, 5)?;
            let raw = get_u16_be(buf, 3);
            Ok(Response::WriteSingleCoil { addr: get_u16_be(buf, 1), value: raw == 0xFF00 })
        }
        FC_WRITE_SINGLE_REGISTER => {
            require_len(buf, 5)?;
            Ok(Response::WriteSingleRegister {
                addr: get_u16_be(buf, 1),
                value: get_u16_be(buf, 3),
            })
        }
        FC_WRITE_MULTIPLE_COILS | FC_WRITE_MULTIPLE_REGISTERS => {
            require_len(buf, 5)?;
            Ok(Response::WriteMultiple { addr: get_u16_be(buf, 1), count: get_u16_be(buf, 3) })
        }
        FC_MASK_WRITE_REGISTER => {
            require_len(buf, 7)?;
            Ok(Response::MaskWriteRegister {
                addr: get_u16_be(buf, 1),
                and_mask: get_u16_be(buf, 3),
                or_mask: get_u16_be(buf, 5),
            })
        }
        other => Err(PduError::UnsupportedFunction(other)),
    }
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn require_len(buf: &[u8], min: usize) -> Result<(), PduError> {
    if buf.len() < min {
        Err(PduError::TooShort)
    } else {
        Ok(())
    }
}

/// Count-range checks from spec §4.1 / §8, applied by the slave before
/// dispatch and usable by a master that wants to fail fast.
pub fn validate_read_bits_count(count: u16) -> bool {
    (1..=2000).contains(&count)
}

pub fn validate_read_registers_count(count: u16) -> bool {
    (1..=125).contains(&count)
}

pub fn validate_write_coils_count(count: u16) -> bool {
    (1..=1968).contains(&count)
}

pub fn validate_write_registers_count(count: u16) -> bool {
    (1..=123).contains(&count)
}

pub fn validate_read_write_counts(read_count: u16, write_count: u16) -> bool {
    (1..=125).contains(&read_count) && (1..=121).contains(&write_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_parse_round_trip_read_holding_request() {
        let req = Request::ReadHoldingRegisters { addr: 0x006B, count: 3 };
        let mut buf = Vec::new();
        make_request(&req, &mut buf);
        assert_eq!(buf, [0x03, 0x00, 0x6B, 0x00, 0x03]);
        assert_eq!(parse_request(&buf).unwrap(), req);
    }

    #[test]
    fn make_parse_round_trip_write_single_coil() {
        let req = Request::WriteSingleCoil { addr: 0x00AC, value: true };
        let mut buf = Vec::new();
        make_request(&req, &mut buf);
        assert_eq!(buf, [0x05, 0x00, 0xAC, 0xFF, 0x00]);
        assert_eq!(parse_request(&buf).unwrap(), req);
    }

    #[test]
    fn parse_read_holding_response() {
        let buf = [0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40];
        let resp = parse_response(&buf, FC_READ_HOLDING_REGISTERS).unwrap();
        assert_eq!(resp, Response::ReadRegisters { payload: &buf[2..] });
    }

    #[test]
    fn parse_exception_response() {
        let buf = [0x83, 0x02];
        let resp = parse_response(&buf, FC_READ_HOLDING_REGISTERS).unwrap();
        assert_eq!(resp, Response::Exception { function: 0x03, code: 0x02 });
    }

    #[test]
    fn response_function_code_must_match_request() {
        let buf = [0x06, 0x00, 0x6B, 0x00, 0x03];
        assert_eq!(
            parse_response(&buf, FC_READ_HOLDING_REGISTERS),
            Err(PduError::FunctionMismatch { expected: FC_READ_HOLDING_REGISTERS, actual: 0x06 })
        );
    }

    #[test]
    fn exception_function_must_match_request() {
        let buf = [0x86, 0x02];
        assert_eq!(
            parse_response(&buf, FC_READ_HOLDING_REGISTERS),
            Err(PduError::FunctionMismatch { expected: FC_READ_HOLDING_REGISTERS, actual: 0x06 })
        );
    }

    #[test]
    fn short_request_is_too_short() {
        assert_eq!(parse_request(&[0x03, 0x00]), Err(PduError::TooShort));
    }

    #[test]
    fn unknown_function_code_is_unsupported() {
        assert_eq!(parse_request(&[0x42]), Err(PduError::UnsupportedFunction(0x42)));
    }

    #[test]
    fn write_multiple_coils_bad_byte_count_is_inconsistent() {
        // count=9 needs ceil(9/8)=2 bytes, only 1 given
        let buf = [0x0F, 0x00, 0x00, 0x00, 0x09, 0x01, 0xFF];
        assert_eq!(parse_request(&buf), Err(PduError::InconsistentLength));
    }

    #[test]
    fn count_ranges() {
        assert!(validate_read_bits_count(1));
        assert!(validate_read_bits_count(2000));
        assert!(!validate_read_bits_count(0));
        assert!(!validate_read_bits_count(2001));
        assert!(validate_read_registers_count(125));
        assert!(!validate_read_registers_count(126));
    }
}
