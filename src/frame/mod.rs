//! Frame wrappers: the address/header and trailer that turn a PDU into
//! something a transport can put on the wire.

#[cfg(feature = "rtu-protocol")]
pub mod rtu;
#[cfg(feature = "tcp-protocol")]
pub mod tcp;

/// Outcome of parsing a received frame, mirroring the legacy C return
/// convention this crate's `ModbusOutcome` re-architects (spec §9): a
/// positive PDU length, 0 for a short/malformed frame, or an unsupported
/// function code surfaced separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameParseError {
    /// Frame too short to contain a valid header/trailer.
    TooShort,
    /// Declared length field disagrees with the bytes actually present.
    LengthMismatch,
    /// RTU CRC did not validate.
    CrcMismatch,
    /// TCP protocol id was non-zero, or (strict mode) unit id mismatched.
    InvalidHeader,
    /// The PDU itself did not parse (short or unsupported function code).
    Pdu(crate::pdu::PduError),
}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameParseError::TooShort => write!(f, "frame too short"),
            FrameParseError::LengthMismatch => write!(f, "frame length does not match header"),
            FrameParseError::CrcMismatch => write!(f, "CRC check failed"),
            FrameParseError::InvalidHeader => write!(f, "invalid frame header"),
            FrameParseError::Pdu(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for FrameParseError {}

impl From<crate::pdu::PduError> for FrameParseError {
    fn from(e: crate::pdu::PduError) -> Self {
        FrameParseError::Pdu(e)
    }
}
