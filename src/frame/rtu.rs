//! RTU frame: address (1) + PDU (N) + CRC-16 little-endian (2).

use crate::crc;

use super::FrameParseError;

/// Largest RTU frame this crate will build or accept.
pub const MAX_FRAME_LEN: usize = 256;
const MIN_FRAME_LEN: usize = 4;

/// The broadcast slave address (spec §4.6/§4.7): a request addressed here
/// draws no reply from any slave, and a master call against it returns
/// success immediately after the write.
pub const BROADCAST_ADDRESS: u8 = 0x00;

/// Builds an RTU frame from `address` and a pre-encoded PDU, appending it to
/// `out` (which is cleared first). Returns the total frame length.
pub fn encode(address: u8, pdu: &[u8], out: &mut Vec<u8>) -> usize {
    out.clear();
    out.push(address);
    out.extend_from_slice(pdu);
    let crc_value = crc::crc16(out);
    out.extend_from_slice(&crc_value.to_le_bytes());
    out.len()
}

/// A parsed RTU frame: the slave address plus the PDU slice, still inside
/// the caller's `frame` buffer (the CRC trailer is excluded).
pub struct DecodedFrame<'a> {
    pub address: u8,
    pub pdu: &'a [u8],
}

/// Parses `frame`, validating length and CRC. The caller is responsible for
/// any subsequent PDU-level parse.
pub fn decode(frame: &[u8]) -> Result<DecodedFrame<'_>, FrameParseError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(FrameParseError::TooShort);
    }
    if !crc::validate(frame) {
        return Err(FrameParseError::CrcMismatch);
    }
    let address = frame[0];
    let pdu = &frame[1..frame.len() - 2];
    Ok(DecodedFrame { address, pdu })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_matches_scenario_1() {
        let pdu = [0x03, 0x00, 0x6B, 0x00, 0x03];
        let mut out = Vec::new();
        let len = encode(0x11, &pdu, &mut out);
        assert_eq!(len, 8);
        assert_eq!(out, [0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87]);
    }

    #[test]
    fn decode_round_trip() {
        let pdu = [0x03, 0x00, 0x6B, 0x00, 0x03];
        let mut out = Vec::new();
        encode(0x11, &pdu, &mut out);
        let decoded = decode(&out).unwrap();
        assert_eq!(decoded.address, 0x11);
        assert_eq!(decoded.pdu, &pdu);
    }

    #[test]
    fn too_short_is_rejected() {
        assert_eq!(decode(&[0x11, 0x03, 0x00]), Err(FrameParseError::TooShort));
    }

    #[test]
    fn bad_crc_is_rejected() {
        let bytes = [0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40, 0x00, 0x00];
        assert_eq!(decode(&bytes), Err(FrameParseError::CrcMismatch));
    }

    #[test]
    fn minimal_four_byte_frame_is_accepted() {
        // address + 1-byte PDU + 2-byte CRC, exactly at the length floor.
        let mut out = Vec::new();
        encode(0x01, &[0x07], &mut out);
        assert_eq!(out.len(), 4);
        assert!(decode(&out).is_ok());
    }
}
