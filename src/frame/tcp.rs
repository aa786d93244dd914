//! TCP frame: MBAP header (transaction id, protocol id, length, unit id)
//! followed by the PDU.

use crate::byte_codec::{get_u16_be, put_u16_be};

use super::FrameParseError;

/// Largest MBAP-wrapped frame this crate will build or accept.
pub const MAX_FRAME_LEN: usize = 260;
const HEADER_LEN: usize = 7;

/// Builds an MBAP frame, appending it to `out` (cleared first). Returns the
/// total frame length.
pub fn encode(transaction_id: u16, unit_id: u8, pdu: &[u8], out: &mut Vec<u8>) -> usize {
    out.clear();
    out.resize(HEADER_LEN, 0);
    put_u16_be(out, 0, transaction_id);
    put_u16_be(out, 2, 0x0000);
    put_u16_be(out, 4, (1 + pdu.len()) as u16);
    out[6] = unit_id;
    out.extend_from_slice(pdu);
    out.len()
}

/// A parsed MBAP frame.
pub struct DecodedFrame<'a> {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub pdu: &'a [u8],
}

/// Parses `frame`. Rejects a mismatched protocol id and a declared length
/// that does not exactly bound the PDU present (spec §4.4). Unit-id
/// filtering is a separate, caller-side concern: see the `mbap-strict`
/// feature toggle's use in `slave::SlaveEngine::tick`.
pub fn decode(frame: &[u8]) -> Result<DecodedFrame<'_>, FrameParseError> {
    if frame.len() < HEADER_LEN + 1 {
        return Err(FrameParseError::TooShort);
    }
    let transaction_id = get_u16_be(frame, 0);
    let protocol_id = get_u16_be(frame, 2);
    if protocol_id != 0 {
        return Err(FrameParseError::InvalidHeader);
    }
    let length = get_u16_be(frame, 4) as usize;
    if length == 0 || length - 1 + HEADER_LEN != frame.len() {
        return Err(FrameParseError::LengthMismatch);
    }
    let unit_id = frame[6];
    Ok(DecodedFrame { transaction_id, unit_id, pdu: &frame[HEADER_LEN..] })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_matches_scenario_5() {
        let pdu = [0x03, 0x00, 0x6B, 0x00, 0x03];
        let mut out = Vec::new();
        let len = encode(0x0001, 0x11, &pdu, &mut out);
        assert_eq!(len, 12);
        assert_eq!(
            out,
            [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]
        );
    }

    #[test]
    fn decode_round_trip() {
        let pdu = [0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40];
        let mut out = Vec::new();
        encode(0x0001, 0x11, &pdu, &mut out);
        let decoded = decode(&out).unwrap();
        assert_eq!(decoded.transaction_id, 0x0001);
        assert_eq!(decoded.unit_id, 0x11);
        assert_eq!(decoded.pdu, &pdu);
    }

    #[test]
    fn bad_protocol_id_is_rejected() {
        let frame = [0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03];
        assert_eq!(decode(&frame), Err(FrameParseError::InvalidHeader));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let frame = [0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03];
        assert_eq!(decode(&frame), Err(FrameParseError::LengthMismatch));
    }

    #[test]
    fn too_short_is_rejected() {
        assert_eq!(decode(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x01]), Err(FrameParseError::TooShort));
    }
}
