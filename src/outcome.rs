//! Sum-typed result of a master call (spec §9 "Negative error codes vs.
//! result types"): replaces the reference C API's overloaded integer return
//! (count / 0-for-timeout / negative exception code) with a proper enum.

use crate::errors::RelayError;

/// Modbus exception code as carried by an exception response PDU (spec §4.1
/// / §7): 0x01 illegal function through 0x0B gateway target failed to
/// respond.
pub type ExceptionCode = u8;

/// The outcome of one master-engine call.
#[derive(Debug)]
pub enum ModbusOutcome<T> {
    /// The call succeeded and produced `T` (a count, or unit for a
    /// single-value write).
    Ok(T),
    /// No response arrived before the response-timeout.
    Timeout,
    /// The response failed to frame or parse (short frame, bad CRC, MBAP
    /// mismatch, transaction-id mismatch, or a PDU-level parse failure).
    /// The transport is left open: framing errors are not transport faults.
    Framing(RelayError),
    /// The transport itself failed (read/write error). The instance has
    /// already closed the transport; the next call will reopen it.
    Transport(RelayError),
    /// The slave replied with an exception response.
    Exception(ExceptionCode),
}

impl<T> ModbusOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, ModbusOutcome::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            ModbusOutcome::Ok(v) => Some(v),
            _ => None,
        }
    }

    /// Bridges to the reference library's overloaded-integer contract, for
    /// callers that mirror it (e.g. an FFI boundary). Only meaningful when
    /// `T` is itself a count; callers working with richer `T` should match
    /// on the enum directly instead.
    pub fn as_legacy_code(&self) -> i32
    where
        T: TryInto<i32> + Copy,
    {
        match self {
            ModbusOutcome::Ok(v) => (*v).try_into().unwrap_or(0),
            ModbusOutcome::Timeout => 0,
            ModbusOutcome::Framing(_) => 0,
            ModbusOutcome::Transport(_) => -1,
            ModbusOutcome::Exception(code) => -(*code as i32),
        }
    }
}
