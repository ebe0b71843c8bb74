//! Error taxonomy for the DFU engine.
//!
//! `DfuError` is the single error type returned by fallible engine
//! operations. `FW_VERSION_FAILURE` is deliberately *not* a `DfuError`
//! variant: the engine surfaces it as `UpgradeOutcome::FirmwareTooOld`
//! instead, since callers typically treat it as "already up to date" rather
//! than a failure (spec §4.8, §7).

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::messages::OperationCode;

/// One-byte protocol result code (spec §3).
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ResultCode {
    Invalid = 0x00,
    Success = 0x01,
    OpCodeNotSupported = 0x02,
    InvalidParameter = 0x03,
    InsufficientResources = 0x04,
    InvalidObject = 0x05,
    UnsupportedType = 0x07,
    OperationNotPermitted = 0x08,
    OperationFailed = 0x0A,
    ExtError = 0x0B,
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultCode::Invalid => "invalid opcode",
            ResultCode::Success => "operation successful",
            ResultCode::OpCodeNotSupported => "opcode not supported",
            ResultCode::InvalidParameter => "missing or invalid parameter value",
            ResultCode::InsufficientResources => "not enough memory for the data object",
            ResultCode::InvalidObject => {
                "data object does not match the firmware/hardware requirements, \
                 the signature is wrong, or parsing the command failed"
            }
            ResultCode::UnsupportedType => "not a valid object type for a create request",
            ResultCode::OperationNotPermitted => {
                "the state of the DFU process does not allow this operation"
            }
            ResultCode::OperationFailed => "operation failed",
            ResultCode::ExtError => "extended error",
        };
        f.write_str(s)
    }
}

/// Extended error code, valid only when `ResultCode::ExtError` is returned
/// (spec §3). Table from `nrf_dfu_handling_error.h` via the original C
/// implementation's `dfu_ext_err_str`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ExtErrorCode {
    NoError = 0x00,
    InvalidErrorCode = 0x01,
    WrongCommandFormat = 0x02,
    UnknownCommand = 0x03,
    InitCommandInvalid = 0x04,
    FwVersionFailure = 0x05,
    HwVersionFailure = 0x06,
    SdVersionFailure = 0x07,
    SignatureMissing = 0x08,
    WrongHashType = 0x09,
    HashFailed = 0x0A,
    WrongSignatureType = 0x0B,
    VerificationFailed = 0x0C,
    InsufficientSpace = 0x0D,
}

impl fmt::Display for ExtErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtErrorCode::NoError => "no extended error code has been set",
            ExtErrorCode::InvalidErrorCode => "invalid error code",
            ExtErrorCode::WrongCommandFormat => "the format of the command was incorrect",
            ExtErrorCode::UnknownCommand => {
                "the command was successfully parsed, but it is not supported or unknown"
            }
            ExtErrorCode::InitCommandInvalid => {
                "the init command is invalid or missing required fields for the update type"
            }
            ExtErrorCode::FwVersionFailure => {
                "the firmware version is too low; downgrades are not permitted"
            }
            ExtErrorCode::HwVersionFailure => {
                "the hardware version of the device does not match the required hardware \
                 version for the update"
            }
            ExtErrorCode::SdVersionFailure => {
                "the array of supported SoftDevices for the update does not contain the \
                 FWID of the current SoftDevice"
            }
            ExtErrorCode::SignatureMissing => "the init packet does not contain a signature",
            ExtErrorCode::WrongHashType => {
                "the hash type specified by the init packet is not supported by the bootloader"
            }
            ExtErrorCode::HashFailed => "the hash of the firmware image cannot be calculated",
            ExtErrorCode::WrongSignatureType => {
                "the type of the signature is unknown or not supported by the bootloader"
            }
            ExtErrorCode::VerificationFailed => {
                "the hash of the received firmware image does not match the hash in the \
                 init packet"
            }
            ExtErrorCode::InsufficientSpace => {
                "the available space on the device is insufficient to hold the firmware"
            }
        };
        f.write_str(s)
    }
}

/// A protocol-level violation: the response didn't even reach the point of
/// carrying a device result code (spec §4.4, §4.7).
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame is not a RESPONSE (first byte != 0x60)")]
    NoResponse,
    #[error("response echo 0x{got:02x} does not match pending request 0x{expected:02x}")]
    Mismatch { expected: u8, got: u8 },
}

/// The engine's single error type. Everything except `FW_VERSION_FAILURE`
/// folds into this (spec §4.8, §7).
#[derive(Debug, thiserror::Error)]
pub enum DfuError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for a response to {op:?}")]
    Timeout { op: OperationCode },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("response truncated before the expected payload")]
    Truncated,

    #[error("unknown result code 0x{0:02x}")]
    UnknownResult(u8),

    #[error("device reported {0} at a point the protocol should have permitted it")]
    DeviceBusy(ResultCode),

    #[error("device rejected the request: {0}")]
    Rejected(ResultCode),

    #[error("extended device error: {0}")]
    ExtError(ExtErrorCode),

    #[error("CRC mismatch: expected 0x{expected:08x}, device reported 0x{got:08x}")]
    CrcMismatch { expected: u32, got: u32 },

    #[error("unsupported bootloader protocol version {0} (expected {1})")]
    UnsupportedProtocolVersion(u8, u8),

    #[error("SLIP framing error: {0}")]
    Framing(&'static str),

    #[error("DFU package error: {0}")]
    Package(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<zip::result::ZipError> for DfuError {
    fn from(e: zip::result::ZipError) -> Self {
        DfuError::Package(e.to_string())
    }
}

impl From<serde_json::Error> for DfuError {
    fn from(e: serde_json::Error) -> Self {
        DfuError::Package(format!("invalid manifest.json: {e}"))
    }
}

/// Top-level outcome of a full upgrade run (spec §7).
///
/// `Error` in spec.md's three-valued framing is simply `Err(DfuError)`; the
/// two success-shaped outcomes are represented here.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UpgradeOutcome {
    /// The package was transferred and executed.
    Success,
    /// The device rejected the firmware with `EXT_ERROR / FW_VERSION_FAILURE`.
    /// Callers typically report this as "already up to date" and exit 0.
    FirmwareTooOld,
}

/// Outcome of a single `OBJECT_EXECUTE` (spec §4.5 step 4, §4.8).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum ExecuteOutcome {
    Committed,
    FirmwareTooOld,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_code_display_strings_are_pinned() {
        expect_test::expect!["the state of the DFU process does not allow this operation"]
            .assert_eq(&ResultCode::OperationNotPermitted.to_string());
    }

    #[test]
    fn ext_error_display_strings_are_pinned() {
        expect_test::expect!["the firmware version is too low; downgrades are not permitted"]
            .assert_eq(&ExtErrorCode::FwVersionFailure.to_string());
    }
}
