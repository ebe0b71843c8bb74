//! Wire layout for DFU requests and responses (spec §3, §4.3, §4.4).
//!
//! Every integer on the wire is little-endian; packing is explicit byte
//! manipulation throughout, never host-dependent struct layout.

use byteorder::{ByteOrder, LittleEndian};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{DfuError, ExtErrorCode, ProtocolError, ResultCode};

/// One-byte operation tag (spec §3).
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum OperationCode {
    ProtocolVersion = 0x01,
    ObjectCreate = 0x02,
    ReceiptNotifSet = 0x03,
    CrcGet = 0x04,
    ObjectExecute = 0x05,
    ObjectSelect = 0x06,
    MtuGet = 0x07,
    ObjectWrite = 0x08,
    Ping = 0x09,
    HardwareVersion = 0x0A,
    FirmwareVersion = 0x0B,
    Abort = 0x0C,
    Response = 0x60,
    Invalid = 0xFF,
}

/// Object type for `OBJECT_SELECT`/`OBJECT_CREATE` (spec §3).
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ObjectType {
    Command = 1,
    Data = 2,
}

/// A typed response payload, parsed from the bytes following the result
/// code in a `RESPONSE` frame. Trailing bytes beyond what a variant expects
/// are ignored; too few is a [`DfuError::Truncated`] (spec §4.4).
pub trait ResponsePayload: Sized {
    fn parse(bytes: &[u8]) -> Result<Self, DfuError>;
}

impl ResponsePayload for () {
    fn parse(_bytes: &[u8]) -> Result<Self, DfuError> {
        Ok(())
    }
}

/// A request variant: its opcode, its wire payload, and the response shape
/// it expects back.
pub trait Request {
    const OPCODE: OperationCode;
    type Response: ResponsePayload;

    /// Append this request's payload bytes (little-endian, no padding).
    fn write_payload(&self, buf: &mut Vec<u8>);

    /// Exact wire size of this request (opcode byte + payload).
    fn wire_size(&self) -> usize {
        let mut buf = Vec::new();
        self.write_payload(&mut buf);
        1 + buf.len()
    }

    /// Encode this request to `(opcode_byte, payload_and_opcode_bytes)`.
    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![Self::OPCODE.into()];
        self.write_payload(&mut buf);
        buf
    }
}

/// Exact wire size for opcodes with a fixed-length payload, independent of
/// any particular request instance. Returns 0 for unknown or
/// variable-length opcodes (`OBJECT_WRITE`), which callers must reject
/// before sending (spec §4.3).
pub fn fixed_wire_size(op: OperationCode) -> usize {
    match op {
        OperationCode::ProtocolVersion => 1,
        OperationCode::ObjectCreate => 1 + 1 + 4,
        OperationCode::ReceiptNotifSet => 1 + 2,
        OperationCode::CrcGet => 1,
        OperationCode::ObjectExecute => 1,
        OperationCode::ObjectSelect => 1 + 1,
        OperationCode::MtuGet => 1,
        OperationCode::ObjectWrite => 0,
        OperationCode::Ping => 1 + 1,
        OperationCode::HardwareVersion => 1,
        OperationCode::FirmwareVersion => 1 + 1,
        OperationCode::Abort => 1,
        OperationCode::Response | OperationCode::Invalid => 0,
    }
}

// --- Requests ---------------------------------------------------------

pub struct ProtocolVersionRequest;
impl Request for ProtocolVersionRequest {
    const OPCODE: OperationCode = OperationCode::ProtocolVersion;
    type Response = VersionResponse;
    fn write_payload(&self, _buf: &mut Vec<u8>) {}
}

pub struct ObjectCreateRequest {
    pub obj_type: ObjectType,
    pub size: u32,
}
impl Request for ObjectCreateRequest {
    const OPCODE: OperationCode = OperationCode::ObjectCreate;
    type Response = ();
    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.push(self.obj_type.into());
        let mut le = [0u8; 4];
        LittleEndian::write_u32(&mut le, self.size);
        buf.extend_from_slice(&le);
    }
}

pub struct SetPrnRequest {
    pub target: u16,
}
impl Request for SetPrnRequest {
    const OPCODE: OperationCode = OperationCode::ReceiptNotifSet;
    type Response = ();
    fn write_payload(&self, buf: &mut Vec<u8>) {
        let mut le = [0u8; 2];
        LittleEndian::write_u16(&mut le, self.target);
        buf.extend_from_slice(&le);
    }
}

pub struct CrcGetRequest;
impl Request for CrcGetRequest {
    const OPCODE: OperationCode = OperationCode::CrcGet;
    type Response = CrcResponse;
    fn write_payload(&self, _buf: &mut Vec<u8>) {}
}

pub struct ObjectExecuteRequest;
impl Request for ObjectExecuteRequest {
    const OPCODE: OperationCode = OperationCode::ObjectExecute;
    type Response = ();
    fn write_payload(&self, _buf: &mut Vec<u8>) {}
}

pub struct ObjectSelectRequest {
    pub obj_type: ObjectType,
}
impl Request for ObjectSelectRequest {
    const OPCODE: OperationCode = OperationCode::ObjectSelect;
    type Response = SelectResponse;
    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.push(self.obj_type.into());
    }
}

pub struct MtuGetRequest;
impl Request for MtuGetRequest {
    const OPCODE: OperationCode = OperationCode::MtuGet;
    type Response = MtuResponse;
    fn write_payload(&self, _buf: &mut Vec<u8>) {}
}

/// `OBJECT_WRITE`'s payload is the raw chunk bytes, up to `MTU - 1` of
/// them. No response is expected per write packet (spec §4.5 step 2); this
/// type exists for wire-size bookkeeping and symmetry with other requests.
pub struct WriteRequest<'a> {
    pub data: &'a [u8],
}
impl<'a> Request for WriteRequest<'a> {
    const OPCODE: OperationCode = OperationCode::ObjectWrite;
    type Response = ();
    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.data);
    }
}

pub struct PingRequest {
    pub id: u8,
}
impl Request for PingRequest {
    const OPCODE: OperationCode = OperationCode::Ping;
    type Response = PingResponse;
    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.push(self.id);
    }
}

pub struct HardwareVersionRequest;
impl Request for HardwareVersionRequest {
    const OPCODE: OperationCode = OperationCode::HardwareVersion;
    type Response = RawResponse;
    fn write_payload(&self, _buf: &mut Vec<u8>) {}
}

pub struct FirmwareVersionRequest {
    pub image: u8,
}
impl Request for FirmwareVersionRequest {
    const OPCODE: OperationCode = OperationCode::FirmwareVersion;
    type Response = RawResponse;
    fn write_payload(&self, buf: &mut Vec<u8>) {
        buf.push(self.image);
    }
}

pub struct AbortRequest;
impl Request for AbortRequest {
    const OPCODE: OperationCode = OperationCode::Abort;
    type Response = ();
    fn write_payload(&self, _buf: &mut Vec<u8>) {}
}

// --- Responses ----------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct VersionResponse {
    pub version: u8,
}
impl ResponsePayload for VersionResponse {
    fn parse(bytes: &[u8]) -> Result<Self, DfuError> {
        let version = *bytes.first().ok_or(DfuError::Truncated)?;
        Ok(VersionResponse { version })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CrcResponse {
    pub offset: u32,
    pub crc: u32,
}
impl ResponsePayload for CrcResponse {
    fn parse(bytes: &[u8]) -> Result<Self, DfuError> {
        if bytes.len() < 8 {
            return Err(DfuError::Truncated);
        }
        Ok(CrcResponse {
            offset: LittleEndian::read_u32(&bytes[0..4]),
            crc: LittleEndian::read_u32(&bytes[4..8]),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SelectResponse {
    pub max_size: u32,
    pub offset: u32,
    pub crc: u32,
}
impl ResponsePayload for SelectResponse {
    fn parse(bytes: &[u8]) -> Result<Self, DfuError> {
        if bytes.len() < 12 {
            return Err(DfuError::Truncated);
        }
        Ok(SelectResponse {
            max_size: LittleEndian::read_u32(&bytes[0..4]),
            offset: LittleEndian::read_u32(&bytes[4..8]),
            crc: LittleEndian::read_u32(&bytes[8..12]),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MtuResponse {
    pub size: u16,
}
impl ResponsePayload for MtuResponse {
    fn parse(bytes: &[u8]) -> Result<Self, DfuError> {
        if bytes.len() < 2 {
            return Err(DfuError::Truncated);
        }
        Ok(MtuResponse {
            size: LittleEndian::read_u16(&bytes[0..2]),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PingResponse {
    pub id: u8,
}
impl ResponsePayload for PingResponse {
    fn parse(bytes: &[u8]) -> Result<Self, DfuError> {
        let id = *bytes.first().ok_or(DfuError::Truncated)?;
        Ok(PingResponse { id })
    }
}

/// Payload for response variants spec.md does not give a fixed layout for
/// (`HARDWARE_VERSION`, `FIRMWARE_VERSION`). The engine doesn't act on
/// these beyond logging them, so they're surfaced as opaque bytes.
#[derive(Debug, Clone)]
pub struct RawResponse(pub Vec<u8>);
impl ResponsePayload for RawResponse {
    fn parse(bytes: &[u8]) -> Result<Self, DfuError> {
        Ok(RawResponse(bytes.to_vec()))
    }
}

/// Validate and parse a received frame against the request that's pending
/// (spec §4.4):
/// 1. First byte must be `RESPONSE`.
/// 2. Second byte (echo) must match the pending request's opcode.
/// 3. Third byte is the result code; `SUCCESS` parses the remaining bytes
///    as `R::Response`, `EXT_ERROR` surfaces the extended code, anything
///    else is a rejection.
pub fn parse_response<R: Request>(frame: &[u8]) -> Result<R::Response, DfuError> {
    if frame.first().copied() != Some(OperationCode::Response.into()) {
        return Err(DfuError::Protocol(ProtocolError::NoResponse));
    }
    if frame.len() < 3 {
        return Err(DfuError::Truncated);
    }
    let echo = frame[1];
    let expected: u8 = R::OPCODE.into();
    if echo != expected {
        return Err(DfuError::Protocol(ProtocolError::Mismatch {
            expected,
            got: echo,
        }));
    }

    let result =
        ResultCode::try_from(frame[2]).map_err(|_| DfuError::UnknownResult(frame[2]))?;
    match result {
        ResultCode::Success => R::Response::parse(&frame[3..]),
        ResultCode::ExtError => {
            let ext = *frame.get(3).ok_or(DfuError::Truncated)?;
            let ext_code =
                ExtErrorCode::try_from(ext).unwrap_or(ExtErrorCode::InvalidErrorCode);
            Err(DfuError::ExtError(ext_code))
        }
        ResultCode::OperationNotPermitted => Err(DfuError::DeviceBusy(result)),
        other => Err(DfuError::Rejected(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_create_encodes_type_and_le_size() {
        let req = ObjectCreateRequest {
            obj_type: ObjectType::Data,
            size: 0x0102_0304,
        };
        let encoded = req.encode();
        assert_eq!(encoded, vec![0x02, 0x02, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(req.wire_size(), fixed_wire_size(OperationCode::ObjectCreate));
    }

    #[test]
    fn ping_round_trips() {
        let req = PingRequest { id: 0x2a };
        let encoded = req.encode();
        assert_eq!(encoded, vec![0x09, 0x2a]);

        let mut frame = vec![OperationCode::Response.into(), 0x09, ResultCode::Success.into()];
        frame.push(0x2a);
        let resp = parse_response::<PingRequest>(&frame).unwrap();
        assert_eq!(resp.id, 0x2a);
    }

    #[test]
    fn select_response_round_trips() {
        let mut frame = vec![
            OperationCode::Response.into(),
            OperationCode::ObjectSelect.into(),
            ResultCode::Success.into(),
        ];
        frame.extend_from_slice(&100u32.to_le_bytes());
        frame.extend_from_slice(&50u32.to_le_bytes());
        frame.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());

        let resp = parse_response::<ObjectSelectRequest>(&frame).unwrap();
        assert_eq!(resp.max_size, 100);
        assert_eq!(resp.offset, 50);
        assert_eq!(resp.crc, 0xDEAD_BEEF);
    }

    #[test]
    fn mismatched_echo_is_a_protocol_error() {
        let frame = vec![
            OperationCode::Response.into(),
            OperationCode::CrcGet.into(),
            ResultCode::Success.into(),
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
        ];
        let err = parse_response::<ObjectSelectRequest>(&frame).unwrap_err();
        assert!(matches!(
            err,
            DfuError::Protocol(ProtocolError::Mismatch { .. })
        ));
    }

    #[test]
    fn non_response_first_byte_is_rejected() {
        let frame = vec![0x01, 0x06, 0x01];
        let err = parse_response::<ObjectSelectRequest>(&frame).unwrap_err();
        assert!(matches!(err, DfuError::Protocol(ProtocolError::NoResponse)));
    }

    #[test]
    fn ext_error_surfaces_fw_version_failure() {
        let frame = vec![
            OperationCode::Response.into(),
            OperationCode::ObjectExecute.into(),
            ResultCode::ExtError.into(),
            ExtErrorCode::FwVersionFailure.into(),
        ];
        let err = parse_response::<ObjectExecuteRequest>(&frame).unwrap_err();
        assert!(matches!(
            err,
            DfuError::ExtError(ExtErrorCode::FwVersionFailure)
        ));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let frame = vec![
            OperationCode::Response.into(),
            OperationCode::CrcGet.into(),
            ResultCode::Success.into(),
            1,
            2,
            3,
        ];
        let err = parse_response::<CrcGetRequest>(&frame).unwrap_err();
        assert!(matches!(err, DfuError::Truncated));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut frame = vec![
            OperationCode::Response.into(),
            OperationCode::MtuGet.into(),
            ResultCode::Success.into(),
        ];
        frame.extend_from_slice(&244u16.to_le_bytes());
        frame.extend_from_slice(&[0xAA, 0xBB, 0xCC]); // trailing garbage
        let resp = parse_response::<MtuGetRequest>(&frame).unwrap();
        assert_eq!(resp.size, 244);
    }
}
