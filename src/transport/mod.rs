//! Transport abstraction: a uniform `send_frame`/`recv_frame` over either
//! SLIP-framed serial or a BLE GATT control/data channel pair (spec §4.2,
//! §9). Modeled as a trait with two concrete implementations — a sum type,
//! not an inheritance hierarchy — so the object transfer procedure never
//! inspects which variant it's driving except through the methods below.

pub mod ble;
pub mod serial;

use std::time::Duration;

use crate::error::DfuError;
use crate::messages::OperationCode;

/// One logical request/response transport. Exactly one instance exists per
/// upgrade run, owned exclusively by the engine (spec §5).
pub trait Transport {
    /// Send one logical message. On BLE this dispatches `OBJECT_WRITE` to
    /// the data characteristic and everything else to the control
    /// characteristic; on serial every call is one SLIP-framed write.
    fn send_frame(&mut self, op: OperationCode, payload: &[u8]) -> Result<(), DfuError>;

    /// Block for one complete device frame or fail. `timeout` is the
    /// caller's per-request deadline (longer for `OBJECT_EXECUTE`, spec §5).
    /// `for_op` is the opcode of the pending request, used only to label a
    /// timeout error; it is not otherwise interpreted by the transport.
    fn recv_frame(&mut self, for_op: OperationCode, timeout: Duration) -> Result<Vec<u8>, DfuError>;

    /// Cause the device to switch into bootloader mode.
    fn enter_dfu(&mut self) -> Result<(), DfuError>;

    /// Establish the session MTU: serial queries the device (`MTU_GET`),
    /// BLE fixes (or negotiates) the ATT MTU. Returns the raw value as
    /// reported/assumed; the caller stores it in `Session::mtu`.
    fn set_mtu(&mut self) -> Result<u16, DfuError>;

    /// Largest `OBJECT_WRITE` payload this transport can carry in one
    /// packet: `(mtu - 1) / 2 - 1` on serial to leave room for the opcode
    /// byte and worst-case SLIP doubling, or the negotiated ATT MTU (up to
    /// 244) on BLE.
    fn write_chunk_size(&self) -> usize;
}
