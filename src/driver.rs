//! Upgrade orchestration: enter bootloader mode, negotiate the session, then
//! transfer the init packet followed by the firmware image (spec §4.6).
//!
//! Grounded in `original_source/dfu.c`'s `dfu_upgrade`/`dfu_bootloader_enter`
//! (protocol-version gate before anything else, PRN disabled for every
//! transport since both serial and BLE are reliable here) and the teacher's
//! `BootloaderConnection::new`/`run` (MTU fetch right after connecting,
//! hardware/protocol version logged at debug level).

use std::io::Cursor;

use crate::config::Config;
use crate::engine::Link;
use crate::error::{DfuError, UpgradeOutcome};
use crate::messages::{
    HardwareVersionRequest, ObjectType, ProtocolVersionRequest, SetPrnRequest,
};
use crate::object_transfer::{self, TransferOutcome};
use crate::session::Session;
use crate::transport::Transport;

/// Bootloader protocol version this engine speaks (spec §4.6).
const PROTOCOL_VERSION: u8 = 1;

/// Run one full upgrade: enter the bootloader, negotiate MTU and protocol
/// version, disable receipt notifications, then transfer `dat` as the
/// command object and `bin` as the data object.
pub fn run_upgrade(
    transport: &mut dyn Transport,
    config: &Config,
    dat: &[u8],
    bin: &[u8],
) -> Result<UpgradeOutcome, DfuError> {
    transport.enter_dfu()?;

    let mut session = Session::new();
    session.mtu = transport.set_mtu()?;
    log::debug!("negotiated MTU = {} bytes", session.mtu);

    let mut link = Link::new(transport, config.timeout_default, config.timeout_execute);

    // The protocol version must be checked before anything else: every
    // other request's wire layout is defined relative to it.
    let version = link.request(ProtocolVersionRequest)?.version;
    if version != PROTOCOL_VERSION {
        return Err(DfuError::UnsupportedProtocolVersion(version, PROTOCOL_VERSION));
    }

    let hw_version = link.request(HardwareVersionRequest)?;
    log::debug!("hardware version response: {:?}", hw_version.0);

    // Both transports are reliable (USB serial, or a connection-oriented
    // BLE link); there's nothing useful for receipt notifications to do.
    link.request(SetPrnRequest { target: 0 })?;

    log::info!("sending init packet ({} bytes)", dat.len());
    let mut dat_cursor = Cursor::new(dat);
    let init_outcome = object_transfer::transfer(
        &mut link,
        &mut session,
        ObjectType::Command,
        &mut dat_cursor,
        dat.len() as u32,
    )?;
    if init_outcome == TransferOutcome::FirmwareTooOld {
        return Ok(UpgradeOutcome::FirmwareTooOld);
    }

    log::info!("sending firmware image ({} bytes)", bin.len());
    let mut bin_cursor = Cursor::new(bin);
    let data_outcome = object_transfer::transfer(
        &mut link,
        &mut session,
        ObjectType::Data,
        &mut bin_cursor,
        bin.len() as u32,
    )?;

    match data_outcome {
        TransferOutcome::Done => {
            log::info!("upgrade complete");
            Ok(UpgradeOutcome::Success)
        }
        TransferOutcome::FirmwareTooOld => Ok(UpgradeOutcome::FirmwareTooOld),
    }
}
