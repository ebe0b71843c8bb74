//! Runtime configuration recognized by the engine (spec §6).
//!
//! Field set and defaults are grounded in `original_source/conf.h`
//! (`struct config`, `enum DFU_TYPE`, `enum BLE_ATYPE`); this struct is
//! plain data, built by the CLI binary, never parsed or read from the
//! environment by the engine itself.

use std::time::Duration;

/// Selects which transport the engine drives.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DfuType {
    Serial,
    Ble,
}

/// BLE peer address kind.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BleAddressType {
    Public,
    Random,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub dfu_type: DfuType,

    // Serial options.
    pub serial_device: Option<String>,
    pub serial_baud: u32,
    /// Skip the DTR/RTS reset dance on USB-CDC-ACM devices that
    /// auto-reset when the port is opened.
    pub serial_cdc_acm: bool,

    // BLE options.
    pub ble_interface: Option<String>,
    pub ble_address: Option<String>,
    pub ble_address_type: BleAddressType,
    pub ble_passkey: Option<String>,

    // Timeouts.
    pub timeout_default: Duration,
    pub timeout_execute: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dfu_type: DfuType::Serial,
            serial_device: None,
            serial_baud: 115_200,
            serial_cdc_acm: false,
            ble_interface: None,
            ble_address: None,
            ble_address_type: BleAddressType::Public,
            ble_passkey: None,
            timeout_default: Duration::from_secs(1),
            timeout_execute: Duration::from_secs(10),
        }
    }
}
