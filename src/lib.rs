//! Upgrade engine for the Nordic Secure DFU bootloader, over serial or BLE.
//!
//! This crate owns the protocol: framing, the request/response wire format,
//! chunked object transfer with resume, and transport selection. CLI
//! parsing, logging setup, and packaging the `.zip` itself are the binary's
//! job (`src/bin/main.rs`).

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod messages;
pub mod object_transfer;
pub mod session;
pub mod slip;
pub mod transport;
pub mod zip_file;

pub use config::{BleAddressType, Config, DfuType};
pub use error::{DfuError, UpgradeOutcome};

use transport::ble::BleTransport;
use transport::serial::SerialTransport;
use transport::Transport;

/// Run one firmware upgrade: read `package_path` as a DFU `.zip`, connect
/// via whichever transport `config` selects, and transfer the init packet
/// and firmware image.
pub fn run(config: &Config, package_path: &str) -> Result<UpgradeOutcome, DfuError> {
    let (dat, mut bin) = zip_file::read_zip_file(package_path)?;

    // The firmware image must be padded with 0xFF to a multiple of 4 bytes;
    // undocumented, but required by the bootloader.
    while bin.len() % 4 != 0 {
        bin.push(0xFF);
    }

    let mut transport: Box<dyn Transport> = match config.dfu_type {
        DfuType::Serial => Box::new(SerialTransport::open(config)?),
        DfuType::Ble => Box::new(BleTransport::connect(config)?),
    };

    driver::run_upgrade(transport.as_mut(), config, &dat, &bin)
}
