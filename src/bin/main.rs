//! Command-line front end: argument parsing, logging setup, and serial
//! device auto-discovery are all out of scope for the engine itself (spec
//! §1), so they live here rather than in the library.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::LevelFilter;

use nrfdfu::{BleAddressType, Config, DfuError, DfuType, UpgradeOutcome};

/// Nordic's vendor ID, supplied by the default nRF52 bootloader. A custom
/// bootloader with a different VID won't be found by auto-discovery.
const NORDIC_BOOTLOADER_USB_VID: u16 = 0x1915;
const NORDIC_BOOTLOADER_USB_PID: u16 = 0x521f;

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum TransportArg {
    Serial,
    Ble,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum BleAddressTypeArg {
    Public,
    Random,
}

/// Upgrade a Nordic nRF5x device's firmware via the Secure DFU bootloader.
#[derive(Parser, Debug)]
#[command(name = "nrfdfu", version, about)]
struct Cli {
    /// Path to the DFU package (.zip produced by nrfutil/west).
    package: String,

    /// Transport to use to reach the bootloader.
    #[arg(long, value_enum, default_value_t = TransportArg::Serial)]
    dfu_type: TransportArg,

    /// Serial device path. Auto-detected by USB VID/PID if omitted.
    #[arg(long)]
    serial_device: Option<String>,

    #[arg(long, default_value_t = 115_200)]
    serial_baud: u32,

    /// Skip the DTR/RTS reset dance for devices that auto-reset into the
    /// bootloader on port open (USB-CDC-ACM).
    #[arg(long)]
    serial_cdc_acm: bool,

    /// BLE adapter name or substring to use, if more than one is present.
    #[arg(long)]
    ble_interface: Option<String>,

    /// BLE peer address of the application (pre-bootloader-entry) device.
    #[arg(long)]
    ble_address: Option<String>,

    #[arg(long, value_enum, default_value_t = BleAddressTypeArg::Public)]
    ble_address_type: BleAddressTypeArg,

    /// Passkey for a BLE bond that requires authenticated pairing.
    #[arg(long)]
    ble_passkey: Option<String>,

    #[arg(long, default_value_t = 1000)]
    timeout_default_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    timeout_execute_ms: u64,
}

fn main() {
    // Info and higher by default; override with `RUST_LOG`.
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    std::process::exit(match run(cli) {
        Ok(UpgradeOutcome::Success) => {
            log::info!("upgrade succeeded");
            0
        }
        Ok(UpgradeOutcome::FirmwareTooOld) => {
            log::info!("device already has this firmware version or newer; nothing to do");
            0
        }
        Err(DfuError::Config(msg)) => {
            eprintln!("configuration error: {msg}");
            2
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    });
}

fn run(cli: Cli) -> Result<UpgradeOutcome, DfuError> {
    let dfu_type = match cli.dfu_type {
        TransportArg::Serial => DfuType::Serial,
        TransportArg::Ble => DfuType::Ble,
    };

    let serial_device = match (&dfu_type, cli.serial_device) {
        (DfuType::Serial, None) => Some(select_serial_port()?),
        (_, device) => device,
    };

    let config = Config {
        dfu_type,
        serial_device,
        serial_baud: cli.serial_baud,
        serial_cdc_acm: cli.serial_cdc_acm,
        ble_interface: cli.ble_interface,
        ble_address: cli.ble_address,
        ble_address_type: match cli.ble_address_type {
            BleAddressTypeArg::Public => BleAddressType::Public,
            BleAddressTypeArg::Random => BleAddressType::Random,
        },
        ble_passkey: cli.ble_passkey,
        timeout_default: Duration::from_millis(cli.timeout_default_ms),
        timeout_execute: Duration::from_millis(cli.timeout_execute_ms),
    };

    nrfdfu::run(&config, &cli.package)
}

/// Find the single USB serial port exposing Nordic's bootloader VID/PID.
fn select_serial_port() -> Result<String, DfuError> {
    let matching: Vec<_> = serialport::available_ports()
        .map_err(|e| DfuError::Config(format!("listing serial ports: {e}")))?
        .into_iter()
        .filter(|port| match &port.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                usb.vid == NORDIC_BOOTLOADER_USB_VID && usb.pid == NORDIC_BOOTLOADER_USB_PID
            }
            _ => false,
        })
        .collect();

    match matching.len() {
        0 => Err(DfuError::Config(
            "no matching USB serial device found; put the device in bootloader mode, \
             or pass --serial-device explicitly"
                .into(),
        )),
        1 => Ok(matching[0].port_name.clone()),
        _ => Err(DfuError::Config(
            "multiple matching USB serial devices found; pass --serial-device to pick one"
                .into(),
        )),
    }
}
