//! Serial transport: SLIP-framed requests/responses over an 8-N-1 TTY
//! (spec §4.2, §6).
//!
//! Grounded in the teacher's `BootloaderConnection` (DTR toggling,
//! `write_all` + `flush`) and `original_source/serialtty.c` (the
//! EAGAIN/partial-write retry loop and `select`-based deadline waiting,
//! which `serialport`'s blocking API already gives us via its own
//! configured read/write timeout).

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;

use crate::config::Config;
use crate::engine::Link;
use crate::error::DfuError;
use crate::messages::{MtuGetRequest, OperationCode, PingRequest};
use crate::slip::{self, Decoder, Step};
use crate::transport::Transport;

/// Bound the SLIP decode buffer comfortably above any MTU we'll negotiate.
const MAX_FRAME_LEN: usize = 4096;

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    path: String,
    baud: u32,
    cdc_acm: bool,
    decoder: Decoder,
    raw_mtu: u16,
    timeout_default: Duration,
    timeout_execute: Duration,
}

impl SerialTransport {
    pub fn open(config: &Config) -> Result<Self, DfuError> {
        let path = config
            .serial_device
            .clone()
            .ok_or_else(|| DfuError::Config("serial_device is required for DFU_TYPE=SERIAL".into()))?;
        let baud = config.serial_baud;
        let port = Self::open_port(&path, baud)?;

        Ok(Self {
            port,
            path,
            baud,
            cdc_acm: config.serial_cdc_acm,
            decoder: Decoder::new(MAX_FRAME_LEN),
            raw_mtu: 0,
            timeout_default: config.timeout_default,
            timeout_execute: config.timeout_execute,
        })
    }

    fn deadline_for(&self, op: OperationCode) -> Duration {
        if op == OperationCode::ObjectExecute {
            self.timeout_execute
        } else {
            self.timeout_default
        }
    }

    fn open_port(path: &str, baud: u32) -> Result<Box<dyn SerialPort>, DfuError> {
        serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| DfuError::Transport(format!("opening {path}: {e}")))
    }

    /// Write one already-SLIP-encoded frame, handling partial writes and
    /// `WouldBlock`/`EAGAIN` by waiting up to `deadline` total (mirrors
    /// `serial_write` in `original_source/serialtty.c`).
    fn write_frame(&mut self, encoded: &[u8], deadline: Duration) -> Result<(), DfuError> {
        let start = Instant::now();
        let mut pos = 0;
        while pos < encoded.len() {
            if start.elapsed() > deadline {
                return Err(DfuError::Transport("write timed out".into()));
            }
            match self.port.write(&encoded[pos..]) {
                Ok(0) => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(n) => pos += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(DfuError::Io(e)),
            }
        }
        self.port
            .flush()
            .map_err(|e| DfuError::Transport(format!("flush: {e}")))
    }

    /// Read one byte at a time through the SLIP decoder until a complete
    /// frame is obtained or `deadline` elapses (spec §4.2).
    fn read_frame(&mut self, for_op: OperationCode, deadline: Duration) -> Result<Vec<u8>, DfuError> {
        let start = Instant::now();
        self.decoder.reset();
        let mut byte = [0u8; 1];
        loop {
            if start.elapsed() > deadline {
                return Err(DfuError::Timeout { op: for_op });
            }
            match self.port.read(&mut byte) {
                Ok(0) => continue,
                Ok(_) => match self.decoder.feed(byte[0]) {
                    Step::Busy => continue,
                    Step::Complete => return Ok(self.decoder.take()),
                    Step::Error => return Err(DfuError::Framing("invalid SLIP escape sequence")),
                    Step::Overflow => return Err(DfuError::Framing("frame exceeded buffer size")),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    continue;
                }
                Err(e) => return Err(DfuError::Io(e)),
            }
        }
    }

    fn reopen(&mut self) -> Result<(), DfuError> {
        std::thread::sleep(Duration::from_millis(500));
        self.port = Self::open_port(&self.path, self.baud)?;
        Ok(())
    }
}

impl Transport for SerialTransport {
    fn send_frame(&mut self, op: OperationCode, payload: &[u8]) -> Result<(), DfuError> {
        let mut buf = Vec::with_capacity(1 + payload.len());
        buf.push(op.into());
        buf.extend_from_slice(payload);
        let encoded = slip::encode(&buf);
        let deadline = self.deadline_for(op);
        self.write_frame(&encoded, deadline)
    }

    fn recv_frame(&mut self, for_op: OperationCode, timeout: Duration) -> Result<Vec<u8>, DfuError> {
        self.read_frame(for_op, timeout)
    }

    fn enter_dfu(&mut self) -> Result<(), DfuError> {
        if !self.cdc_acm {
            // Toggle DTR/RTS to trigger a reset into the bootloader.
            let _ = self.port.write_data_terminal_ready(false);
            let _ = self.port.write_request_to_send(false);
            std::thread::sleep(Duration::from_millis(100));
            let _ = self.port.write_data_terminal_ready(true);
            let _ = self.port.write_request_to_send(true);
            self.reopen()?;
        } else {
            // On Windows, this is required, otherwise communication fails
            // with timeouts (or just hangs forever).
            self.port
                .write_data_terminal_ready(true)
                .map_err(|e| DfuError::Transport(e.to_string()))?;
        }

        // Ping a few times; the bootloader may still be coming up.
        let mut last_err = None;
        let (timeout_default, timeout_execute) = (self.timeout_default, self.timeout_execute);
        for attempt in 0..5u8 {
            let mut link = Link::new(self, timeout_default, timeout_execute);
            match link.request(PingRequest { id: attempt }) {
                Ok(resp) if resp.id == attempt => return Ok(()),
                Ok(_) => last_err = Some(DfuError::Transport("ping id mismatch".into())),
                Err(e) => last_err = Some(e),
            }
            std::thread::sleep(Duration::from_millis(200));
        }
        Err(last_err.unwrap_or(DfuError::Transport("device did not respond to ping".into())))
    }

    fn set_mtu(&mut self) -> Result<u16, DfuError> {
        let (timeout_default, timeout_execute) = (self.timeout_default, self.timeout_execute);
        let mut link = Link::new(self, timeout_default, timeout_execute);
        let resp = link.request(MtuGetRequest)?;
        self.raw_mtu = resp.size.min(MAX_FRAME_LEN as u16);
        Ok(self.raw_mtu)
    }

    fn write_chunk_size(&self) -> usize {
        // Leaves room for the 1-byte OBJECT_WRITE opcode and worst-case
        // SLIP doubling (spec §4.2).
        ((self.raw_mtu as usize).saturating_sub(1) / 2).saturating_sub(1)
    }
}
