//! The per-request state machine (spec §4.7): `Idle -> AwaitingResponse(op)
//! -> Idle | Error`. [`Link`] is the one place that sends a request and
//! waits for its matching response; the object transfer procedure and the
//! upgrade driver are both built on top of it.

use std::time::Duration;

use crate::error::DfuError;
use crate::messages::{parse_response, OperationCode, Request};
use crate::transport::Transport;

/// Binds a [`Transport`] to the timeouts that govern it. Borrows the
/// transport rather than owning it, so the same transport can be reused
/// across the init-packet and firmware transfers of one upgrade run.
pub struct Link<'t> {
    transport: &'t mut dyn Transport,
    timeout_default: Duration,
    timeout_execute: Duration,
}

impl<'t> Link<'t> {
    pub fn new(
        transport: &'t mut dyn Transport,
        timeout_default: Duration,
        timeout_execute: Duration,
    ) -> Self {
        Self {
            transport,
            timeout_default,
            timeout_execute,
        }
    }

    fn deadline_for(&self, op: OperationCode) -> Duration {
        if op == OperationCode::ObjectExecute {
            self.timeout_execute
        } else {
            self.timeout_default
        }
    }

    /// Send `req` and wait for its matching response. Enters
    /// `AwaitingResponse(op)`; any frame that isn't a `RESPONSE` with a
    /// matching echo is a protocol error, not a device error (spec §4.4).
    pub fn request<R: Request>(&mut self, req: R) -> Result<R::Response, DfuError> {
        let mut payload = Vec::new();
        req.write_payload(&mut payload);
        self.transport.send_frame(R::OPCODE, &payload)?;

        let deadline = self.deadline_for(R::OPCODE);
        let frame = self.transport.recv_frame(R::OPCODE, deadline)?;
        parse_response::<R>(&frame)
    }

    /// Send `req` without waiting for a response — used for `OBJECT_WRITE`
    /// packets, which the bootloader does not acknowledge individually
    /// when PRN is disabled (spec §4.5 step 2).
    pub fn send_only<R: Request>(&mut self, req: R) -> Result<(), DfuError> {
        let mut payload = Vec::new();
        req.write_payload(&mut payload);
        self.transport.send_frame(R::OPCODE, &payload)
    }

    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport
    }
}
