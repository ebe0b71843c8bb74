//! Chunked object transfer with resume (spec §4.5).
//!
//! Grounded directly in `original_source/dfu.c`'s `dfu_object_write_procedure`:
//! select the object type, compare the device's reported offset/CRC against
//! what the local package actually contains, and either skip straight to
//! `execute()`, finish an in-progress chunk, roll back to the last verified
//! chunk boundary, or start a fresh chunk loop — then drive `create` /
//! `write` / `crc_get` / `execute` for every remaining chunk. See
//! `DESIGN.md`'s open-question #4 for why `Session::current_crc` is a
//! running CRC over the whole object-type stream rather than reset per
//! chunk: the device's own `CRC_GET` reply is cumulative, matching
//! `zip_crc_move`'s behavior in the original implementation.

use std::io::{Read, Seek, SeekFrom};

use crate::engine::Link;
use crate::error::{DfuError, ExecuteOutcome, ExtErrorCode};
use crate::messages::{
    CrcGetRequest, ObjectCreateRequest, ObjectExecuteRequest, ObjectSelectRequest, ObjectType,
    WriteRequest,
};
use crate::session::Session;

/// Outcome of transferring one object-type stream in full (spec §4.5,
/// §4.8). Distinct from [`ExecuteOutcome`]: this one covers the whole
/// stream, not a single chunk's `execute()`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TransferOutcome {
    Done,
    FirmwareTooOld,
}

impl From<ExecuteOutcome> for TransferOutcome {
    fn from(outcome: ExecuteOutcome) -> Self {
        match outcome {
            ExecuteOutcome::Committed => TransferOutcome::Done,
            ExecuteOutcome::FirmwareTooOld => TransferOutcome::FirmwareTooOld,
        }
    }
}

/// CRC-32 of the first `n` bytes of `source`, read from the start. Leaves
/// the source's read position at `n`.
fn crc_of_prefix<S: Read + Seek>(source: &mut S, n: u32) -> Result<u32, DfuError> {
    source.seek(SeekFrom::Start(0))?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; 4096];
    let mut remaining = n as usize;
    while remaining > 0 {
        let to_read = remaining.min(buf.len());
        source.read_exact(&mut buf[..to_read])?;
        hasher.update(&buf[..to_read]);
        remaining -= to_read;
    }
    Ok(hasher.finalize())
}

/// Send bytes `[start, end)` of `source` to the device as `OBJECT_WRITE`
/// packets no larger than the transport's chunk size, feeding every byte
/// into `session`'s running CRC as it goes (spec §4.5 step 2).
fn write_range<S: Read + Seek>(
    link: &mut Link,
    session: &mut Session,
    source: &mut S,
    start: u32,
    end: u32,
) -> Result<(), DfuError> {
    let transport_chunk = link.transport_mut().write_chunk_size().max(1);
    source.seek(SeekFrom::Start(start as u64))?;
    let mut remaining = (end - start) as usize;
    let mut buf = vec![0u8; transport_chunk];
    while remaining > 0 {
        let to_read = remaining.min(buf.len());
        source.read_exact(&mut buf[..to_read])?;
        link.send_only(WriteRequest {
            data: &buf[..to_read],
        })?;
        session.accumulate(&buf[..to_read]);
        remaining -= to_read;
    }
    Ok(())
}

/// Execute the in-progress object. `FW_VERSION_FAILURE` is a success-shaped
/// outcome, not a transport or protocol failure (spec §4.5 step 4, §4.8).
fn execute(link: &mut Link) -> Result<ExecuteOutcome, DfuError> {
    match link.request(ObjectExecuteRequest) {
        Ok(()) => Ok(ExecuteOutcome::Committed),
        Err(DfuError::ExtError(ExtErrorCode::FwVersionFailure)) => {
            Ok(ExecuteOutcome::FirmwareTooOld)
        }
        Err(e) => Err(e),
    }
}

/// Transfer one object-type stream of exactly `len` bytes read from
/// `source`, resuming from whatever progress the device reports (spec
/// §4.5). `source` must support `Read + Seek` so the resume cases can
/// recompute a CRC over an arbitrary prefix.
pub fn transfer<S: Read + Seek>(
    link: &mut Link,
    session: &mut Session,
    obj_type: ObjectType,
    source: &mut S,
    len: u32,
) -> Result<TransferOutcome, DfuError> {
    let select = link.request(ObjectSelectRequest { obj_type })?;
    session.max_object_size = select.max_size;
    let chunk_size = select.max_size;
    if chunk_size == 0 {
        return Err(DfuError::Transport(
            "device reported a max object size of 0".into(),
        ));
    }
    let device_crc = select.crc;
    let mut offset = select.offset;

    // Case 1: the device already has the whole object and it matches.
    if offset == len {
        let local = crc_of_prefix(source, len)?;
        if local == device_crc {
            return Ok(execute(link)?.into());
        }
    }

    // Case 2: partial progress from a previous run (or a failed Case 1
    // check above, which falls through to the same rollback logic the
    // original implementation uses for both).
    if offset > 0 {
        let remain = offset % chunk_size;
        let local = crc_of_prefix(source, offset)?;
        if local != device_crc {
            // CRC diverged somewhere in the last chunk the device
            // accepted; roll back to the last verified chunk boundary and
            // let the fresh-chunk loop below refill from there.
            let rollback = if remain > 0 { remain } else { chunk_size };
            offset -= rollback;
            let prefix = crc_of_prefix(source, offset)?;
            session.reset_crc_to_value(prefix);
        } else if offset < len {
            // The device's progress matches the package exactly; finish
            // the in-progress chunk before starting new ones.
            session.reset_crc_to_value(local);
            if remain > 0 {
                let end = offset + (chunk_size - remain);
                write_range(link, session, source, offset, end)?;
                match execute(link)? {
                    ExecuteOutcome::Committed => {}
                    ExecuteOutcome::FirmwareTooOld => {
                        return Ok(TransferOutcome::FirmwareTooOld)
                    }
                }
                offset = end;
            }
        }
    } else {
        session.reset_crc();
    }

    // Case 3: create, write, verify, execute every remaining chunk.
    while offset < len {
        let this_chunk = chunk_size.min(len - offset);
        link.request(ObjectCreateRequest {
            obj_type,
            size: this_chunk,
        })?;
        write_range(link, session, source, offset, offset + this_chunk)?;

        let reply = link.request(CrcGetRequest)?;
        let expected = session.current_crc();
        if reply.crc != expected {
            return Err(DfuError::CrcMismatch {
                expected,
                got: reply.crc,
            });
        }

        match execute(link)? {
            ExecuteOutcome::Committed => {}
            ExecuteOutcome::FirmwareTooOld => return Ok(TransferOutcome::FirmwareTooOld),
        }
        offset += this_chunk;
    }

    Ok(TransferOutcome::Done)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::time::Duration;

    use super::*;
    use crate::messages::{OperationCode, ResultCode};
    use crate::transport::Transport;

    /// In-memory device stand-in: echoes a scripted queue of frame bodies
    /// and records every opcode it was asked to send.
    struct FakeDevice {
        replies: VecDeque<Vec<u8>>,
        sent: Vec<OperationCode>,
        chunk_size: usize,
    }

    impl FakeDevice {
        fn new(chunk_size: usize) -> Self {
            Self {
                replies: VecDeque::new(),
                sent: Vec::new(),
                chunk_size,
            }
        }

        fn push_success(&mut self, op: OperationCode, payload: &[u8]) {
            let mut frame = vec![OperationCode::Response.into(), op.into(), ResultCode::Success.into()];
            frame.extend_from_slice(payload);
            self.replies.push_back(frame);
        }
    }

    impl Transport for FakeDevice {
        fn send_frame(&mut self, op: OperationCode, _payload: &[u8]) -> Result<(), DfuError> {
            self.sent.push(op);
            Ok(())
        }

        fn recv_frame(
            &mut self,
            for_op: OperationCode,
            _timeout: Duration,
        ) -> Result<Vec<u8>, DfuError> {
            self.replies
                .pop_front()
                .ok_or(DfuError::Timeout { op: for_op })
        }

        fn enter_dfu(&mut self) -> Result<(), DfuError> {
            Ok(())
        }

        fn set_mtu(&mut self) -> Result<u16, DfuError> {
            Ok(self.chunk_size as u16)
        }

        fn write_chunk_size(&self) -> usize {
            self.chunk_size
        }
    }

    fn select_reply(max_size: u32, offset: u32, crc: u32) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&max_size.to_le_bytes());
        payload.extend_from_slice(&offset.to_le_bytes());
        payload.extend_from_slice(&crc.to_le_bytes());
        payload
    }

    fn crc_reply(offset: u32, crc: u32) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&offset.to_le_bytes());
        payload.extend_from_slice(&crc.to_le_bytes());
        payload
    }

    #[test]
    fn fresh_transfer_sends_one_chunk_per_object() {
        let data = b"abcdefghijklmnop".to_vec(); // 16 bytes, chunk size 8
        let mut device = FakeDevice::new(8);

        device.push_success(OperationCode::ObjectSelect, &select_reply(8, 0, 0));
        device.push_success(OperationCode::ObjectCreate, &[]);
        device.push_success(OperationCode::CrcGet, &crc_reply(8, crc32fast::hash(&data[0..8])));
        device.push_success(OperationCode::ObjectExecute, &[]);
        device.push_success(OperationCode::ObjectCreate, &[]);
        device.push_success(
            OperationCode::CrcGet,
            &crc_reply(16, crc32fast::hash(&data)),
        );
        device.push_success(OperationCode::ObjectExecute, &[]);

        let mut link = Link::new(&mut device, Duration::from_secs(1), Duration::from_secs(1));
        let mut session = Session::new();
        let mut cursor = Cursor::new(data.clone());

        let outcome = transfer(&mut link, &mut session, ObjectType::Data, &mut cursor, 16).unwrap();
        assert_eq!(outcome, TransferOutcome::Done);
        let creates = device
            .sent
            .iter()
            .filter(|op| **op == OperationCode::ObjectCreate)
            .count();
        assert_eq!(creates, 2, "one CREATE per 8-byte chunk");
    }

    #[test]
    fn already_fully_accepted_object_skips_straight_to_execute() {
        let data = b"same as device".to_vec();
        let crc = crc32fast::hash(&data);
        let mut device = FakeDevice::new(8);
        device.push_success(
            OperationCode::ObjectSelect,
            &select_reply(8, data.len() as u32, crc),
        );
        device.push_success(OperationCode::ObjectExecute, &[]);

        let mut link = Link::new(&mut device, Duration::from_secs(1), Duration::from_secs(1));
        let mut session = Session::new();
        let mut cursor = Cursor::new(data.clone());

        let outcome =
            transfer(&mut link, &mut session, ObjectType::Data, &mut cursor, data.len() as u32)
                .unwrap();
        assert_eq!(outcome, TransferOutcome::Done);
        assert_eq!(device.sent.last(), Some(&OperationCode::ObjectExecute));
    }

    #[test]
    fn crc_mismatch_on_resume_rolls_back_to_chunk_boundary() {
        // 20 bytes, chunk size 8: device reports offset 12 (mid-chunk-2)
        // but with a CRC that does not match the package's first 12 bytes
        // — the corrupted-partial-chunk scenario from spec §8.
        let data: Vec<u8> = (0u8..20).collect();
        let mut device = FakeDevice::new(8);
        device.push_success(OperationCode::ObjectSelect, &select_reply(8, 12, 0xBAD_C0DE));
        // rollback to offset 8 (last full chunk boundary), then rebuild
        // chunk 2 [8,16) and chunk 3 [16,20) fresh.
        device.push_success(OperationCode::ObjectCreate, &[]);
        device.push_success(
            OperationCode::CrcGet,
            &crc_reply(16, crc32fast::hash(&data[0..16])),
        );
        device.push_success(OperationCode::ObjectExecute, &[]);
        device.push_success(OperationCode::ObjectCreate, &[]);
        device.push_success(
            OperationCode::CrcGet,
            &crc_reply(20, crc32fast::hash(&data)),
        );
        device.push_success(OperationCode::ObjectExecute, &[]);

        let mut link = Link::new(&mut device, Duration::from_secs(1), Duration::from_secs(1));
        let mut session = Session::new();
        let mut cursor = Cursor::new(data.clone());

        let outcome = transfer(&mut link, &mut session, ObjectType::Data, &mut cursor, 20).unwrap();
        assert_eq!(outcome, TransferOutcome::Done);
    }

    #[test]
    fn matched_partial_chunk_is_finished_before_new_chunks_start() {
        // 16 bytes, chunk size 8: device already has the first 5 bytes of
        // chunk 1 and they match locally — finish that chunk, then do
        // chunk 2 fresh.
        let data: Vec<u8> = (0u8..16).collect();
        let mut device = FakeDevice::new(8);
        let prefix_crc = crc32fast::hash(&data[0..5]);
        device.push_success(OperationCode::ObjectSelect, &select_reply(8, 5, prefix_crc));
        // Finishing the in-progress chunk writes the remaining bytes and
        // executes directly — no CRC_GET in between (spec §4.5 Case 2;
        // `original_source/dfu.c` does the same).
        device.push_success(OperationCode::ObjectExecute, &[]);
        device.push_success(OperationCode::ObjectCreate, &[]);
        device.push_success(
            OperationCode::CrcGet,
            &crc_reply(16, crc32fast::hash(&data)),
        );
        device.push_success(OperationCode::ObjectExecute, &[]);

        let mut link = Link::new(&mut device, Duration::from_secs(1), Duration::from_secs(1));
        let mut session = Session::new();
        let mut cursor = Cursor::new(data.clone());

        let outcome = transfer(&mut link, &mut session, ObjectType::Data, &mut cursor, 16).unwrap();
        assert_eq!(outcome, TransferOutcome::Done);
        let creates = device
            .sent
            .iter()
            .filter(|op| **op == OperationCode::ObjectCreate)
            .count();
        assert_eq!(creates, 1, "the in-progress chunk is finished, not recreated");
    }

    #[test]
    fn firmware_too_old_is_propagated_without_error() {
        let data = b"firmware".to_vec();
        let mut device = FakeDevice::new(8);
        device.push_success(OperationCode::ObjectSelect, &select_reply(8, 0, 0));
        device.push_success(OperationCode::ObjectCreate, &[]);
        device.push_success(
            OperationCode::CrcGet,
            &crc_reply(8, crc32fast::hash(&data)),
        );
        let mut frame = vec![
            OperationCode::Response.into(),
            OperationCode::ObjectExecute.into(),
            ResultCode::ExtError.into(),
        ];
        frame.push(ExtErrorCode::FwVersionFailure.into());
        device.replies.push_back(frame);

        let mut link = Link::new(&mut device, Duration::from_secs(1), Duration::from_secs(1));
        let mut session = Session::new();
        let mut cursor = Cursor::new(data.clone());

        let outcome =
            transfer(&mut link, &mut session, ObjectType::Data, &mut cursor, data.len() as u32)
                .unwrap();
        assert_eq!(outcome, TransferOutcome::FirmwareTooOld);
    }

    #[test]
    fn crc_mismatch_during_fresh_chunk_is_an_error() {
        let data = b"firmware".to_vec();
        let mut device = FakeDevice::new(8);
        device.push_success(OperationCode::ObjectSelect, &select_reply(8, 0, 0));
        device.push_success(OperationCode::ObjectCreate, &[]);
        device.push_success(OperationCode::CrcGet, &crc_reply(8, 0xFFFF_FFFF));

        let mut link = Link::new(&mut device, Duration::from_secs(1), Duration::from_secs(1));
        let mut session = Session::new();
        let mut cursor = Cursor::new(data.clone());

        let err =
            transfer(&mut link, &mut session, ObjectType::Data, &mut cursor, data.len() as u32)
                .unwrap_err();
        assert!(matches!(err, DfuError::CrcMismatch { .. }));
    }

}
