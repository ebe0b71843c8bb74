//! Process-wide session state for one upgrade run (spec §3).

use crc32fast::Hasher;

/// Negotiated/derived state that lives for the lifetime of one upgrade.
pub struct Session {
    /// Chunk size in bytes, adjusted for SLIP overhead on serial.
    pub mtu: u16,
    /// Per-type chunk granularity reported by the device at `OBJECT_SELECT`.
    pub max_object_size: u32,
    /// Streaming CRC-32 over bytes written since the last `OBJECT_CREATE`.
    crc: Hasher,
    /// Monotonic 1-byte nonce for `PING` correlation; wraps.
    ping_id: u8,
}

impl Session {
    pub fn new() -> Self {
        Self {
            mtu: 0,
            max_object_size: 0,
            crc: Hasher::new(),
            ping_id: 0,
        }
    }

    /// Reset `current_crc` to the CRC-32 of an empty buffer (the value a
    /// fresh `OBJECT_CREATE` starts from).
    pub fn reset_crc(&mut self) {
        self.crc = Hasher::new();
    }

    /// Reset `current_crc` to resume from a known-good prefix, per spec's
    /// invariant that seeks over already-acknowledged data must update it
    /// exactly as if every byte had been fed through in order.
    pub fn reset_crc_to(&mut self, prefix: &[u8]) {
        self.crc = Hasher::new();
        self.crc.update(prefix);
    }

    /// Reset `current_crc` to an already-known CRC-32 value (the device's
    /// own reported value for a verified prefix), without re-reading the
    /// bytes that produced it.
    pub fn reset_crc_to_value(&mut self, value: u32) {
        self.crc = Hasher::new_with_initial(value);
    }

    /// Feed bytes that were just handed to the device into the running CRC.
    pub fn accumulate(&mut self, bytes: &[u8]) {
        self.crc.update(bytes);
    }

    pub fn current_crc(&self) -> u32 {
        self.crc.clone().finalize()
    }

    pub fn next_ping_id(&mut self) -> u8 {
        let id = self.ping_id;
        self.ping_id = self.ping_id.wrapping_add(1);
        id
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_matches_crc32fast_over_full_buffer() {
        let mut session = Session::new();
        session.accumulate(b"hello ");
        session.accumulate(b"world");
        let mut expected = Hasher::new();
        expected.update(b"hello world");
        assert_eq!(session.current_crc(), expected.finalize());
    }

    #[test]
    fn reset_crc_to_reseeds_from_prefix() {
        let mut session = Session::new();
        session.accumulate(b"garbage-that-should-be-discarded");
        session.reset_crc_to(b"hello");
        session.accumulate(b" world");
        let mut expected = Hasher::new();
        expected.update(b"hello world");
        assert_eq!(session.current_crc(), expected.finalize());
    }

    #[test]
    fn reset_crc_to_value_continues_accumulating_from_it() {
        let mut whole = Hasher::new();
        whole.update(b"hello world");
        let expected = whole.finalize();

        let mut session = Session::new();
        session.accumulate(b"hello");
        let partial = session.current_crc();
        session.reset_crc_to_value(partial);
        session.accumulate(b" world");
        assert_eq!(session.current_crc(), expected);
    }

    #[test]
    fn ping_id_wraps() {
        let mut session = Session::new();
        session.ping_id = 255;
        assert_eq!(session.next_ping_id(), 255);
        assert_eq!(session.next_ping_id(), 0);
    }
}
