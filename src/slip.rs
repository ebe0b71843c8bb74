//! RFC 1055 SLIP byte stuffing, used to frame requests/responses on the
//! serial transport (spec §4.1).
//!
//! Escape = `0xDB`, end = `0xC0`. Encoding never shrinks the payload and
//! never grows it past `2*N + 1` bytes, so callers can size buffers up
//! front (`original_source/dfu_serial.h`: `SLIP_BUF_SIZE = BUF_SIZE*2+1`).

const END: u8 = 0xC0;
const ESC: u8 = 0xDB;
const ESC_END: u8 = 0xDC;
const ESC_ESC: u8 = 0xDD;

/// Encode `payload` as one SLIP frame, terminated by a single trailing
/// `0xC0`. The returned buffer is at most `2*payload.len() + 1` bytes.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 * payload.len() + 1);
    for &b in payload {
        match b {
            END => {
                out.push(ESC);
                out.push(ESC_END);
            }
            ESC => {
                out.push(ESC);
                out.push(ESC_ESC);
            }
            _ => out.push(b),
        }
    }
    out.push(END);
    out
}

/// Result of feeding one byte to a [`Decoder`].
#[derive(Debug, Eq, PartialEq)]
pub enum Step {
    /// Frame not yet complete, keep feeding bytes.
    Busy,
    /// A full frame is available via [`Decoder::take`].
    Complete,
    /// The byte sequence is not valid SLIP (a lone escape followed by
    /// something other than `0xDC`/`0xDD`).
    Error,
    /// The frame exceeded the decoder's configured maximum length.
    Overflow,
}

#[derive(Debug, Eq, PartialEq)]
enum State {
    Decoding,
    EscReceived,
    Finished,
    Error,
}

/// Byte-at-a-time SLIP decoder state machine (spec §4.1).
///
/// Leading `0xC0`s are treated as frame boundaries and skipped; a
/// well-formed encoding of length `N` decodes to exactly `N` bytes.
pub struct Decoder {
    state: State,
    buf: Vec<u8>,
    max_len: usize,
}

impl Decoder {
    pub fn new(max_len: usize) -> Self {
        Self {
            state: State::Decoding,
            buf: Vec::with_capacity(max_len.min(4096)),
            max_len,
        }
    }

    /// Feed one byte read off the wire. Returns the new state of the frame
    /// in progress.
    pub fn feed(&mut self, byte: u8) -> Step {
        match self.state {
            State::Finished | State::Error => {
                // Starting a new frame; a leading END is just a boundary.
                self.buf.clear();
                self.state = State::Decoding;
                self.feed(byte)
            }
            State::Decoding => match byte {
                END => {
                    if self.buf.is_empty() {
                        // Leading frame boundary, not a complete (empty) frame.
                        Step::Busy
                    } else {
                        self.state = State::Finished;
                        Step::Complete
                    }
                }
                ESC => {
                    self.state = State::EscReceived;
                    Step::Busy
                }
                _ => self.push(byte),
            },
            State::EscReceived => match byte {
                ESC_END => {
                    self.state = State::Decoding;
                    self.push(END)
                }
                ESC_ESC => {
                    self.state = State::Decoding;
                    self.push(ESC)
                }
                _ => {
                    self.state = State::Error;
                    Step::Error
                }
            },
        }
    }

    fn push(&mut self, byte: u8) -> Step {
        if self.buf.len() >= self.max_len {
            self.state = State::Error;
            return Step::Overflow;
        }
        self.buf.push(byte);
        Step::Busy
    }

    /// Take the decoded frame after [`Step::Complete`] and reset for the
    /// next frame.
    pub fn take(&mut self) -> Vec<u8> {
        self.state = State::Decoding;
        std::mem::take(&mut self.buf)
    }

    /// Reset after an error or overflow, discarding any partial frame.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = State::Decoding;
    }
}
