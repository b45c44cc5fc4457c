//! TWC wall-charger serial frame codec: byte stuffing and checksum
//! validation.
//!
//! Frames are delimited by `0xC0` on the wire; `0xC0` and `0xDB` occurring
//! in the payload are escaped as `0xDB 0xDC` and `0xDB 0xDD` respectively.
//! The unstuffed payload layout is
//! `code(2) | from(2) | to(2) | command(1) | setpoint(2) | current(2) | pad | checksum(1)`,
//! 14 bytes for a link-ready frame or 16 for a heartbeat.

use thiserror::Error;

pub const DELIMITER: u8 = 0xC0;
const ESCAPE: u8 = 0xDB;
const ESCAPED_DELIMITER: u8 = 0xDC;
const ESCAPED_ESCAPE: u8 = 0xDD;
const MAX_BUFFER: usize = 20;
const MIN_UNSTUFFED_LEN: usize = 10;

/// Codes observed from a slave. Master-emitted outbound codes are kept
/// separately in `master.rs` since the decoder never needs to parse them.
pub const CODE_SLAVE_HEARTBEAT: u16 = 0xFDE0;
pub const CODE_SLAVE_LINK_READY: u16 = 0xFDE2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame too short after unstuffing ({0} bytes)")]
    TooShort(usize),
    #[error("checksum mismatch: expected {expected:#04x}, got {got:#04x}")]
    ChecksumMismatch { expected: u8, got: u8 },
    #[error("escape byte followed by invalid byte {0:#04x}")]
    BadEscape(u8),
    #[error("buffer exceeded {0} bytes without a delimiter")]
    Overflow(usize),
}

/// A decoded, unstuffed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u16,
    pub from_addr: u16,
    pub to_addr: u16,
    pub command: u8,
    pub setpoint_ca: i16,
    pub current_ca: i16,
}

impl Frame {
    /// Encodes the frame into an unstuffed payload of `total_len` bytes
    /// (14 or 16), computing and appending the checksum.
    pub fn to_unstuffed_payload(&self, total_len: usize) -> Vec<u8> {
        assert!(total_len == 14 || total_len == 16, "frame length must be 14 or 16");
        let mut buf = Vec::with_capacity(total_len);
        buf.extend_from_slice(&self.code.to_be_bytes());
        buf.extend_from_slice(&self.from_addr.to_be_bytes());
        buf.extend_from_slice(&self.to_addr.to_be_bytes());
        buf.push(self.command);
        buf.extend_from_slice(&self.setpoint_ca.to_be_bytes());
        buf.extend_from_slice(&self.current_ca.to_be_bytes());
        let pad_len = total_len - buf.len() - 1;
        buf.extend(std::iter::repeat(0u8).take(pad_len));
        let checksum = checksum(&buf);
        buf.push(checksum);
        buf
    }

    fn from_unstuffed_payload(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < MIN_UNSTUFFED_LEN {
            return Err(CodecError::TooShort(buf.len()));
        }
        let expected = checksum(&buf[..buf.len() - 1]);
        let got = buf[buf.len() - 1];
        if expected != got {
            return Err(CodecError::ChecksumMismatch { expected, got });
        }
        let byte_at = |idx: usize| buf.get(idx).copied().unwrap_or(0);
        Ok(Frame {
            code: u16::from_be_bytes([buf[0], buf[1]]),
            from_addr: u16::from_be_bytes([buf[2], buf[3]]),
            to_addr: u16::from_be_bytes([buf[4], buf[5]]),
            command: byte_at(6),
            setpoint_ca: i16::from_be_bytes([byte_at(7), byte_at(8)]),
            current_ca: i16::from_be_bytes([byte_at(9), byte_at(10)]),
        })
    }

    /// Wire-encode (stuffed, delimited) form ready to write to the serial
    /// port.
    pub fn encode(&self, total_len: usize) -> Vec<u8> {
        let payload = self.to_unstuffed_payload(total_len);
        let mut out = Vec::with_capacity(payload.len() + 4);
        out.push(DELIMITER);
        for &b in &payload {
            match b {
                DELIMITER => {
                    out.push(ESCAPE);
                    out.push(ESCAPED_DELIMITER);
                }
                ESCAPE => {
                    out.push(ESCAPE);
                    out.push(ESCAPED_ESCAPE);
                }
                other => out.push(other),
            }
        }
        out.push(DELIMITER);
        out
    }
}

fn checksum(bytes_from_index_zero: &[u8]) -> u8 {
    // Sum from index 1 through the last byte of the slice (the byte before
    // the checksum itself, which is never part of `bytes_from_index_zero`).
    bytes_from_index_zero[1..]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Feeds raw wire bytes one at a time into an unstuffing state machine and
/// produces complete, checksum-validated frames.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
    in_frame: bool,
    escaped: bool,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one byte. Returns `Ok(Some(frame))` on a complete valid frame,
    /// `Ok(None)` if more bytes are needed, or `Err` on a protocol error —
    /// in every error case the decoder has already reset itself and is
    /// ready for the next delimiter.
    pub fn push_byte(&mut self, byte: u8) -> Result<Option<Frame>, CodecError> {
        if byte == DELIMITER {
            if self.in_frame && !self.buf.is_empty() {
                let buf = std::mem::take(&mut self.buf);
                self.reset();
                return Frame::from_unstuffed_payload(&buf).map(Some);
            }
            self.reset();
            self.in_frame = true;
            return Ok(None);
        }

        if !self.in_frame {
            // Ignore noise between frames.
            return Ok(None);
        }

        if self.escaped {
            self.escaped = false;
            match byte {
                ESCAPED_DELIMITER => self.buf.push(DELIMITER),
                ESCAPED_ESCAPE => self.buf.push(ESCAPE),
                other => {
                    self.reset();
                    return Err(CodecError::BadEscape(other));
                }
            }
        } else if byte == ESCAPE {
            self.escaped = true;
        } else {
            self.buf.push(byte);
        }

        if self.buf.len() > MAX_BUFFER {
            self.reset();
            return Err(CodecError::Overflow(MAX_BUFFER));
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.in_frame = false;
        self.escaped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        Frame {
            code: CODE_SLAVE_HEARTBEAT,
            from_addr: 0x7777,
            to_addr: 0x1234,
            command: 1,
            setpoint_ca: 1000,
            current_ca: 1000,
        }
    }

    fn feed(reader: &mut FrameReader, bytes: &[u8]) -> Result<Option<Frame>, CodecError> {
        let mut last = Ok(None);
        for &b in bytes {
            last = reader.push_byte(b);
            if matches!(last, Err(_)) || matches!(last, Ok(Some(_))) {
                return last;
            }
        }
        last
    }

    #[test]
    fn round_trip_encode_decode() {
        let frame = sample_frame();
        let wire = frame.encode(14);
        let mut reader = FrameReader::new();
        let decoded = feed(&mut reader, &wire).unwrap().expect("complete frame");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn scenario_five_literal_bytes() {
        // Literal 0xC0/0xDB payload bytes, with checksum computed to match.
        let mut payload = vec![
            0xFD, 0xE0, 0x77, 0x77, 0x12, 0x34, 0x01, 0x03, 0xE8, 0x03, 0xE8, 0x00, 0x00,
        ];
        let cksum = checksum(&payload);
        payload.push(cksum);
        let mut wire = vec![DELIMITER];
        wire.extend_from_slice(&payload);
        wire.push(DELIMITER);

        let mut reader = FrameReader::new();
        let decoded = feed(&mut reader, &wire).unwrap().expect("complete frame");
        assert_eq!(decoded.to_addr, 0x1234);
        assert_eq!(decoded.command, 1);
        assert_eq!(decoded.setpoint_ca, 1000);
        assert_eq!(decoded.current_ca, 1000);
    }

    #[test]
    fn escaped_bytes_in_payload_round_trip() {
        let frame = Frame {
            code: 0xDBC0,
            from_addr: 0xC0C0,
            to_addr: 0xDBDB,
            command: 0xDB,
            setpoint_ca: -1,
            current_ca: 0x00C0,
        };
        let wire = frame.encode(16);
        // Must contain escape sequences for the embedded 0xC0/0xDB bytes.
        assert!(wire.windows(2).any(|w| w == [ESCAPE, ESCAPED_DELIMITER]));
        let mut reader = FrameReader::new();
        let decoded = feed(&mut reader, &wire).unwrap().expect("complete frame");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn checksum_mismatch_is_rejected_and_reader_resets() {
        let frame = sample_frame();
        let mut wire = frame.encode(14);
        // Corrupt the last payload byte (checksum) before the trailing delimiter.
        let len = wire.len();
        wire[len - 2] ^= 0xFF;

        let mut reader = FrameReader::new();
        let result = feed(&mut reader, &wire);
        assert!(matches!(result, Err(CodecError::ChecksumMismatch { .. })));

        // Reader must be usable again for the next frame.
        let wire2 = sample_frame().encode(14);
        let decoded = feed(&mut reader, &wire2).unwrap().expect("complete frame");
        assert_eq!(decoded, sample_frame());
    }

    #[test]
    fn bad_escape_sequence_resets_decoder() {
        let mut reader = FrameReader::new();
        reader.push_byte(DELIMITER).unwrap();
        reader.push_byte(ESCAPE).unwrap();
        let err = reader.push_byte(0x01).unwrap_err();
        assert_eq!(err, CodecError::BadEscape(0x01));

        // Decoder resumes cleanly on the next delimiter.
        let wire = sample_frame().encode(14);
        let decoded = feed(&mut reader, &wire).unwrap().expect("complete frame");
        assert_eq!(decoded, sample_frame());
    }

    #[test]
    fn overflow_without_delimiter_resets_decoder() {
        let mut reader = FrameReader::new();
        reader.push_byte(DELIMITER).unwrap();
        let mut last = Ok(None);
        for i in 0..(MAX_BUFFER as u16 + 2) {
            let b = (i % 251) as u8; // avoid accidental delimiter/escape bytes
            let b = if b == DELIMITER || b == ESCAPE { b.wrapping_add(1) } else { b };
            last = reader.push_byte(b);
            if last.is_err() {
                break;
            }
        }
        assert!(matches!(last, Err(CodecError::Overflow(_))));
    }

    #[test]
    fn short_frame_is_rejected() {
        let mut reader = FrameReader::new();
        reader.push_byte(DELIMITER).unwrap();
        for b in [0x01, 0x02, 0x03] {
            reader.push_byte(b).unwrap();
        }
        let err = reader.push_byte(DELIMITER).unwrap_err();
        assert!(matches!(err, CodecError::TooShort(3)));
    }
}
