//! Frame-level encoder/decoder for the module API protocol.
//!
//! This module handles the pure byte-level framing: start delimiter,
//! big-endian length, checksum, and (in escaped mode) control-character
//! escaping. The typed payload interpretation lives in [`crate::frame`].
//!
//! # Frame format
//!
//! ```text
//! [0]     0x7E        start delimiter (never escaped)
//! [1..2]  length      u16 BE, = len(frame_type + payload), excludes checksum
//! [3]     frame_type
//! [4..n]  payload
//! [n+1]   checksum    0xFF - (sum(frame_type..payload) mod 256)
//! ```
//!
//! In escaped mode, any occurrence of `{0x7E, 0x7D, 0x11, 0x13}` after the
//! length field (frame type, payload, checksum) is transmitted as `0x7D`
//! followed by the byte XORed with `0x20`. The delimiter and the length
//! field are never escaped.
//!
//! # Resynchronization
//!
//! Serial links corrupt bytes. The streaming [`Decoder`] treats a checksum
//! mismatch or an implausible length as noise: it drops the offending
//! delimiter, scans forward to the next `0x7E`, and resumes. Corruption is
//! recoverable control flow here, never an error surfaced to the caller.

use bytes::{BufMut, BytesMut};

use crate::frame::Frame;

/// Start-of-frame delimiter.
pub const START_DELIMITER: u8 = 0x7E;

/// Escape marker (escaped mode only).
pub const ESCAPE: u8 = 0x7D;

/// Software flow control resume byte; escaped so it never appears on the wire.
pub const XON: u8 = 0x11;

/// Software flow control pause byte; escaped so it never appears on the wire.
pub const XOFF: u8 = 0x13;

/// XOR applied to an escaped byte.
const ESCAPE_XOR: u8 = 0x20;

/// Largest frame-data length (frame type + payload) the decoder will accept.
///
/// Modules never emit frames anywhere near this size; a length field above
/// it is corruption and triggers a resync instead of waiting for bytes
/// that will never arrive.
pub const MAX_FRAME_DATA: usize = 512;

/// Compute the frame checksum over frame-type + payload bytes.
pub fn checksum(data: &[u8]) -> u8 {
    0xFFu8.wrapping_sub(data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)))
}

/// Returns `true` for bytes that must be escaped in escaped mode.
fn needs_escape(b: u8) -> bool {
    matches!(b, START_DELIMITER | ESCAPE | XON | XOFF)
}

fn put_escaped(out: &mut BytesMut, bytes: &[u8]) {
    for &b in bytes {
        if needs_escape(b) {
            out.put_u8(ESCAPE);
            out.put_u8(b ^ ESCAPE_XOR);
        } else {
            out.put_u8(b);
        }
    }
}

/// Encode a frame into its full wire representation.
///
/// # Example
///
/// ```
/// use meshlink_api::frame::Frame;
/// use meshlink_api::wire::encode;
///
/// let frame = Frame::ModemStatus {
///     status: meshlink_core::ModemStatusCode::Associated,
/// };
/// assert_eq!(encode(&frame, false), vec![0x7E, 0x00, 0x02, 0x8A, 0x02, 0x73]);
/// ```
pub fn encode(frame: &Frame, escaped: bool) -> Vec<u8> {
    let data = frame.to_wire_data();
    let ck = checksum(&data);

    let mut out = BytesMut::with_capacity(data.len() + 8);
    out.put_u8(START_DELIMITER);
    out.put_u16(data.len() as u16);
    if escaped {
        put_escaped(&mut out, &data);
        put_escaped(&mut out, &[ck]);
    } else {
        out.put_slice(&data);
        out.put_u8(ck);
    }
    out.to_vec()
}

/// Streaming frame decoder with resynchronization.
///
/// Feed raw transport bytes in with [`extend`](Decoder::extend) and drain
/// complete frames with [`next_frame`](Decoder::next_frame). A frame split
/// across multiple reads is held until its remaining bytes arrive; corrupt
/// regions are skipped silently (counted in [`discarded`](Decoder::discarded)).
#[derive(Debug)]
pub struct Decoder {
    buf: Vec<u8>,
    escaped: bool,
    discarded: u64,
}

impl Decoder {
    /// Create a decoder for the given escaping mode.
    pub fn new(escaped: bool) -> Self {
        Decoder {
            buf: Vec::new(),
            escaped,
            discarded: 0,
        }
    }

    /// Append raw bytes read from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes currently buffered (incomplete frame data).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Total bytes discarded by resynchronization since construction.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Drop all buffered bytes.
    pub fn reset(&mut self) {
        self.discarded += self.buf.len() as u64;
        self.buf.clear();
    }

    /// Try to decode the next complete frame from the buffer.
    ///
    /// Returns `None` when more bytes are needed. Never fails: corrupt
    /// input is consumed by resynchronization.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            // Scan to the next start delimiter; everything before it is noise.
            let start = match self.buf.iter().position(|&b| b == START_DELIMITER) {
                Some(pos) => pos,
                None => {
                    self.discarded += self.buf.len() as u64;
                    self.buf.clear();
                    return None;
                }
            };
            if start > 0 {
                self.discarded += start as u64;
                self.buf.drain(..start);
            }

            // Delimiter + 2 length bytes.
            if self.buf.len() < 3 {
                return None;
            }
            let length = u16::from_be_bytes([self.buf[1], self.buf[2]]) as usize;
            if length == 0 || length > MAX_FRAME_DATA {
                tracing::trace!(length, "implausible frame length, resyncing");
                self.resync();
                continue;
            }

            // Unescape frame data + checksum, tracking raw bytes consumed.
            match self.take_body(length) {
                Body::Complete { data, ck, consumed } => {
                    if checksum(&data) == ck {
                        self.buf.drain(..consumed);
                        return Some(Frame::from_wire_data(&data));
                    }
                    tracing::trace!("frame checksum mismatch, resyncing");
                    self.resync();
                }
                Body::Truncated { at } => {
                    // An unescaped delimiter inside an escaped-mode body can
                    // only mean the frame was cut short; restart there.
                    self.discarded += at as u64;
                    self.buf.drain(..at);
                }
                Body::Incomplete => return None,
            }
        }
    }

    /// Drop the leading delimiter so the scan resumes at the next one.
    fn resync(&mut self) {
        self.discarded += 1;
        self.buf.drain(..1);
    }

    /// Read `length` data bytes plus the checksum byte starting at buffer
    /// offset 3, applying unescaping when in escaped mode.
    fn take_body(&self, length: usize) -> Body {
        let mut data = Vec::with_capacity(length + 1);
        let mut idx = 3usize;

        while data.len() < length + 1 {
            if idx >= self.buf.len() {
                return Body::Incomplete;
            }
            let b = self.buf[idx];
            if self.escaped {
                if b == START_DELIMITER {
                    return Body::Truncated { at: idx };
                }
                if b == ESCAPE {
                    match self.buf.get(idx + 1) {
                        Some(&next) => {
                            data.push(next ^ ESCAPE_XOR);
                            idx += 2;
                            continue;
                        }
                        None => return Body::Incomplete,
                    }
                }
            }
            data.push(b);
            idx += 1;
        }

        let ck = data.pop().unwrap_or(0);
        Body::Complete {
            data,
            ck,
            consumed: idx,
        }
    }
}

enum Body {
    Complete {
        data: Vec<u8>,
        ck: u8,
        consumed: usize,
    },
    /// An unescaped start delimiter appeared mid-body at buffer offset `at`.
    Truncated {
        at: usize,
    },
    Incomplete,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use meshlink_core::{Addr16, Addr64, AtStatus, ModemStatusCode};

    fn decode_all(bytes: &[u8], escaped: bool) -> Vec<Frame> {
        let mut dec = Decoder::new(escaped);
        dec.extend(bytes);
        let mut frames = Vec::new();
        while let Some(f) = dec.next_frame() {
            frames.push(f);
        }
        frames
    }

    fn sample_receive() -> Frame {
        Frame::Receive {
            src64: Addr64(0x0013_A200_4052_C507),
            src16: Addr16(0x1234),
            options: 0x01,
            payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
        }
    }

    // ---------------------------------------------------------------
    // Checksum
    // ---------------------------------------------------------------

    #[test]
    fn checksum_known_value() {
        // Command response: type=0x88, frame_id=0x01, "AC", status OK.
        let data = [0x88, 0x01, b'A', b'C', 0x00];
        let sum: u32 = data.iter().map(|&b| b as u32).sum();
        assert_eq!(checksum(&data), 0xFF - (sum % 256) as u8);
    }

    #[test]
    fn checksum_wraps_modulo_256() {
        let data = [0xFF, 0xFF, 0xFF];
        // sum = 765, mod 256 = 253, checksum = 0xFF - 253 = 2
        assert_eq!(checksum(&data), 2);
    }

    // ---------------------------------------------------------------
    // Encoding
    // ---------------------------------------------------------------

    #[test]
    fn encode_modem_status() {
        let frame = Frame::ModemStatus {
            status: ModemStatusCode::HardwareReset,
        };
        // length=2, data = [0x8A, 0x00], checksum = 0xFF - 0x8A = 0x75
        assert_eq!(encode(&frame, false), vec![0x7E, 0x00, 0x02, 0x8A, 0x00, 0x75]);
    }

    #[test]
    fn encode_command_response_scenario() {
        // type=0x88, command "AC", status OK -- checksum must equal
        // 0xFF - (sum of type+payload mod 256).
        let frame = Frame::AtResponse {
            frame_id: 0x01,
            command: *b"AC",
            status: AtStatus::Ok,
            value: vec![],
        };
        let bytes = encode(&frame, false);
        assert_eq!(bytes[0], START_DELIMITER);
        assert_eq!(&bytes[1..3], &[0x00, 0x05]);
        let data = &bytes[3..bytes.len() - 1];
        assert_eq!(data, &[0x88, 0x01, b'A', b'C', 0x00]);
        let sum: u32 = data.iter().map(|&b| b as u32).sum();
        assert_eq!(*bytes.last().unwrap(), 0xFF - (sum % 256) as u8);

        let decoded = decode_all(&bytes, false);
        assert_eq!(decoded, vec![frame]);
    }

    #[test]
    fn encode_escaped_reserves_control_bytes() {
        // A payload containing every special byte must not put any of them
        // on the wire (after the length field) unescaped.
        let frame = Frame::AtCommand {
            frame_id: 0x11, // XON, escaped as a payload byte
            command: *b"D0",
            parameter: vec![0x7E, 0x7D, 0x11, 0x13],
        };
        let bytes = encode(&frame, true);
        assert_eq!(bytes[0], START_DELIMITER);
        for &b in &bytes[3..] {
            assert_ne!(b, START_DELIMITER);
            assert_ne!(b, XON);
            assert_ne!(b, XOFF);
        }
    }

    // ---------------------------------------------------------------
    // Round trips
    // ---------------------------------------------------------------

    #[test]
    fn round_trip_plain() {
        let frame = sample_receive();
        assert_eq!(decode_all(&encode(&frame, false), false), vec![frame]);
    }

    #[test]
    fn round_trip_escaped_with_all_special_bytes() {
        let frame = Frame::AtCommand {
            frame_id: 0x7D,
            command: *b"NI",
            parameter: vec![0x7E, 0x7D, 0x11, 0x13, 0x00, 0xFF],
        };
        assert_eq!(decode_all(&encode(&frame, true), true), vec![frame]);
    }

    #[test]
    fn round_trip_every_variant() {
        use meshlink_core::{DeliveryStatus, DeviceType, RemoteNode};

        let frames = vec![
            Frame::AtCommand {
                frame_id: 5,
                command: *b"NT",
                parameter: vec![0x3C],
            },
            Frame::AtResponse {
                frame_id: 5,
                command: *b"NT",
                status: AtStatus::InvalidParameter,
                value: vec![0x01, 0x02],
            },
            Frame::TransmitRequest {
                frame_id: 9,
                dest64: Addr64::BROADCAST,
                dest16: Addr16::UNKNOWN,
                radius: 0,
                options: 0,
                payload: b"hello".to_vec(),
            },
            Frame::TransmitStatus {
                frame_id: 9,
                dest16: Addr16(0x0001),
                retries: 2,
                delivery: DeliveryStatus::NoAck,
                discovery: 0x02,
            },
            sample_receive(),
            Frame::ExplicitReceive {
                src64: Addr64(1),
                src16: Addr16(2),
                src_endpoint: 0xE8,
                dst_endpoint: 0xE8,
                cluster: 0x0011,
                profile: 0xC105,
                options: 0x01,
                payload: vec![1, 2, 3],
            },
            Frame::IoSample {
                src64: Addr64(3),
                src16: Addr16(4),
                options: 0x41,
                data: vec![0x01, 0x00, 0x20, 0x00, 0x14],
            },
            Frame::ModemStatus {
                status: ModemStatusCode::CoordinatorStarted,
            },
            Frame::DiscoveryNotice {
                node: RemoteNode {
                    addr64: Addr64(0x0013_A200_0000_0042),
                    addr16: Addr16(0x6789),
                    node_id: "SENSOR-7".into(),
                    device_type: DeviceType::EndDevice,
                },
            },
            Frame::Raw {
                frame_type: 0xF0,
                payload: vec![0xAA, 0xBB],
            },
        ];

        for frame in frames {
            assert_eq!(
                decode_all(&encode(&frame, false), false),
                vec![frame.clone()],
                "plain round trip failed for {frame:?}"
            );
            assert_eq!(
                decode_all(&encode(&frame, true), true),
                vec![frame.clone()],
                "escaped round trip failed for {frame:?}"
            );
        }
    }

    // ---------------------------------------------------------------
    // Corruption and resynchronization
    // ---------------------------------------------------------------

    #[test]
    fn single_bit_flip_is_rejected_not_misread() {
        let frame = sample_receive();
        let clean = encode(&frame, false);

        // Flip every bit of every data byte (after the length field), one
        // at a time. The decoder must never produce a frame equal to a
        // *different* valid interpretation of the corrupted input -- at
        // most it resyncs to nothing.
        for i in 3..clean.len() {
            for bit in 0..8 {
                let mut corrupted = clean.clone();
                corrupted[i] ^= 1 << bit;
                let frames = decode_all(&corrupted, false);
                assert!(
                    frames.is_empty(),
                    "corrupted byte {i} bit {bit} produced {frames:?}"
                );
            }
        }
    }

    #[test]
    fn resync_recovers_frames_around_corruption() {
        let first = Frame::ModemStatus {
            status: ModemStatusCode::Associated,
        };
        let second = sample_receive();

        let mut stream = encode(&first, false);
        // A corrupted frame: valid delimiter and length, garbage checksum.
        stream.extend_from_slice(&[0x7E, 0x00, 0x03, 0x8A, 0x01, 0xFF, 0x00]);
        stream.extend_from_slice(&encode(&second, false));

        let frames = decode_all(&stream, false);
        assert_eq!(frames, vec![first, second]);
    }

    #[test]
    fn garbage_before_frame_is_skipped() {
        let frame = sample_receive();
        let mut stream = vec![0x00, 0x42, 0x13, 0x37];
        stream.extend_from_slice(&encode(&frame, false));

        let mut dec = Decoder::new(false);
        dec.extend(&stream);
        assert_eq!(dec.next_frame(), Some(frame));
        assert_eq!(dec.discarded(), 4);
    }

    #[test]
    fn implausible_length_resyncs() {
        let frame = sample_receive();
        let mut stream = vec![0x7E, 0xFF, 0xFF, 0x01, 0x02];
        stream.extend_from_slice(&encode(&frame, false));
        assert_eq!(decode_all(&stream, false), vec![frame]);
    }

    #[test]
    fn zero_length_resyncs() {
        let frame = sample_receive();
        let mut stream = vec![0x7E, 0x00, 0x00];
        stream.extend_from_slice(&encode(&frame, false));
        assert_eq!(decode_all(&stream, false), vec![frame]);
    }

    #[test]
    fn frame_split_across_reads() {
        let frame = sample_receive();
        let bytes = encode(&frame, false);

        // Feed one byte at a time; the frame must appear exactly once,
        // only after the final byte.
        let mut dec = Decoder::new(false);
        for &b in &bytes[..bytes.len() - 1] {
            dec.extend(&[b]);
            assert_eq!(dec.next_frame(), None);
        }
        dec.extend(&[bytes[bytes.len() - 1]]);
        assert_eq!(dec.next_frame(), Some(frame));
        assert_eq!(dec.next_frame(), None);
    }

    #[test]
    fn escaped_split_inside_escape_sequence() {
        let frame = Frame::AtCommand {
            frame_id: 1,
            command: *b"NI",
            parameter: vec![0x7E],
        };
        let bytes = encode(&frame, true);

        // Split exactly at the escape marker of the 0x7E payload byte.
        let esc_pos = bytes
            .iter()
            .rposition(|&b| b == ESCAPE)
            .expect("escape marker present");
        let mut dec = Decoder::new(true);
        dec.extend(&bytes[..=esc_pos]);
        assert_eq!(dec.next_frame(), None);
        dec.extend(&bytes[esc_pos + 1..]);
        assert_eq!(dec.next_frame(), Some(frame));
    }

    #[test]
    fn escaped_mode_truncated_frame_recovers_on_next_delimiter() {
        let good = Frame::ModemStatus {
            status: ModemStatusCode::Associated,
        };
        // A frame header promising 6 data bytes, cut off by a new frame.
        let mut stream = vec![0x7E, 0x00, 0x06, 0x8A, 0x02];
        stream.extend_from_slice(&encode(&good, true));

        assert_eq!(decode_all(&stream, true), vec![good]);
    }

    #[test]
    fn back_to_back_frames() {
        let a = Frame::ModemStatus {
            status: ModemStatusCode::Associated,
        };
        let b = sample_receive();
        let mut stream = encode(&a, false);
        stream.extend_from_slice(&encode(&b, false));
        assert_eq!(decode_all(&stream, false), vec![a, b]);
    }

    #[test]
    fn reset_drops_buffered_bytes() {
        let mut dec = Decoder::new(false);
        dec.extend(&[0x7E, 0x00, 0x10, 0x01]);
        assert_eq!(dec.next_frame(), None);
        assert_eq!(dec.buffered(), 4);
        dec.reset();
        assert_eq!(dec.buffered(), 0);
        assert_eq!(dec.discarded(), 4);
    }
}
