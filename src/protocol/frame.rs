//! Frame encoding and decoding for the Harp protocol.
//!
//! The wire format is:
//! ```text
//! ┌──────┬────────┬─────────┬──────┬──────────────┬──────────────┬──────────┬──────────┐
//! │ type │ length │ address │ port │ payload type │ [timestamp]  │ payload  │ checksum │
//! │  1   │   1    │    1    │  1   │      1       │ 4 + 2 (LE)   │  n (LE)  │    1     │
//! └──────┴────────┴─────────┴──────┴──────────────┴──────────────┴──────────┴──────────┘
//! ```
//!
//! `length` counts every byte after itself, checksum included. The checksum
//! is the modulo-256 sum of every byte before it.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol::message::{Message, MessageType, Timestamp};
use crate::protocol::payload::PayloadType;

/// Bytes before the length-counted region (type + length).
const PREFIX_LEN: usize = 2;

/// Smallest valid length field: address, port, payload type, checksum.
pub const MIN_LENGTH: usize = 4;

/// Smallest complete frame.
pub const MIN_FRAME_SIZE: usize = PREFIX_LEN + MIN_LENGTH;

/// Offset of the payload type byte.
const PAYLOAD_TYPE_OFFSET: usize = 4;

/// Computes the modulo-256 sum of a byte slice.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Encodes a message into a frame.
#[must_use]
pub fn encode(message: &Message) -> Bytes {
    let total = message.encoded_len();
    let mut buf = BytesMut::with_capacity(total);

    buf.put_u8(message.message_type().to_byte());
    // Message construction bounds the payload, so this always fits.
    buf.put_u8((total - PREFIX_LEN) as u8);
    buf.put_u8(message.address());
    buf.put_u8(message.port());
    buf.put_u8(message.payload_type().to_byte());
    if let Some(ts) = message.timestamp() {
        buf.put_u32_le(ts.seconds);
        buf.put_u16_le(ts.ticks);
    }
    buf.put_slice(message.payload());
    buf.put_u8(checksum(&buf));

    buf.freeze()
}

/// Returns the declared frame size, if the length byte is visible.
#[must_use]
pub fn declared_len(buf: &[u8]) -> Option<usize> {
    buf.get(1).map(|len| PREFIX_LEN + usize::from(*len))
}

/// Decodes one frame from the start of `buf`.
///
/// Bytes beyond the declared frame length are ignored. The checksum is
/// verified before any field is interpreted.
///
/// # Errors
///
/// Returns `Incomplete` if fewer bytes than declared are available (retry
/// once more data arrives), `ChecksumMismatch` if the trailing byte does not
/// match, or another `FrameError` for a structurally invalid frame.
pub fn decode(buf: &[u8]) -> Result<Message, FrameError> {
    let Some(total) = declared_len(buf) else {
        return Err(FrameError::Incomplete {
            expected: MIN_FRAME_SIZE,
            got: buf.len(),
        });
    };
    if total < MIN_FRAME_SIZE {
        return Err(FrameError::InvalidLength(total - PREFIX_LEN));
    }
    if buf.len() < total {
        return Err(FrameError::Incomplete {
            expected: total,
            got: buf.len(),
        });
    }

    let frame = &buf[..total];
    let expected = checksum(&frame[..total - 1]);
    let actual = frame[total - 1];
    if expected != actual {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }

    let message_type =
        MessageType::from_byte(frame[0]).ok_or(FrameError::UnknownMessageType(frame[0]))?;
    let payload_type = PayloadType::from_byte(frame[PAYLOAD_TYPE_OFFSET])
        .ok_or(FrameError::UnknownPayloadType(frame[PAYLOAD_TYPE_OFFSET]))?;
    let address = frame[2];
    let port = frame[3];

    let mut body = &frame[PAYLOAD_TYPE_OFFSET + 1..total - 1];
    let timestamp = if payload_type.timestamped {
        if body.len() < Timestamp::SIZE {
            return Err(FrameError::InvalidLength(total - PREFIX_LEN));
        }
        let seconds = body.get_u32_le();
        let ticks = body.get_u16_le();
        Some(Timestamp::new(seconds, ticks))
    } else {
        None
    };

    let message = Message::new(
        message_type,
        address,
        payload_type.element,
        Bytes::copy_from_slice(body),
    )?
    .with_port(port);

    Ok(match timestamp {
        Some(ts) => message.with_timestamp(ts),
        None => message,
    })
}

/// Checks whether a partially received header could start a valid frame.
fn plausible_header(buf: &[u8]) -> Result<(), FrameError> {
    if let Some(&tag) = buf.first() {
        if MessageType::from_byte(tag).is_none() {
            return Err(FrameError::UnknownMessageType(tag));
        }
    }
    let Some(total) = declared_len(buf) else {
        return Ok(());
    };
    let length = total - PREFIX_LEN;
    if length < MIN_LENGTH {
        return Err(FrameError::InvalidLength(length));
    }
    if let Some(&byte) = buf.get(PAYLOAD_TYPE_OFFSET) {
        let payload_type =
            PayloadType::from_byte(byte).ok_or(FrameError::UnknownPayloadType(byte))?;
        let header = MIN_LENGTH + if payload_type.timestamped { Timestamp::SIZE } else { 0 };
        let Some(payload_len) = length.checked_sub(header) else {
            return Err(FrameError::InvalidLength(length));
        };
        if payload_len % payload_type.element.size() != 0 {
            return Err(FrameError::InvalidPayloadLength {
                len: payload_len,
                element: payload_type.element,
            });
        }
    }
    Ok(())
}

/// Frame decoder that handles partial data and resynchronisation.
///
/// On any framing error exactly one byte is discarded and decoding resumes
/// at the next offset, so recovering from noise costs at most one step per
/// garbage byte. A plausible but incomplete header is abandoned as soon as
/// a complete, checksum-valid frame is buffered behind it.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    resyncs: u64,
}

impl FrameDecoder {
    /// Creates a new frame decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            resyncs: 0,
        }
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete frame.
    ///
    /// Returns `Ok(Some(message))` if a frame was decoded, `Ok(None)` if more
    /// data is needed, or the error that caused one byte to be skipped.
    /// Call again after an error to continue from the next offset.
    ///
    /// # Errors
    ///
    /// Returns the `FrameError` that triggered a resync step.
    pub fn decode(&mut self) -> Result<Option<Message>, FrameError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match decode(&self.buffer) {
            Ok(message) => {
                self.buffer.advance(message.encoded_len());
                Ok(Some(message))
            }
            Err(FrameError::Incomplete { expected, got }) => match plausible_header(&self.buffer) {
                Ok(()) if !self.frame_follows() => Ok(None),
                Ok(()) => {
                    self.skip();
                    Err(FrameError::Incomplete { expected, got })
                }
                Err(e) => {
                    self.skip();
                    Err(e)
                }
            },
            Err(e) => {
                self.skip();
                Err(e)
            }
        }
    }

    /// Checks whether a complete frame starts past the head of the buffer.
    fn frame_follows(&self) -> bool {
        (1..self.buffer.len()).any(|offset| decode(&self.buffer[offset..]).is_ok())
    }

    fn skip(&mut self) {
        self.buffer.advance(1);
        self.resyncs += 1;
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the number of resync steps taken so far.
    #[must_use]
    pub const fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
