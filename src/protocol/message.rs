//! Harp message model.

use bytes::Bytes;

use crate::error::FrameError;
use crate::protocol::payload::{Element, ElementType, PayloadType};

/// Default port used by the host side of the link.
pub const DEFAULT_PORT: u8 = 255;

/// Largest payload that fits the one-byte length field.
///
/// Length counts address, port, payload type, timestamp, payload and checksum.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize - 4 - Timestamp::SIZE;

/// Harp message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Register read (request and reply).
    Read,
    /// Register write (request and acknowledgement).
    Write,
    /// Unsolicited register update.
    Event,
    /// Device rejected a read.
    ReadError,
    /// Device rejected a write.
    WriteError,
}

/// Wire tags for each message type.
const MESSAGE_TAGS: [(MessageType, u8); 5] = [
    (MessageType::Read, 1),
    (MessageType::Write, 2),
    (MessageType::Event, 3),
    (MessageType::ReadError, 9),
    (MessageType::WriteError, 10),
];

impl MessageType {
    /// Parses a message type from its wire tag.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        MESSAGE_TAGS
            .iter()
            .find(|(_, tag)| *tag == byte)
            .map(|(kind, _)| *kind)
    }

    /// Returns the wire tag.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        MESSAGE_TAGS
            .iter()
            .find(|(kind, _)| *kind == self)
            .map_or(0, |(_, tag)| *tag)
    }

    /// Returns true for `ReadError` and `WriteError`.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, Self::ReadError | Self::WriteError)
    }

    /// Returns the command kind a reply of this type answers.
    ///
    /// Events answer nothing.
    #[must_use]
    pub const fn command_kind(self) -> Option<Self> {
        match self {
            Self::Read | Self::ReadError => Some(Self::Read),
            Self::Write | Self::WriteError => Some(Self::Write),
            Self::Event => None,
        }
    }
}

/// Device timestamp: whole seconds plus a fraction in 32 µs ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    /// Seconds since the device epoch.
    pub seconds: u32,
    /// Fractional part in 32 µs units.
    pub ticks: u16,
}

impl Timestamp {
    /// Encoded size in bytes.
    pub const SIZE: usize = 6;

    /// Duration of one fractional tick in microseconds.
    pub const TICK_MICROS: u32 = 32;

    /// Creates a timestamp.
    #[must_use]
    pub const fn new(seconds: u32, ticks: u16) -> Self {
        Self { seconds, ticks }
    }

    /// Fractional part in microseconds.
    #[must_use]
    pub const fn micros(self) -> u32 {
        self.ticks as u32 * Self::TICK_MICROS
    }

    /// Timestamp as fractional seconds.
    #[must_use]
    pub fn as_secs_f64(self) -> f64 {
        f64::from(self.seconds) + f64::from(self.micros()) * 1e-6
    }
}

/// A single Harp message.
///
/// The timestamped bit of the payload type is derived from whether a
/// timestamp is present, so the two can never disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    message_type: MessageType,
    address: u8,
    port: u8,
    element: ElementType,
    timestamp: Option<Timestamp>,
    payload: Bytes,
}

impl Message {
    /// Creates a message.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPayloadLength` if the payload is not a whole number of
    /// elements or does not fit in a frame.
    pub fn new(
        message_type: MessageType,
        address: u8,
        element: ElementType,
        payload: impl Into<Bytes>,
    ) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() % element.size() != 0 || payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::InvalidPayloadLength {
                len: payload.len(),
                element,
            });
        }
        Ok(Self {
            message_type,
            address,
            port: DEFAULT_PORT,
            element,
            timestamp: None,
            payload,
        })
    }

    /// Creates a read request for a register.
    #[must_use]
    pub const fn read(address: u8, element: ElementType) -> Self {
        Self {
            message_type: MessageType::Read,
            address,
            port: DEFAULT_PORT,
            element,
            timestamp: None,
            payload: Bytes::new(),
        }
    }

    /// Creates a write request for a register.
    pub fn write(
        address: u8,
        element: ElementType,
        payload: impl Into<Bytes>,
    ) -> Result<Self, FrameError> {
        Self::new(MessageType::Write, address, element, payload)
    }

    /// Creates a message from a slice of elements.
    pub fn from_values<T: Element>(
        message_type: MessageType,
        address: u8,
        values: &[T],
    ) -> Result<Self, FrameError> {
        let mut buf = Vec::with_capacity(values.len() * T::TYPE.size());
        for value in values {
            value.put(&mut buf);
        }
        Self::new(message_type, address, T::TYPE, buf)
    }

    /// Sets the port.
    #[must_use]
    pub fn with_port(mut self, port: u8) -> Self {
        self.port = port;
        self
    }

    /// Attaches a timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Returns a copy with a different message type.
    #[must_use]
    pub fn with_type(&self, message_type: MessageType) -> Self {
        Self {
            message_type,
            ..self.clone()
        }
    }

    /// Returns the message type.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Returns the register address.
    #[must_use]
    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Returns the port.
    #[must_use]
    pub const fn port(&self) -> u8 {
        self.port
    }

    /// Returns the element type.
    #[must_use]
    pub const fn element(&self) -> ElementType {
        self.element
    }

    /// Returns the payload type byte fields.
    #[must_use]
    pub const fn payload_type(&self) -> PayloadType {
        PayloadType {
            element: self.element,
            timestamped: self.timestamp.is_some(),
        }
    }

    /// Returns the timestamp, if present.
    #[must_use]
    pub const fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    /// Returns the raw payload.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Number of elements in the payload.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.payload.len() / self.element.size()
    }

    /// Decodes the payload as elements of `T`.
    ///
    /// Returns `None` if `T` does not match the payload element type.
    #[must_use]
    pub fn values<T: Element>(&self) -> Option<Vec<T>> {
        if T::TYPE != self.element {
            return None;
        }
        let mut buf = &self.payload[..];
        Some((0..self.element_count()).map(|_| T::get(&mut buf)).collect())
    }

    /// Total encoded size in bytes, including type, length and checksum.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let timestamp = if self.timestamp.is_some() {
            Timestamp::SIZE
        } else {
            0
        };
        6 + timestamp + self.payload.len()
    }
}
