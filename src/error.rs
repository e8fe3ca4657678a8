//! Error types for the harp-loadcells library.

use bytes::Bytes;
use thiserror::Error;

use crate::protocol::{ElementType, MessageType};

/// The main error type for harp-loadcells operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A command failed.
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// Connecting to the device failed.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The register address is not part of the catalog.
    #[error(transparent)]
    UnknownRegister(#[from] UnknownRegister),

    /// The register does not support the requested operation.
    #[error("register {address} ({name}) does not support {operation}")]
    Unsupported {
        address: u8,
        name: &'static str,
        operation: &'static str,
    },

    /// The requested value type does not fit the register shape.
    #[error("register {address} ({name}) holds {count} x {element:?}: {reason}")]
    TypeMismatch {
        address: u8,
        name: &'static str,
        element: ElementType,
        count: usize,
        reason: &'static str,
    },

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// Connection is already established.
    #[error("already connected")]
    AlreadyConnected,
}

/// Frame-specific errors.
///
/// These are recovered locally by the reader loop and never reach callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Not enough bytes buffered for the declared frame length.
    #[error("incomplete frame: expected {expected} bytes, got {got}")]
    Incomplete { expected: usize, got: usize },

    /// Trailing checksum byte does not match the byte sum.
    #[error("checksum mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// Message type byte is not a known tag.
    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),

    /// Payload type byte is not a known tag.
    #[error("unknown payload type 0x{0:02x}")]
    UnknownPayloadType(u8),

    /// Declared length cannot hold the frame header.
    #[error("invalid frame length {0}")]
    InvalidLength(usize),

    /// Payload length is not a whole number of elements, or too large.
    #[error("invalid payload length {len} for {element:?}")]
    InvalidPayloadLength { len: usize, element: ElementType },
}

/// Errors surfaced by a correlated command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// No reply arrived before the timeout.
    #[error("register {address}: no reply after {timeout_ms}ms")]
    Timeout { address: u8, timeout_ms: u64 },

    /// Another command for the same register is still in flight.
    #[error("register {address}: another command is in flight")]
    Busy { address: u8 },

    /// Device answered with a `ReadError`/`WriteError` frame.
    #[error("register {address}: device rejected the command (payload {})", hex::encode(.payload))]
    DeviceRejected { address: u8, payload: Bytes },

    /// Connection dropped before a reply arrived.
    #[error("disconnected")]
    Disconnected,

    /// Writing the request to the transport failed.
    #[error("transport write failed: {0}")]
    Transport(#[source] std::io::Error),

    /// Only `Read` and `Write` messages can be issued as commands.
    #[error("cannot issue a {0:?} message as a command")]
    InvalidRequest(MessageType),
}

/// Errors surfaced while connecting to a device.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The transport could not be opened.
    #[error("port {port} unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },

    /// The device did not answer the WhoAmI read in time.
    #[error("no identify reply from {port} within {timeout_ms}ms")]
    IdentifyTimeout { port: String, timeout_ms: u64 },

    /// The device on the port is not a LoadCells board.
    #[error("unexpected device id {found} on {port} (expected {expected})")]
    UnexpectedDevice {
        port: String,
        expected: u16,
        found: u16,
    },

    /// A mandatory identity read failed.
    #[error("identify failed on {port}: {source}")]
    Identify {
        port: String,
        #[source]
        source: Box<Error>,
    },
}

/// Lookup of an address that is not in the register catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown register {0}")]
pub struct UnknownRegister(pub u8);

/// Result type alias for harp-loadcells operations.
pub type Result<T> = std::result::Result<T, Error>;
