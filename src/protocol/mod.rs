//! Protocol definitions for Harp communication.
//!
//! This module contains the low-level protocol types including:
//! - Frame encoding/decoding with checksum validation
//! - Message and message type definitions
//! - Payload element types

pub mod frame;
pub mod message;
pub mod payload;

pub use frame::{FrameDecoder, MIN_FRAME_SIZE, checksum, decode, encode};
pub use message::{DEFAULT_PORT, MAX_PAYLOAD_LEN, Message, MessageType, Timestamp};
pub use payload::{Element, ElementType, PayloadType, TIMESTAMP_FLAG};
