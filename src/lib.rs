//! # harp-loadcells
//!
//! A Rust client library for Harp `LoadCells` acquisition boards.
//!
//! This library provides async communication with `LoadCells` devices over
//! USB/Serial using the binary Harp protocol.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Table-driven register catalog with typed reads and writes
//! - Correlated commands with per-register single flight and timeouts
//! - Event subscriptions per register, usable as `futures::Stream`
//!
//! ## Quick Start
//!
//! ```no_run
//! use futures::StreamExt;
//! use harp_loadcells::{EventFlags, LoadCellData, registers::app};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), harp_loadcells::Error> {
//!     // Connect to a LoadCells board
//!     let mut device = harp_loadcells::connect("/dev/ttyACM0").await?;
//!     if let Some(identity) = device.identity() {
//!         println!("Connected to: {} (firmware {})", identity.name, identity.firmware_version);
//!     }
//!
//!     // Stream load cell samples
//!     let mut samples = device.events::<LoadCellData>(app::LOAD_CELL_DATA)?;
//!     device.set_enabled_events(EventFlags::LOAD_CELL_DATA).await?;
//!     device.start_acquisition().await?;
//!     for _ in 0..10 {
//!         if let Some(sample) = samples.next().await {
//!             println!("{:?}", sample.value.channels);
//!         }
//!     }
//!
//!     device.stop_acquisition().await?;
//!     device.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Wire format (messages, payload types, frame codec)
//! - [`registers`] - Register catalog of the common and `LoadCells` registers
//! - [`types`] - Typed register values (flags, modes, configuration)
//! - [`transport`] - Transport implementations and the reader loop
//! - [`commands`] - Correlation of commands with their replies
//! - [`event`] - Fan-out of device events to subscribers
//! - [`client`] - High-level [`Device`] façade

pub mod client;
pub mod commands;
pub mod error;
pub mod event;
pub mod protocol;
pub mod registers;
pub mod transport;
pub mod types;

#[cfg(test)]
mod sim;

// Re-exports for convenience
pub use client::{Device, DeviceConfig, DeviceState, connect};
pub use commands::CommandCorrelator;
pub use error::{CommandError, ConnectionError, Error, FrameError, Result, UnknownRegister};
pub use event::{AddressFilter, EventMultiplexer, EventStream, Subscription};
pub use protocol::{ElementType, FrameDecoder, Message, MessageType, PayloadType, Timestamp};
pub use registers::{Capabilities, RegisterDescriptor};
pub use transport::{SerialConfig, SerialTransport, StreamTransport, Transport, list_ports};
pub use types::{
    DeviceIdentity, DeviceName, DigitalInputMode, DigitalOutputMode, DigitalOutputs, EventFlags,
    HarpVersion, LoadCellChannel, LoadCellData, LoadCellsConfiguration, RegisterValue,
    ResetFlags, Timestamped,
};
