//! Typed register values.
//!
//! This module contains the Rust types exchanged with the device:
//! - The `RegisterValue` conversion trait and its primitive impls
//! - Bit-set registers (events, outputs, reset commands)
//! - Device identity and LoadCells-specific registers
//! - The full application configuration snapshot

pub mod configuration;
pub mod device;
pub mod flags;
pub mod value;

pub use configuration::LoadCellsConfiguration;
pub use device::{
    DeviceIdentity, DeviceName, DigitalInputMode, DigitalOutputMode, HarpVersion,
    LOAD_CELL_CHANNELS, LoadCellChannel, LoadCellData,
};
pub use flags::{DigitalOutputs, EventFlags, ResetFlags};
pub use value::{RegisterValue, Timestamped};
