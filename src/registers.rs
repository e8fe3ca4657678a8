//! Register catalog for the Harp LoadCells device.
//!
//! Every register the library can address is listed once in [`CATALOG`],
//! with its element type, element count and capabilities. The table is
//! immutable, so lookups need no locking.

use crate::error::UnknownRegister;
use crate::protocol::{ElementType, Message};

/// Device identity reported by the WhoAmI register.
pub const WHO_AM_I: u16 = 1232;

/// Register capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    /// No capabilities.
    pub const NONE: Self = Self(0);

    /// Register can be read.
    pub const READ: Self = Self(1 << 0);

    /// Register can be written.
    pub const WRITE: Self = Self(1 << 1);

    /// Register emits events.
    pub const EVENT: Self = Self(1 << 2);

    /// Read and write.
    pub const READ_WRITE: Self = Self::READ.union(Self::WRITE);

    /// Read and event.
    pub const READ_EVENT: Self = Self::READ.union(Self::EVENT);

    /// Read, write and event.
    pub const ALL: Self = Self::READ_WRITE.union(Self::EVENT);

    /// Check if every capability in `other` is present.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Combines two capability sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Description of one register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDescriptor {
    /// Register address.
    pub address: u8,
    /// Register name as documented by the manufacturer.
    pub name: &'static str,
    /// Payload element type.
    pub element_type: ElementType,
    /// Number of elements.
    pub element_count: usize,
    /// Supported operations.
    pub capabilities: Capabilities,
}

impl RegisterDescriptor {
    const fn new(
        address: u8,
        name: &'static str,
        element_type: ElementType,
        element_count: usize,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            address,
            name,
            element_type,
            element_count,
            capabilities,
        }
    }

    /// Payload size in bytes.
    #[must_use]
    pub const fn payload_len(&self) -> usize {
        self.element_type.size() * self.element_count
    }

    /// Check if the register supports a capability.
    #[must_use]
    pub const fn supports(&self, capability: Capabilities) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Common Harp register addresses.
pub mod common {
    pub const WHO_AM_I: u8 = 0;
    pub const HARDWARE_VERSION_HIGH: u8 = 1;
    pub const HARDWARE_VERSION_LOW: u8 = 2;
    pub const ASSEMBLY_VERSION: u8 = 3;
    pub const CORE_VERSION_HIGH: u8 = 4;
    pub const CORE_VERSION_LOW: u8 = 5;
    pub const FIRMWARE_VERSION_HIGH: u8 = 6;
    pub const FIRMWARE_VERSION_LOW: u8 = 7;
    pub const TIMESTAMP_SECONDS: u8 = 8;
    pub const TIMESTAMP_MICROSECONDS: u8 = 9;
    pub const OPERATION_CONTROL: u8 = 10;
    pub const RESET_DEVICE: u8 = 11;
    pub const DEVICE_NAME: u8 = 12;
    pub const SERIAL_NUMBER: u8 = 13;
    pub const CLOCK_CONFIGURATION: u8 = 14;
}

/// LoadCells application register addresses.
pub mod app {
    pub const START_ACQUISITION: u8 = 32;
    pub const LOAD_CELL_DATA: u8 = 33;
    pub const INPUT_EVENT: u8 = 34;
    pub const OUTPUT_EVENT: u8 = 35;
    pub const DI0_MODE: u8 = 39;
    pub const DO0_MODE: u8 = 40;
    pub const DO0_PULSE_DURATION: u8 = 41;
    pub const OUTPUT_SET: u8 = 42;
    pub const OUTPUT_CLEAR: u8 = 43;
    pub const OUTPUT_TOGGLE: u8 = 44;
    pub const OUTPUT_STATE: u8 = 45;
    /// First of eight `OffsetLoadCellN` registers.
    pub const OFFSET_LOAD_CELL0: u8 = 48;
    /// First of eight `DOnTargetLoadCell` registers.
    pub const DO0_TARGET_LOAD_CELL: u8 = 58;
    /// First of eight `DOnThreshold` registers.
    pub const DO0_THRESHOLD: u8 = 66;
    /// First of eight `DOnBufferRisingEdge` registers.
    pub const DO0_BUFFER_RISING_EDGE: u8 = 74;
    /// First of eight `DOnBufferFallingEdge` registers.
    pub const DO0_BUFFER_FALLING_EDGE: u8 = 82;
    pub const ENABLE_EVENTS: u8 = 90;
}

use Capabilities as C;
use ElementType::{S16, U8, U16, U32};

/// Number of bytes in the device name register.
pub const DEVICE_NAME_LEN: usize = 25;

/// Every register known to the library, sorted by address.
pub static CATALOG: &[RegisterDescriptor] = &[
    RegisterDescriptor::new(0, "WhoAmI", U16, 1, C::READ),
    RegisterDescriptor::new(1, "HardwareVersionHigh", U8, 1, C::READ),
    RegisterDescriptor::new(2, "HardwareVersionLow", U8, 1, C::READ),
    RegisterDescriptor::new(3, "AssemblyVersion", U8, 1, C::READ),
    RegisterDescriptor::new(4, "CoreVersionHigh", U8, 1, C::READ),
    RegisterDescriptor::new(5, "CoreVersionLow", U8, 1, C::READ),
    RegisterDescriptor::new(6, "FirmwareVersionHigh", U8, 1, C::READ),
    RegisterDescriptor::new(7, "FirmwareVersionLow", U8, 1, C::READ),
    RegisterDescriptor::new(8, "TimestampSeconds", U32, 1, C::ALL),
    RegisterDescriptor::new(9, "TimestampMicroseconds", U16, 1, C::READ),
    RegisterDescriptor::new(10, "OperationControl", U8, 1, C::READ_WRITE),
    RegisterDescriptor::new(11, "ResetDevice", U8, 1, C::READ_WRITE),
    RegisterDescriptor::new(12, "DeviceName", U8, DEVICE_NAME_LEN, C::READ_WRITE),
    RegisterDescriptor::new(13, "SerialNumber", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(14, "ClockConfiguration", U8, 1, C::READ_WRITE),
    RegisterDescriptor::new(32, "StartAcquisition", U8, 1, C::READ_WRITE),
    RegisterDescriptor::new(33, "LoadCellData", S16, 8, C::READ_EVENT),
    RegisterDescriptor::new(34, "InputEvent", U8, 1, C::READ_EVENT),
    RegisterDescriptor::new(35, "OutputEvent", U8, 1, C::ALL),
    RegisterDescriptor::new(39, "DI0Mode", U8, 1, C::READ_WRITE),
    RegisterDescriptor::new(40, "DO0Mode", U8, 1, C::READ_WRITE),
    RegisterDescriptor::new(41, "DO0PulseDuration", U8, 1, C::READ_WRITE),
    RegisterDescriptor::new(42, "OutputSet", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(43, "OutputClear", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(44, "OutputToggle", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(45, "OutputState", U16, 1, C::ALL),
    RegisterDescriptor::new(48, "OffsetLoadCell0", S16, 1, C::READ_WRITE),
    RegisterDescriptor::new(49, "OffsetLoadCell1", S16, 1, C::READ_WRITE),
    RegisterDescriptor::new(50, "OffsetLoadCell2", S16, 1, C::READ_WRITE),
    RegisterDescriptor::new(51, "OffsetLoadCell3", S16, 1, C::READ_WRITE),
    RegisterDescriptor::new(52, "OffsetLoadCell4", S16, 1, C::READ_WRITE),
    RegisterDescriptor::new(53, "OffsetLoadCell5", S16, 1, C::READ_WRITE),
    RegisterDescriptor::new(54, "OffsetLoadCell6", S16, 1, C::READ_WRITE),
    RegisterDescriptor::new(55, "OffsetLoadCell7", S16, 1, C::READ_WRITE),
    RegisterDescriptor::new(58, "DO0TargetLoadCell", U8, 1, C::READ_WRITE),
    RegisterDescriptor::new(59, "DO1TargetLoadCell", U8, 1, C::READ_WRITE),
    RegisterDescriptor::new(60, "DO2TargetLoadCell", U8, 1, C::READ_WRITE),
    RegisterDescriptor::new(61, "DO3TargetLoadCell", U8, 1, C::READ_WRITE),
    RegisterDescriptor::new(62, "DO4TargetLoadCell", U8, 1, C::READ_WRITE),
    RegisterDescriptor::new(63, "DO5TargetLoadCell", U8, 1, C::READ_WRITE),
    RegisterDescriptor::new(64, "DO6TargetLoadCell", U8, 1, C::READ_WRITE),
    RegisterDescriptor::new(65, "DO7TargetLoadCell", U8, 1, C::READ_WRITE),
    RegisterDescriptor::new(66, "DO0Threshold", S16, 1, C::READ_WRITE),
    RegisterDescriptor::new(67, "DO1Threshold", S16, 1, C::READ_WRITE),
    RegisterDescriptor::new(68, "DO2Threshold", S16, 1, C::READ_WRITE),
    RegisterDescriptor::new(69, "DO3Threshold", S16, 1, C::READ_WRITE),
    RegisterDescriptor::new(70, "DO4Threshold", S16, 1, C::READ_WRITE),
    RegisterDescriptor::new(71, "DO5Threshold", S16, 1, C::READ_WRITE),
    RegisterDescriptor::new(72, "DO6Threshold", S16, 1, C::READ_WRITE),
    RegisterDescriptor::new(73, "DO7Threshold", S16, 1, C::READ_WRITE),
    RegisterDescriptor::new(74, "DO0BufferRisingEdge", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(75, "DO1BufferRisingEdge", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(76, "DO2BufferRisingEdge", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(77, "DO3BufferRisingEdge", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(78, "DO4BufferRisingEdge", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(79, "DO5BufferRisingEdge", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(80, "DO6BufferRisingEdge", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(81, "DO7BufferRisingEdge", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(82, "DO0BufferFallingEdge", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(83, "DO1BufferFallingEdge", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(84, "DO2BufferFallingEdge", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(85, "DO3BufferFallingEdge", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(86, "DO4BufferFallingEdge", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(87, "DO5BufferFallingEdge", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(88, "DO6BufferFallingEdge", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(89, "DO7BufferFallingEdge", U16, 1, C::READ_WRITE),
    RegisterDescriptor::new(90, "EnableEvents", U8, 1, C::READ_WRITE),
];

/// Looks up a register by address.
///
/// # Errors
///
/// Returns `UnknownRegister` if the address is not in the catalog.
pub fn lookup(address: u8) -> Result<&'static RegisterDescriptor, UnknownRegister> {
    CATALOG
        .binary_search_by_key(&address, |descriptor| descriptor.address)
        .map(|index| &CATALOG[index])
        .map_err(|_| UnknownRegister(address))
}

/// Looks up a register by name.
#[must_use]
pub fn by_name(name: &str) -> Option<&'static RegisterDescriptor> {
    CATALOG.iter().find(|descriptor| descriptor.name == name)
}

/// Reason an inbound message does not fit its register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    /// Address is not in the catalog.
    Unknown,
    /// Element type differs from the catalog.
    ElementType,
    /// Payload length differs from `element size * element count`.
    Length,
}

/// Validates an inbound message against its catalog entry.
///
/// Error replies are only checked for a known address, since the device
/// may report them with any payload shape.
///
/// # Errors
///
/// Returns the first mismatch found.
pub fn validate(message: &Message) -> Result<&'static RegisterDescriptor, Mismatch> {
    let descriptor = lookup(message.address()).map_err(|_| Mismatch::Unknown)?;
    if message.message_type().is_error() {
        return Ok(descriptor);
    }
    if message.element() != descriptor.element_type {
        return Err(Mismatch::ElementType);
    }
    if message.payload().len() != descriptor.payload_len() {
        return Err(Mismatch::Length);
    }
    Ok(descriptor)
}
