//! Device information and LoadCells register types.

use std::fmt;

use crate::protocol::ElementType;
use crate::registers::DEVICE_NAME_LEN;
use crate::types::value::RegisterValue;

/// Number of load cell channels.
pub const LOAD_CELL_CHANNELS: usize = 8;

/// Major/minor version pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HarpVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

impl HarpVersion {
    /// Creates a version.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for HarpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Identity captured during the connection handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Device family identifier.
    pub who_am_i: u16,
    /// Device name.
    pub name: String,
    /// Hardware version.
    pub hardware_version: HarpVersion,
    /// Firmware version.
    pub firmware_version: HarpVersion,
    /// Serial number, if the unit has one.
    pub serial_number: Option<u16>,
}

/// Contents of the `DeviceName` register.
///
/// Stored on the device as a fixed, NUL padded byte array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DeviceName(pub String);

impl RegisterValue for DeviceName {
    const ELEMENT: ElementType = ElementType::U8;
    const COUNT: Option<usize> = Some(DEVICE_NAME_LEN);

    fn decode(payload: &[u8]) -> Option<Self> {
        let len = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        Some(Self(String::from_utf8_lossy(&payload[..len]).into_owned()))
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        // Keep at least one terminating NUL.
        let mut len = self.0.len().min(DEVICE_NAME_LEN - 1);
        while !self.0.is_char_boundary(len) {
            len -= 1;
        }
        buf.extend_from_slice(&self.0.as_bytes()[..len]);
        buf.resize(buf.len() + DEVICE_NAME_LEN - len, 0);
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Latest reading of all load cell channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadCellData {
    /// Raw channel values.
    pub channels: [i16; LOAD_CELL_CHANNELS],
}

impl LoadCellData {
    /// Returns the value of channel `index`.
    #[must_use]
    pub fn channel(&self, index: usize) -> Option<i16> {
        self.channels.get(index).copied()
    }
}

impl RegisterValue for LoadCellData {
    const ELEMENT: ElementType = ElementType::S16;
    const COUNT: Option<usize> = Some(LOAD_CELL_CHANNELS);

    fn decode(payload: &[u8]) -> Option<Self> {
        <[i16; LOAD_CELL_CHANNELS]>::decode(payload).map(|channels| Self { channels })
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        self.channels.encode(buf);
    }
}

macro_rules! register_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$variant_meta:meta])* $variant:ident = $value:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $( $(#[$variant_meta])* $variant = $value, )*
        }

        impl $name {
            /// Parses the value from a byte.
            #[must_use]
            pub const fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $( $value => Some(Self::$variant), )*
                    _ => None,
                }
            }

            /// Returns the raw byte.
            #[must_use]
            pub const fn as_byte(self) -> u8 {
                self as u8
            }
        }

        impl RegisterValue for $name {
            const ELEMENT: ElementType = ElementType::U8;
            const COUNT: Option<usize> = Some(1);

            fn decode(payload: &[u8]) -> Option<Self> {
                u8::decode(payload).and_then(Self::from_byte)
            }

            fn encode(&self, buf: &mut Vec<u8>) {
                buf.push(self.as_byte());
            }
        }
    };
}

register_enum! {
    /// Function of digital input 0 (`DI0Mode`).
    DigitalInputMode {
        /// Plain digital input.
        Sync = 0,
        /// Start acquisition on a rising edge, stop on a falling edge.
        RiseStartAcquisition = 1,
        /// Start acquisition on a falling edge, stop on a rising edge.
        FallStartAcquisition = 2,
    }
}

register_enum! {
    /// Function of digital output 0 (`DO0Mode`).
    DigitalOutputMode {
        /// Plain digital output.
        Digital = 0,
        /// Toggle every second while acquiring.
        ToggleEachSecond = 1,
        /// High for `DO0PulseDuration` milliseconds when written.
        Pulse = 2,
    }
}

register_enum! {
    /// Load cell channel feeding a digital output threshold filter.
    LoadCellChannel {
        Channel0 = 0,
        Channel1 = 1,
        Channel2 = 2,
        Channel3 = 3,
        Channel4 = 4,
        Channel5 = 5,
        Channel6 = 6,
        Channel7 = 7,
        /// Filter disabled, output driven by software.
        Software = 8,
    }
}
