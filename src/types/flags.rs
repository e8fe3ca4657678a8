//! Bit-set register values.

use crate::protocol::{Element, ElementType};
use crate::registers::app;
use crate::types::value::RegisterValue;

macro_rules! bit_set {
    (
        $(#[$meta:meta])*
        $name:ident($repr:ty) {
            $( $(#[$flag_meta:meta])* $flag:ident = $bit:expr; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub struct $name($repr);

        impl $name {
            /// No flags set.
            pub const NONE: Self = Self(0);

            $( $(#[$flag_meta])* pub const $flag: Self = Self($bit); )*

            /// Every named flag.
            pub const ALL: Self = Self(0 $(| $bit)*);

            /// Creates flags from raw bits, keeping unnamed bits.
            #[must_use]
            pub const fn from_bits(bits: $repr) -> Self {
                Self(bits)
            }

            /// Returns the raw bits.
            #[must_use]
            pub const fn bits(self) -> $repr {
                self.0
            }

            /// Check if every flag in `other` is set.
            #[must_use]
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Returns the flags set in either operand.
            #[must_use]
            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            /// Returns the flags set in both operands.
            #[must_use]
            pub const fn intersection(self, other: Self) -> Self {
                Self(self.0 & other.0)
            }

            /// Returns `self` without the flags in `other`.
            #[must_use]
            pub const fn difference(self, other: Self) -> Self {
                Self(self.0 & !other.0)
            }

            /// Sets the flags in `other`.
            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            /// Clears the flags in `other`.
            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            /// Sets or clears the flags in `other`.
            pub fn set(&mut self, other: Self, value: bool) {
                if value {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }

            /// Returns true if no flag is set.
            #[must_use]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }
        }

        impl RegisterValue for $name {
            const ELEMENT: ElementType = <$repr as Element>::TYPE;
            const COUNT: Option<usize> = Some(1);

            fn decode(payload: &[u8]) -> Option<Self> {
                <$repr as RegisterValue>::decode(payload).map(Self)
            }

            fn encode(&self, buf: &mut Vec<u8>) {
                self.0.encode(buf);
            }
        }
    };
}

bit_set! {
    /// Events enabled through the `EnableEvents` register.
    EventFlags(u8) {
        /// `LoadCellData` events.
        LOAD_CELL_DATA = 0x01;
        /// Digital input 0 (`InputEvent`) events.
        DI0 = 0x02;
        /// Digital output 0 (`OutputEvent`) events.
        DO0 = 0x04;
        /// Threshold events.
        THRESHOLDS = 0x08;
    }
}

impl EventFlags {
    /// Registers whose events are governed by the flags in `self`.
    ///
    /// `THRESHOLDS` has no event register on this device and maps to none.
    #[must_use]
    pub fn registers(self) -> Vec<u8> {
        let mut registers = Vec::new();
        if self.contains(Self::LOAD_CELL_DATA) {
            registers.push(app::LOAD_CELL_DATA);
        }
        if self.contains(Self::DI0) {
            registers.push(app::INPUT_EVENT);
        }
        if self.contains(Self::DO0) {
            registers.push(app::OUTPUT_EVENT);
        }
        registers
    }
}

bit_set! {
    /// Digital outputs addressed by the `OutputSet`/`OutputClear`/
    /// `OutputToggle`/`OutputState` registers.
    DigitalOutputs(u16) {
        DO0 = 1 << 0;
        DO1 = 1 << 1;
        DO2 = 1 << 2;
        DO3 = 1 << 3;
        DO4 = 1 << 4;
        DO5 = 1 << 5;
        DO6 = 1 << 6;
        DO7 = 1 << 7;
        DO8 = 1 << 8;
    }
}

impl DigitalOutputs {
    /// Returns the flag for output `index`, if it exists.
    #[must_use]
    pub const fn output(index: u8) -> Option<Self> {
        if index <= 8 {
            Some(Self(1 << index))
        } else {
            None
        }
    }
}

bit_set! {
    /// Commands written to the `ResetDevice` register.
    ResetFlags(u8) {
        /// Reset and restore default register values.
        RESTORE_DEFAULT = 0x01;
        /// Reset and restore register values from non-volatile memory.
        RESTORE_EEPROM = 0x02;
        /// Save current register values to non-volatile memory.
        SAVE = 0x04;
        /// Reset and restore the default device name.
        RESTORE_NAME = 0x08;
        /// Boot from default values (read-only status).
        BOOT_FROM_DEFAULT = 0x40;
        /// Boot from non-volatile memory (read-only status).
        BOOT_FROM_EEPROM = 0x80;
    }
}
