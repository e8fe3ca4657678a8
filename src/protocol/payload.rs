//! Payload type definitions for the Harp protocol.
//!
//! The payload type byte carries the element size in its low nibble, a
//! signed flag (`0x80`), a float flag (`0x40`) and the timestamp flag (`0x10`).

use bytes::{Buf, BufMut};

/// Flag marking a timestamped payload.
pub const TIMESTAMP_FLAG: u8 = 0x10;

/// Element type of a register payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 8-bit integer.
    S8,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 16-bit integer.
    S16,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 32-bit integer.
    S32,
    /// Unsigned 64-bit integer.
    U64,
    /// Signed 64-bit integer.
    S64,
    /// 32-bit IEEE float.
    Float,
}

/// Wire tags for each element type.
const ELEMENT_TAGS: [(ElementType, u8); 9] = [
    (ElementType::U8, 0x01),
    (ElementType::S8, 0x81),
    (ElementType::U16, 0x02),
    (ElementType::S16, 0x82),
    (ElementType::U32, 0x04),
    (ElementType::S32, 0x84),
    (ElementType::U64, 0x08),
    (ElementType::S64, 0x88),
    (ElementType::Float, 0x44),
];

impl ElementType {
    /// All element types, in tag table order.
    pub const ALL: [Self; 9] = [
        Self::U8,
        Self::S8,
        Self::U16,
        Self::S16,
        Self::U32,
        Self::S32,
        Self::U64,
        Self::S64,
        Self::Float,
    ];

    /// Size of one element in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        (self.tag() & 0x0F) as usize
    }

    /// Returns the wire tag (without the timestamp flag).
    #[must_use]
    pub const fn tag(self) -> u8 {
        let mut i = 0;
        while i < ELEMENT_TAGS.len() {
            if ELEMENT_TAGS[i].0 as u8 == self as u8 {
                return ELEMENT_TAGS[i].1;
            }
            i += 1;
        }
        unreachable!()
    }

    /// Parses an element type from a wire tag (timestamp flag cleared).
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        ELEMENT_TAGS
            .iter()
            .find(|(_, t)| *t == tag)
            .map(|(element, _)| *element)
    }
}

/// Payload type byte: element type plus the timestamped flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadType {
    /// Element type.
    pub element: ElementType,
    /// Whether a timestamp precedes the payload.
    pub timestamped: bool,
}

impl PayloadType {
    /// Creates a payload type without timestamp.
    #[must_use]
    pub const fn new(element: ElementType) -> Self {
        Self {
            element,
            timestamped: false,
        }
    }

    /// Parses a payload type byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        let element = ElementType::from_tag(byte & !TIMESTAMP_FLAG)?;
        Some(Self {
            element,
            timestamped: byte & TIMESTAMP_FLAG != 0,
        })
    }

    /// Encodes the payload type byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        if self.timestamped {
            self.element.tag() | TIMESTAMP_FLAG
        } else {
            self.element.tag()
        }
    }
}

/// A primitive that can be stored in a register payload.
pub trait Element: Copy + Sized {
    /// Element type of this primitive.
    const TYPE: ElementType;

    /// Reads one little-endian element.
    fn get(buf: &mut impl Buf) -> Self;

    /// Writes one little-endian element.
    fn put(self, buf: &mut impl BufMut);
}

macro_rules! impl_element {
    ($ty:ty, $element:ident, $get:ident, $put:ident) => {
        impl Element for $ty {
            const TYPE: ElementType = ElementType::$element;

            fn get(buf: &mut impl Buf) -> Self {
                buf.$get()
            }

            fn put(self, buf: &mut impl BufMut) {
                buf.$put(self);
            }
        }
    };
}

impl_element!(u8, U8, get_u8, put_u8);
impl_element!(i8, S8, get_i8, put_i8);
impl_element!(u16, U16, get_u16_le, put_u16_le);
impl_element!(i16, S16, get_i16_le, put_i16_le);
impl_element!(u32, U32, get_u32_le, put_u32_le);
impl_element!(i32, S32, get_i32_le, put_i32_le);
impl_element!(u64, U64, get_u64_le, put_u64_le);
impl_element!(i64, S64, get_i64_le, put_i64_le);
impl_element!(f32, Float, get_f32_le, put_f32_le);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(ElementType::U8.size(), 1);
        assert_eq!(ElementType::S16.size(), 2);
        assert_eq!(ElementType::U32.size(), 4);
        assert_eq!(ElementType::S64.size(), 8);
        assert_eq!(ElementType::Float.size(), 4);
    }

    #[test]
    fn test_payload_type_byte() {
        let plain = PayloadType::new(ElementType::S16);
        assert_eq!(plain.to_byte(), 0x82);

        let stamped = PayloadType {
            element: ElementType::U8,
            timestamped: true,
        };
        assert_eq!(stamped.to_byte(), 0x11);
        assert_eq!(PayloadType::from_byte(0x11), Some(stamped));
        assert_eq!(PayloadType::from_byte(0x92), Some(PayloadType {
            element: ElementType::U16,
            timestamped: true,
        }));
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(PayloadType::from_byte(0x03), None);
        assert_eq!(PayloadType::from_byte(0x00), None);
    }

    #[test]
    fn test_tags_match_table() {
        for element in ElementType::ALL {
            assert_eq!(ElementType::from_tag(element.tag()), Some(element));
        }
    }
}
