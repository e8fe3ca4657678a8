//! Conversion between register payloads and Rust values.

use crate::protocol::{Element, ElementType, Message, Timestamp};
use crate::registers::RegisterDescriptor;

/// A value that can be stored in a register.
///
/// Implementations declare the element type and, when fixed, the element
/// count they map to, so a mismatch against the register catalog is caught
/// before anything is sent to the device.
pub trait RegisterValue: Sized {
    /// Element type of the payload.
    const ELEMENT: ElementType;

    /// Element count, or `None` if any count is accepted.
    const COUNT: Option<usize>;

    /// Decodes a value from a raw payload.
    ///
    /// Returns `None` if the payload does not hold a valid value.
    fn decode(payload: &[u8]) -> Option<Self>;

    /// Encodes the value into a raw payload.
    fn encode(&self, buf: &mut Vec<u8>);

    /// Checks whether this type fits a register.
    ///
    /// # Errors
    ///
    /// Returns a short reason when the shapes differ.
    fn check(descriptor: &RegisterDescriptor) -> Result<(), &'static str> {
        if Self::ELEMENT != descriptor.element_type {
            return Err("element type differs");
        }
        match Self::COUNT {
            Some(count) if count != descriptor.element_count => Err("element count differs"),
            _ => Ok(()),
        }
    }
}

macro_rules! impl_scalar {
    ($($ty:ty),*) => {
        $(
            impl RegisterValue for $ty {
                const ELEMENT: ElementType = <$ty as Element>::TYPE;
                const COUNT: Option<usize> = Some(1);

                fn decode(payload: &[u8]) -> Option<Self> {
                    let mut buf = payload;
                    (buf.len() == Self::ELEMENT.size()).then(|| <$ty as Element>::get(&mut buf))
                }

                fn encode(&self, buf: &mut Vec<u8>) {
                    Element::put(*self, buf);
                }
            }
        )*
    };
}

impl_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32);

impl<T: Element, const N: usize> RegisterValue for [T; N] {
    const ELEMENT: ElementType = T::TYPE;
    const COUNT: Option<usize> = Some(N);

    fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() != N * T::TYPE.size() {
            return None;
        }
        let mut buf = payload;
        Some(std::array::from_fn(|_| T::get(&mut buf)))
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        for value in self {
            value.put(buf);
        }
    }
}

impl<T: Element> RegisterValue for Vec<T> {
    const ELEMENT: ElementType = T::TYPE;
    const COUNT: Option<usize> = None;

    fn decode(payload: &[u8]) -> Option<Self> {
        let size = T::TYPE.size();
        if payload.len() % size != 0 {
            return None;
        }
        let mut buf = payload;
        Some((0..payload.len() / size).map(|_| T::get(&mut buf)).collect())
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        for value in self {
            value.put(buf);
        }
    }
}

/// A register value together with the device timestamp it was sampled at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamped<T> {
    /// Decoded value.
    pub value: T,
    /// Device timestamp, if the message carried one.
    pub timestamp: Option<Timestamp>,
}

impl<T: RegisterValue> Timestamped<T> {
    /// Decodes a value and its timestamp from a message.
    #[must_use]
    pub fn from_message(message: &Message) -> Option<Self> {
        if message.element() != T::ELEMENT {
            return None;
        }
        Some(Self {
            value: T::decode(message.payload())?,
            timestamp: message.timestamp(),
        })
    }
}

/// Encodes a value into a fresh payload buffer.
pub(crate) fn to_payload<T: RegisterValue>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    value.encode(&mut buf);
    buf
}
