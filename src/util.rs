//! Helpers for variable-width unsigned byte fields.
//!
//! CFDP encodes entity IDs and transaction sequence numbers with a width of
//! 1, 2, 4 or 8 bytes which is declared inside each PDU header. The engine
//! must preserve the width it saw on the wire for every response it encodes,
//! so the logical value and its encoded width travel together in an
//! [UnsignedByteField].
use crate::ByteConversionError;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Generic abstraction for fields with a value and a known encoded width.
pub trait UnsignedEnum {
    /// Size of the unsigned enumeration in bytes.
    fn size(&self) -> usize;
    /// Write the unsigned enumeration to a raw buffer. Returns the written
    /// size on success.
    fn write_to_be_bytes(&self, buf: &mut [u8]) -> Result<usize, ByteConversionError>;

    fn value(&self) -> u64;

    fn to_vec(&self) -> Vec<u8> {
        let mut buf = vec![0; self.size()];
        // Can not fail, the buffer is sized correctly.
        self.write_to_be_bytes(&mut buf).unwrap();
        buf
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UnsignedByteFieldError {
    /// Value is too large for the specified width of the byte field.
    #[error("value {value} too large for width {width}")]
    ValueTooLargeForWidth { width: usize, value: u64 },
    /// Only 1, 2, 4 and 8 are allowed width values.
    #[error("invalid width {found}, only 1, 2, 4 and 8 are allowed")]
    InvalidWidth { found: usize },
    #[error("byte conversion error: {0}")]
    ByteConversion(#[from] ByteConversionError),
}

/// Type erased variant: a value with a runtime-known encoded width.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UnsignedByteField {
    width: usize,
    value: u64,
}

impl UnsignedByteField {
    #[inline]
    pub const fn new(width: usize, value: u64) -> Self {
        Self { width, value }
    }

    #[inline]
    pub const fn value_const(&self) -> u64 {
        self.value
    }

    #[inline]
    pub fn new_from_be_bytes(width: usize, buf: &[u8]) -> Result<Self, UnsignedByteFieldError> {
        if width > buf.len() {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: width,
            }
            .into());
        }
        match width {
            1 => Ok(Self::new(width, buf[0].into())),
            2 => Ok(Self::new(
                width,
                u16::from_be_bytes(buf[0..2].try_into().unwrap()).into(),
            )),
            4 => Ok(Self::new(
                width,
                u32::from_be_bytes(buf[0..4].try_into().unwrap()).into(),
            )),
            8 => Ok(Self::new(
                width,
                u64::from_be_bytes(buf[0..8].try_into().unwrap()),
            )),
            _ => Err(UnsignedByteFieldError::InvalidWidth { found: width }),
        }
    }

    /// Narrowest legal width which can represent the passed value.
    pub fn new_with_minimal_width(value: u64) -> Self {
        if value <= u8::MAX.into() {
            return Self::new(1, value);
        }
        if value <= u16::MAX.into() {
            return Self::new(2, value);
        }
        if value <= u32::MAX.into() {
            return Self::new(4, value);
        }
        Self::new(8, value)
    }
}

impl UnsignedEnum for UnsignedByteField {
    #[inline]
    fn size(&self) -> usize {
        self.width
    }

    #[inline]
    fn value(&self) -> u64 {
        self.value_const()
    }

    fn write_to_be_bytes(&self, buf: &mut [u8]) -> Result<usize, ByteConversionError> {
        if buf.len() < self.size() {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: self.size(),
            });
        }
        match self.width {
            1 => buf[0] = self.value as u8,
            2 => buf[0..2].copy_from_slice(&(self.value as u16).to_be_bytes()),
            4 => buf[0..4].copy_from_slice(&(self.value as u32).to_be_bytes()),
            8 => buf[0..8].copy_from_slice(&self.value.to_be_bytes()),
            // The constructors only allow the four legal widths.
            _ => panic!("invalid byte field width {}", self.width),
        }
        Ok(self.width)
    }
}

macro_rules! typed_byte_field {
    ($Name: ident, $Ty: ty, $width: expr) => {
        #[doc = concat!("Concrete byte field with a fixed width of ", $width, " byte(s).")]
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        pub struct $Name {
            value: $Ty,
        }

        impl $Name {
            #[inline]
            pub const fn new(value: $Ty) -> Self {
                Self { value }
            }

            #[inline]
            pub const fn value_typed(&self) -> $Ty {
                self.value
            }
        }

        impl UnsignedEnum for $Name {
            #[inline]
            fn size(&self) -> usize {
                $width
            }

            #[inline]
            fn value(&self) -> u64 {
                self.value as u64
            }

            fn write_to_be_bytes(&self, buf: &mut [u8]) -> Result<usize, ByteConversionError> {
                UnsignedByteField::from(*self).write_to_be_bytes(buf)
            }
        }

        impl From<$Name> for UnsignedByteField {
            #[inline]
            fn from(value: $Name) -> Self {
                Self::new($width, value.value as u64)
            }
        }

        impl TryFrom<UnsignedByteField> for $Name {
            type Error = UnsignedByteFieldError;

            fn try_from(value: UnsignedByteField) -> Result<Self, Self::Error> {
                if value.width != $width {
                    return Err(UnsignedByteFieldError::InvalidWidth { found: value.width });
                }
                Ok(Self::new(value.value as $Ty))
            }
        }
    };
}

typed_byte_field!(UnsignedByteFieldU8, u8, 1);
typed_byte_field!(UnsignedByteFieldU16, u16, 2);
typed_byte_field!(UnsignedByteFieldU32, u32, 4);
typed_byte_field!(UnsignedByteFieldU64, u64, 8);

pub type UbfU8 = UnsignedByteFieldU8;
pub type UbfU16 = UnsignedByteFieldU16;
pub type UbfU32 = UnsignedByteFieldU32;
pub type UbfU64 = UnsignedByteFieldU64;
