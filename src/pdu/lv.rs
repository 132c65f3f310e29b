//! Generic CFDP length-value (LV) field support.
use crate::pdu::tlv::TlvLvError;
use crate::ByteConversionError;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const MIN_LV_LEN: usize = 1;

/// Generic CFDP length-value (LV) abstraction as specified in CFDP 5.1.8.
///
/// In this crate LVs are only used for filename strings, so this is a thin
/// wrapper around a raw slice which performs the additional error handling.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Lv<'data> {
    data: &'data [u8],
}

impl<'data> Lv<'data> {
    pub fn new(data: &[u8]) -> Result<Lv, TlvLvError> {
        if data.len() > u8::MAX as usize {
            return Err(TlvLvError::DataTooLarge(data.len()));
        }
        Ok(Lv { data })
    }

    /// Creates a LV with an empty value field.
    pub fn new_empty() -> Lv<'data> {
        Lv { data: &[] }
    }

    /// Helper function to build a string LV. This is especially useful for
    /// the file or directory path LVs.
    pub fn new_from_str(str_slice: &str) -> Result<Lv, TlvLvError> {
        Self::new(str_slice.as_bytes())
    }

    /// Returns the length of the value part, not including the length byte.
    #[inline]
    pub fn len_value(&self) -> usize {
        self.data.len()
    }

    /// Returns the full raw length, including the length byte.
    #[inline]
    pub fn len_full(&self) -> usize {
        self.len_value() + MIN_LV_LEN
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn value(&self) -> &[u8] {
        self.data
    }

    /// Interpret the value as an UTF-8 string, which is how filenames are
    /// carried in metadata PDUs.
    pub fn value_as_str(&self) -> Option<Result<&'data str, core::str::Utf8Error>> {
        if self.is_empty() {
            return None;
        }
        Some(core::str::from_utf8(self.data))
    }

    /// Writes the LV to a raw buffer. The first byte contains the length of
    /// the value, which may not exceed [u8::MAX].
    pub fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, ByteConversionError> {
        if buf.len() < self.len_full() {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: self.len_full(),
            });
        }
        // Length check in the constructor ensures this fits one byte.
        buf[0] = self.data.len() as u8;
        buf[MIN_LV_LEN..MIN_LV_LEN + self.data.len()].copy_from_slice(self.data);
        Ok(self.len_full())
    }

    /// Reads a LV from a raw buffer.
    pub fn from_bytes(buf: &'data [u8]) -> Result<Lv<'data>, ByteConversionError> {
        if buf.len() < MIN_LV_LEN {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: MIN_LV_LEN,
            });
        }
        let value_len = buf[0] as usize;
        if buf.len() < MIN_LV_LEN + value_len {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: MIN_LV_LEN + value_len,
            });
        }
        Ok(Self {
            data: &buf[MIN_LV_LEN..MIN_LV_LEN + value_len],
        })
    }
}
