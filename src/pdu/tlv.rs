//! Generic CFDP type-length-value (TLV) field support.
//!
//! Of the TLV types the standard defines, this engine only produces and
//! interprets the entity ID TLV used for the fault location field of EOF and
//! FIN PDUs. Other well-formed TLVs are skipped by the per-PDU readers.
use crate::util::{UnsignedByteField, UnsignedEnum};
use crate::ByteConversionError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const MIN_TLV_LEN: usize = 2;

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum TlvType {
    FilestoreRequest = 0x00,
    FilestoreResponse = 0x01,
    MsgToUser = 0x02,
    FaultHandler = 0x04,
    FlowLabel = 0x05,
    EntityId = 0x06,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TlvLvError {
    #[error("data with size {0} larger than allowed {max} bytes", max = u8::MAX)]
    DataTooLarge(usize),
    #[error("byte conversion error: {0}")]
    ByteConversion(#[from] ByteConversionError),
    #[error("invalid TLV type field {0}")]
    InvalidTlvTypeField(u8),
    #[error("invalid value length {0}")]
    InvalidValueLength(usize),
}

/// Raw view of one TLV inside an encoded PDU, used to skip over TLV fields
/// which this engine does not interpret.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RawTlv<'data> {
    pub tlv_type: u8,
    pub data: &'data [u8],
}

impl<'data> RawTlv<'data> {
    pub fn from_bytes(buf: &'data [u8]) -> Result<Self, ByteConversionError> {
        if buf.len() < MIN_TLV_LEN {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: MIN_TLV_LEN,
            });
        }
        let value_len = buf[1] as usize;
        if buf.len() < MIN_TLV_LEN + value_len {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: MIN_TLV_LEN + value_len,
            });
        }
        Ok(Self {
            tlv_type: buf[0],
            data: &buf[MIN_TLV_LEN..MIN_TLV_LEN + value_len],
        })
    }

    #[inline]
    pub fn len_full(&self) -> usize {
        MIN_TLV_LEN + self.data.len()
    }
}

/// Entity ID TLV, the fault location field of EOF and FIN PDUs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntityIdTlv {
    entity_id: UnsignedByteField,
}

impl EntityIdTlv {
    pub fn new(entity_id: UnsignedByteField) -> Self {
        Self { entity_id }
    }

    #[inline]
    pub fn entity_id(&self) -> &UnsignedByteField {
        &self.entity_id
    }

    #[inline]
    pub fn len_value(&self) -> usize {
        self.entity_id.size()
    }

    #[inline]
    pub fn len_full(&self) -> usize {
        MIN_TLV_LEN + self.entity_id.size()
    }

    pub fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, ByteConversionError> {
        if buf.len() < self.len_full() {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: self.len_full(),
            });
        }
        buf[0] = TlvType::EntityId as u8;
        buf[1] = self.entity_id.size() as u8;
        self.entity_id.write_to_be_bytes(&mut buf[2..])?;
        Ok(self.len_full())
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, TlvLvError> {
        let raw = RawTlv::from_bytes(buf)?;
        if raw.tlv_type != TlvType::EntityId as u8 {
            return Err(TlvLvError::InvalidTlvTypeField(raw.tlv_type));
        }
        if !matches!(raw.data.len(), 1 | 2 | 4 | 8) {
            return Err(TlvLvError::InvalidValueLength(raw.data.len()));
        }
        // Unwrap is okay here, the width was just verified.
        Ok(Self {
            entity_id: UnsignedByteField::new_from_be_bytes(raw.data.len(), raw.data).unwrap(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{UbfU16, UbfU8};

    #[test]
    fn test_entity_id_tlv_roundtrip() {
        let tlv = EntityIdTlv::new(UbfU16::new(0x0102).into());
        assert_eq!(tlv.len_value(), 2);
        assert_eq!(tlv.len_full(), 4);
        let mut buf: [u8; 8] = [0; 8];
        let written = tlv.write_to_bytes(&mut buf).unwrap();
        assert_eq!(written, 4);
        assert_eq!(buf[0], TlvType::EntityId as u8);
        assert_eq!(buf[1], 2);
        assert_eq!(buf[2], 0x01);
        assert_eq!(buf[3], 0x02);
        let tlv_read_back = EntityIdTlv::from_bytes(&buf).unwrap();
        assert_eq!(tlv_read_back, tlv);
    }

    #[test]
    fn test_entity_id_tlv_invalid_type() {
        let tlv = EntityIdTlv::new(UbfU8::new(5).into());
        let mut buf: [u8; 8] = [0; 8];
        tlv.write_to_bytes(&mut buf).unwrap();
        buf[0] = TlvType::FlowLabel as u8;
        let error = EntityIdTlv::from_bytes(&buf).unwrap_err();
        if let TlvLvError::InvalidTlvTypeField(found) = error {
            assert_eq!(found, TlvType::FlowLabel as u8);
        } else {
            panic!("invalid exception {:?}", error)
        }
    }

    #[test]
    fn test_entity_id_tlv_invalid_width() {
        let mut buf: [u8; 8] = [0; 8];
        buf[0] = TlvType::EntityId as u8;
        buf[1] = 3;
        let error = EntityIdTlv::from_bytes(&buf).unwrap_err();
        if let TlvLvError::InvalidValueLength(len) = error {
            assert_eq!(len, 3);
        } else {
            panic!("invalid exception {:?}", error)
        }
    }

    #[test]
    fn test_raw_tlv_skip() {
        let mut buf: [u8; 8] = [0; 8];
        buf[0] = TlvType::FlowLabel as u8;
        buf[1] = 3;
        buf[2..5].copy_from_slice(&[1, 2, 3]);
        let raw = RawTlv::from_bytes(&buf).unwrap();
        assert_eq!(raw.tlv_type, TlvType::FlowLabel as u8);
        assert_eq!(raw.len_full(), 5);
        assert_eq!(raw.data, &[1, 2, 3]);
    }

    #[test]
    fn test_raw_tlv_too_small() {
        let buf: [u8; 1] = [0; 1];
        assert!(RawTlv::from_bytes(&buf).is_err());
    }
}
