//! Finished PDU abstraction, CFDP chapter 5.2.3.
use crate::pdu::tlv::{EntityIdTlv, RawTlv, TlvType};
use crate::pdu::{
    add_pdu_crc, generic_length_checks_pdu_deserialization, CfdpPdu, ConditionCode, CrcFlag,
    Direction, FileDirectiveType, PduError, PduHeader, WritablePdu,
};
use crate::ByteConversionError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum DeliveryCode {
    Complete = 0,
    Incomplete = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum FileStatus {
    DiscardDeliberately = 0b00,
    DiscardedFsRejection = 0b01,
    Retained = 0b10,
    Unreported = 0b11,
}

/// Finished PDU.
///
/// The receiver's final verdict on a class 2 transaction. Filestore response
/// TLVs are not generated by this engine; on the read path, unknown TLVs in
/// front of the fault location are skipped and surfaced through
/// [FinishedPdu::ignored_tlvs] so callers can log their presence.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FinishedPdu {
    pdu_header: PduHeader,
    condition_code: ConditionCode,
    delivery_code: DeliveryCode,
    file_status: FileStatus,
    fault_location: Option<EntityIdTlv>,
    ignored_tlvs: u8,
}

impl FinishedPdu {
    /// Default finished PDU: no error and no fault location field.
    pub fn new_default(
        pdu_header: PduHeader,
        delivery_code: DeliveryCode,
        file_status: FileStatus,
    ) -> Self {
        Self::new_generic(
            pdu_header,
            ConditionCode::NoError,
            delivery_code,
            file_status,
            None,
        )
    }

    pub fn new_with_error(
        pdu_header: PduHeader,
        condition_code: ConditionCode,
        delivery_code: DeliveryCode,
        file_status: FileStatus,
        fault_location: EntityIdTlv,
    ) -> Self {
        Self::new_generic(
            pdu_header,
            condition_code,
            delivery_code,
            file_status,
            Some(fault_location),
        )
    }

    pub fn new_generic(
        mut pdu_header: PduHeader,
        condition_code: ConditionCode,
        delivery_code: DeliveryCode,
        file_status: FileStatus,
        fault_location: Option<EntityIdTlv>,
    ) -> Self {
        pdu_header.pdu_conf.direction = Direction::TowardsSender;
        let mut finished_pdu = Self {
            pdu_header,
            condition_code,
            delivery_code,
            file_status,
            fault_location,
            ignored_tlvs: 0,
        };
        finished_pdu.pdu_header.pdu_datafield_len =
            finished_pdu.calc_pdu_datafield_len() as u16;
        finished_pdu
    }

    pub fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    pub fn condition_code(&self) -> ConditionCode {
        self.condition_code
    }

    pub fn delivery_code(&self) -> DeliveryCode {
        self.delivery_code
    }

    pub fn file_status(&self) -> FileStatus {
        self.file_status
    }

    pub fn fault_location(&self) -> Option<EntityIdTlv> {
        self.fault_location
    }

    /// Number of well-formed but uninterpreted TLVs encountered on decoding.
    pub fn ignored_tlvs(&self) -> u8 {
        self.ignored_tlvs
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        let mut len = 2;
        if let Some(fault_location) = self.fault_location {
            len += fault_location.len_full();
        }
        if self.crc_flag() == CrcFlag::WithCrc {
            len += 2;
        }
        len
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, PduError> {
        let (pdu_header, mut current_idx) = PduHeader::from_bytes(buf)?;
        let full_len_without_crc = pdu_header.verify_length_and_checksum(buf)?;
        let min_expected_len = current_idx + 2;
        generic_length_checks_pdu_deserialization(buf, min_expected_len, full_len_without_crc)?;
        let directive_type = FileDirectiveType::try_from(buf[current_idx]).map_err(|_| {
            PduError::InvalidDirectiveType {
                found: buf[current_idx],
                expected: Some(FileDirectiveType::FinishedPdu),
            }
        })?;
        if directive_type != FileDirectiveType::FinishedPdu {
            return Err(PduError::WrongDirectiveType {
                found: directive_type,
                expected: FileDirectiveType::FinishedPdu,
            });
        }
        current_idx += 1;
        let condition_code = ConditionCode::try_from((buf[current_idx] >> 4) & 0b1111)
            .map_err(|_| PduError::InvalidConditionCode((buf[current_idx] >> 4) & 0b1111))?;
        // Unwrap is okay for both conversions which can not fail.
        let delivery_code = DeliveryCode::try_from((buf[current_idx] >> 2) & 0b1).unwrap();
        let file_status = FileStatus::try_from(buf[current_idx] & 0b11).unwrap();
        current_idx += 1;
        let mut fault_location = None;
        let mut ignored_tlvs = 0;
        while current_idx < full_len_without_crc {
            let raw_tlv = RawTlv::from_bytes(&buf[current_idx..full_len_without_crc])?;
            if raw_tlv.tlv_type == TlvType::EntityId as u8 {
                fault_location = Some(EntityIdTlv::from_bytes(&buf[current_idx..])?);
            } else {
                ignored_tlvs += 1;
            }
            current_idx += raw_tlv.len_full();
        }
        Ok(Self {
            pdu_header,
            condition_code,
            delivery_code,
            file_status,
            fault_location,
            ignored_tlvs,
        })
    }
}

impl CfdpPdu for FinishedPdu {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::FinishedPdu)
    }
}

impl WritablePdu for FinishedPdu {
    fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, PduError> {
        let expected_len = self.len_written();
        if buf.len() < expected_len {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: expected_len,
            }
            .into());
        }
        let mut current_idx = self.pdu_header.write_to_bytes(buf)?;
        buf[current_idx] = FileDirectiveType::FinishedPdu as u8;
        current_idx += 1;
        buf[current_idx] = ((self.condition_code as u8) << 4)
            | ((self.delivery_code as u8) << 2)
            | self.file_status as u8;
        current_idx += 1;
        if let Some(fault_location) = self.fault_location {
            current_idx += fault_location.write_to_bytes(&mut buf[current_idx..])?;
        }
        if self.crc_flag() == CrcFlag::WithCrc {
            current_idx = add_pdu_crc(buf, current_idx);
        }
        Ok(current_idx)
    }

    fn len_written(&self) -> usize {
        self.pdu_header.header_len() + self.calc_pdu_datafield_len()
    }
}
