//! Prompt PDU abstraction, CFDP chapter 5.2.7.
use crate::pdu::{
    add_pdu_crc, generic_length_checks_pdu_deserialization, CfdpPdu, CrcFlag, Direction,
    FileDirectiveType, PduError, PduHeader, WritablePdu,
};
use crate::ByteConversionError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum PromptResponseRequired {
    Nak = 0,
    KeepAlive = 1,
}

/// Prompt PDU, the sender's request for an immediate NAK or keep alive.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PromptPdu {
    pdu_header: PduHeader,
    response_required: PromptResponseRequired,
}

impl PromptPdu {
    pub fn new(mut pdu_header: PduHeader, response_required: PromptResponseRequired) -> Self {
        pdu_header.pdu_conf.direction = Direction::TowardsReceiver;
        let mut prompt_pdu = Self {
            pdu_header,
            response_required,
        };
        prompt_pdu.pdu_header.pdu_datafield_len = prompt_pdu.calc_pdu_datafield_len() as u16;
        prompt_pdu
    }

    pub fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    pub fn response_required(&self) -> PromptResponseRequired {
        self.response_required
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        if self.crc_flag() == CrcFlag::WithCrc {
            return 4;
        }
        2
    }

    pub fn from_bytes(buf: &[u8]) -> Result<PromptPdu, PduError> {
        let (pdu_header, mut current_idx) = PduHeader::from_bytes(buf)?;
        let full_len_without_crc = pdu_header.verify_length_and_checksum(buf)?;
        generic_length_checks_pdu_deserialization(buf, current_idx + 2, full_len_without_crc)?;
        let directive_type = FileDirectiveType::try_from(buf[current_idx]).map_err(|_| {
            PduError::InvalidDirectiveType {
                found: buf[current_idx],
                expected: Some(FileDirectiveType::PromptPdu),
            }
        })?;
        if directive_type != FileDirectiveType::PromptPdu {
            return Err(PduError::WrongDirectiveType {
                found: directive_type,
                expected: FileDirectiveType::PromptPdu,
            });
        }
        current_idx += 1;
        // Unwrap okay, single bit field conversion can not fail.
        let response_required =
            PromptResponseRequired::try_from((buf[current_idx] >> 7) & 0b1).unwrap();
        Ok(Self {
            pdu_header,
            response_required,
        })
    }
}

impl CfdpPdu for PromptPdu {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::PromptPdu)
    }
}

impl WritablePdu for PromptPdu {
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
        buf[current_idx] = FileDirectiveType::PromptPdu as u8;
        current_idx += 1;
        buf[current_idx] = (self.response_required as u8) << 7;
        current_idx += 1;
        if self.crc_flag() == CrcFlag::WithCrc {
            current_idx = add_pdu_crc(buf, current_idx);
        }
        Ok(current_idx)
    }

    fn len_written(&self) -> usize {
        self.pdu_header.header_len() + self.calc_pdu_datafield_len()
    }
}
