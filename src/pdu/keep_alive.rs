//! Keep alive PDU abstraction, CFDP chapter 5.2.8.
use crate::pdu::{
    add_pdu_crc, generic_length_checks_pdu_deserialization, read_fss_field, write_fss_field,
    CfdpPdu, CrcFlag, Direction, FileDirectiveType, LargeFileFlag, PduError, PduHeader,
    WritablePdu,
};
use crate::ByteConversionError;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Keep alive PDU, reporting the receive progress back to the sender.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeepAlivePdu {
    pdu_header: PduHeader,
    progress: u64,
}

impl KeepAlivePdu {
    pub fn new(mut pdu_header: PduHeader, progress: u64) -> Self {
        pdu_header.pdu_conf.direction = Direction::TowardsSender;
        let mut keep_alive_pdu = Self {
            pdu_header,
            progress,
        };
        keep_alive_pdu.pdu_header.pdu_datafield_len =
            keep_alive_pdu.calc_pdu_datafield_len() as u16;
        keep_alive_pdu
    }

    pub fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    pub fn progress(&self) -> u64 {
        self.progress
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        let mut len = if self.file_flag() == LargeFileFlag::Large {
            1 + 8
        } else {
            1 + 4
        };
        if self.crc_flag() == CrcFlag::WithCrc {
            len += 2;
        }
        len
    }

    pub fn from_bytes(buf: &[u8]) -> Result<KeepAlivePdu, PduError> {
        let (pdu_header, mut current_idx) = PduHeader::from_bytes(buf)?;
        let full_len_without_crc = pdu_header.verify_length_and_checksum(buf)?;
        let mut min_expected_len = current_idx + 1 + 4;
        if pdu_header.common_pdu_conf().file_flag == LargeFileFlag::Large {
            min_expected_len += 4;
        }
        generic_length_checks_pdu_deserialization(buf, min_expected_len, full_len_without_crc)?;
        let directive_type = FileDirectiveType::try_from(buf[current_idx]).map_err(|_| {
            PduError::InvalidDirectiveType {
                found: buf[current_idx],
                expected: Some(FileDirectiveType::KeepAlivePdu),
            }
        })?;
        if directive_type != FileDirectiveType::KeepAlivePdu {
            return Err(PduError::WrongDirectiveType {
                found: directive_type,
                expected: FileDirectiveType::KeepAlivePdu,
            });
        }
        current_idx += 1;
        let (_, progress) = read_fss_field(
            pdu_header.common_pdu_conf().file_flag,
            &buf[current_idx..],
        );
        Ok(Self {
            pdu_header,
            progress,
        })
    }
}

impl CfdpPdu for KeepAlivePdu {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::KeepAlivePdu)
    }
}

impl WritablePdu for KeepAlivePdu {
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
        buf[current_idx] = FileDirectiveType::KeepAlivePdu as u8;
        current_idx += 1;
        current_idx += write_fss_field(
            self.pdu_header.common_pdu_conf().file_flag,
            self.progress,
            &mut buf[current_idx..],
        )?;
        if self.crc_flag() == CrcFlag::WithCrc {
            current_idx = add_pdu_crc(buf, current_idx);
        }
        Ok(current_idx)
    }

    fn len_written(&self) -> usize {
        self.pdu_header.header_len() + self.calc_pdu_datafield_len()
    }
}
