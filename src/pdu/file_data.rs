//! File data PDU abstraction, CFDP chapter 5.3.
use crate::pdu::{
    add_pdu_crc, read_fss_field, write_fss_field, CfdpPdu, CrcFlag, Direction, FileDirectiveType,
    PduError, PduHeader, PduType, SegmentMetadataFlag, WritablePdu,
};
use crate::ByteConversionError;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// File data PDU.
///
/// Carries one contiguous segment of file content at a given offset. The
/// data is kept as a borrow of the raw frame, the engine writes it straight
/// to the filestore without an intermediate copy.
///
/// Segment metadata is not supported: the segment metadata flag is forced to
/// zero on creation and its presence is rejected on decoding, mirroring the
/// record boundary options this engine does not use.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FileDataPdu<'raw> {
    pdu_header: PduHeader,
    offset: u64,
    file_data: &'raw [u8],
}

impl<'raw> FileDataPdu<'raw> {
    pub fn new(mut pdu_header: PduHeader, offset: u64, file_data: &'raw [u8]) -> Self {
        pdu_header.pdu_type = PduType::FileData;
        pdu_header.seg_metadata_flag = SegmentMetadataFlag::NotPresent;
        pdu_header.pdu_conf.direction = Direction::TowardsReceiver;
        let mut fd_pdu = Self {
            pdu_header,
            offset,
            file_data,
        };
        fd_pdu.pdu_header.pdu_datafield_len = fd_pdu.calc_pdu_datafield_len() as u16;
        fd_pdu
    }

    pub fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn file_data(&self) -> &'raw [u8] {
        self.file_data
    }

    /// Offset of the first byte following this segment.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.file_data.len() as u64
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        let mut len = if self.file_flag() == crate::pdu::LargeFileFlag::Large {
            8
        } else {
            4
        };
        len += self.file_data.len();
        if self.crc_flag() == CrcFlag::WithCrc {
            len += 2;
        }
        len
    }

    pub fn from_bytes(buf: &'raw [u8]) -> Result<Self, PduError> {
        let (pdu_header, mut current_idx) = PduHeader::from_bytes(buf)?;
        let full_len_without_crc = pdu_header.verify_length_and_checksum(buf)?;
        if pdu_header.pdu_type() != PduType::FileData {
            return Err(PduError::Format);
        }
        if pdu_header.seg_metadata_flag() == SegmentMetadataFlag::Present {
            return Err(PduError::Format);
        }
        let fss_len = if pdu_header.common_pdu_conf().file_flag == crate::pdu::LargeFileFlag::Large
        {
            8
        } else {
            4
        };
        if full_len_without_crc < current_idx + fss_len {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: full_len_without_crc,
                expected: current_idx + fss_len,
            }
            .into());
        }
        let (fss_len, offset) = read_fss_field(
            pdu_header.common_pdu_conf().file_flag,
            &buf[current_idx..],
        );
        current_idx += fss_len;
        Ok(Self {
            pdu_header,
            offset,
            file_data: &buf[current_idx..full_len_without_crc],
        })
    }
}

impl CfdpPdu for FileDataPdu<'_> {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        None
    }
}

impl WritablePdu for FileDataPdu<'_> {
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
        current_idx += write_fss_field(
            self.pdu_header.common_pdu_conf().file_flag,
            self.offset,
            &mut buf[current_idx..],
        )?;
        buf[current_idx..current_idx + self.file_data.len()].copy_from_slice(self.file_data);
        current_idx += self.file_data.len();
        if self.crc_flag() == CrcFlag::WithCrc {
            current_idx = add_pdu_crc(buf, current_idx);
        }
        Ok(current_idx)
    }

    fn len_written(&self) -> usize {
        self.pdu_header.header_len() + self.calc_pdu_datafield_len()
    }
}
