//! Metadata PDU abstraction, CFDP chapter 5.2.5.
use crate::pdu::lv::Lv;
use crate::pdu::{
    generic_length_checks_pdu_deserialization, read_fss_field, write_fss_field, add_pdu_crc,
    CfdpPdu, ChecksumType, CrcFlag, Direction, FileDirectiveType, PduError, PduHeader,
    WritablePdu,
};
use crate::ByteConversionError;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Metadata PDU.
///
/// This announces a new file transfer to the receiving entity: the expected
/// file size, the source and destination file names, and the checksum type
/// the sender will use for the EOF checksum. The options field is kept as a
/// raw slice; this engine does not interpret metadata options but tolerates
/// their presence.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MetadataPdu<'raw> {
    pdu_header: PduHeader,
    closure_requested: bool,
    checksum_type: ChecksumType,
    file_size: u64,
    #[cfg_attr(feature = "serde", serde(borrow))]
    src_file_name: Lv<'raw>,
    #[cfg_attr(feature = "serde", serde(borrow))]
    dest_file_name: Lv<'raw>,
    options: Option<&'raw [u8]>,
}

impl<'raw> MetadataPdu<'raw> {
    pub fn new(
        mut pdu_header: PduHeader,
        checksum_type: ChecksumType,
        file_size: u64,
        src_file_name: Lv<'raw>,
        dest_file_name: Lv<'raw>,
    ) -> Self {
        pdu_header.pdu_conf.direction = Direction::TowardsReceiver;
        let mut md_pdu = Self {
            pdu_header,
            closure_requested: false,
            checksum_type,
            file_size,
            src_file_name,
            dest_file_name,
            options: None,
        };
        md_pdu.pdu_header.pdu_datafield_len = md_pdu.calc_pdu_datafield_len() as u16;
        md_pdu
    }

    pub fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    pub fn closure_requested(&self) -> bool {
        self.closure_requested
    }

    pub fn checksum_type(&self) -> ChecksumType {
        self.checksum_type
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn src_file_name(&self) -> Lv<'raw> {
        self.src_file_name
    }

    pub fn dest_file_name(&self) -> Lv<'raw> {
        self.dest_file_name
    }

    pub fn options(&self) -> Option<&'raw [u8]> {
        self.options
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        // One directive octet and one octet for the closure/checksum field.
        let mut len = 2;
        len += if self.file_flag() == crate::pdu::LargeFileFlag::Large {
            8
        } else {
            4
        };
        len += self.src_file_name.len_full();
        len += self.dest_file_name.len_full();
        if let Some(opts) = self.options {
            len += opts.len();
        }
        if self.crc_flag() == CrcFlag::WithCrc {
            len += 2;
        }
        len
    }

    pub fn from_bytes(buf: &'raw [u8]) -> Result<Self, PduError> {
        let (pdu_header, mut current_idx) = PduHeader::from_bytes(buf)?;
        let full_len_without_crc = pdu_header.verify_length_and_checksum(buf)?;
        // Directive, closure/checksum octet, smallest FSS field and two
        // empty LV length octets.
        let min_expected_len = current_idx + 2 + 4 + 2;
        generic_length_checks_pdu_deserialization(buf, min_expected_len, full_len_without_crc)?;
        let directive_type = FileDirectiveType::try_from(buf[current_idx]).map_err(|_| {
            PduError::InvalidDirectiveType {
                found: buf[current_idx],
                expected: Some(FileDirectiveType::MetadataPdu),
            }
        })?;
        if directive_type != FileDirectiveType::MetadataPdu {
            return Err(PduError::WrongDirectiveType {
                found: directive_type,
                expected: FileDirectiveType::MetadataPdu,
            });
        }
        current_idx += 1;
        let closure_requested = ((buf[current_idx] >> 6) & 0b1) != 0;
        let checksum_type = ChecksumType::try_from(buf[current_idx] & 0b1111)
            .map_err(|_| PduError::InvalidChecksumType(buf[current_idx] & 0b1111))?;
        current_idx += 1;
        let (fss_len, file_size) = read_fss_field(
            pdu_header.common_pdu_conf().file_flag,
            &buf[current_idx..],
        );
        current_idx += fss_len;
        let src_file_name = Lv::from_bytes(&buf[current_idx..full_len_without_crc])?;
        current_idx += src_file_name.len_full();
        if current_idx >= full_len_without_crc {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: full_len_without_crc,
                expected: current_idx + 1,
            }
            .into());
        }
        let dest_file_name = Lv::from_bytes(&buf[current_idx..full_len_without_crc])?;
        current_idx += dest_file_name.len_full();
        let mut options = None;
        if current_idx < full_len_without_crc {
            options = Some(&buf[current_idx..full_len_without_crc]);
        }
        Ok(Self {
            pdu_header,
            closure_requested,
            checksum_type,
            file_size,
            src_file_name,
            dest_file_name,
            options,
        })
    }
}

impl CfdpPdu for MetadataPdu<'_> {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::MetadataPdu)
    }
}

impl WritablePdu for MetadataPdu<'_> {
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
        buf[current_idx] = FileDirectiveType::MetadataPdu as u8;
        current_idx += 1;
        buf[current_idx] =
            ((self.closure_requested as u8) << 6) | (self.checksum_type as u8);
        current_idx += 1;
        current_idx += write_fss_field(
            self.pdu_header.common_pdu_conf().file_flag,
            self.file_size,
            &mut buf[current_idx..],
        )?;
        current_idx += self.src_file_name.write_to_bytes(&mut buf[current_idx..])?;
        current_idx += self.dest_file_name.write_to_bytes(&mut buf[current_idx..])?;
        if let Some(opts) = self.options {
            buf[current_idx..current_idx + opts.len()].copy_from_slice(opts);
            current_idx += opts.len();
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
