//! NAK PDU abstraction, CFDP chapter 5.2.6.
use crate::pdu::{
    add_pdu_crc, generic_length_checks_pdu_deserialization, CfdpPdu, CrcFlag, Direction,
    FileDirectiveType, LargeFileFlag, PduError, PduHeader, WritablePdu,
};
use crate::ByteConversionError;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// NAK PDU.
///
/// Requests retransmission of the segment list within the given scope. The
/// receive engine builds these from the gap tracker; the degenerate form with
/// scope `(0, 0)` and no segments requests a metadata retransmission.
///
/// Segment offsets are stored as `u64` pairs regardless of the large file
/// flag; the flag only decides the encoded field width, and encoding fails if
/// a value does not fit into 32 bits for a normal file size PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NakPdu {
    pdu_header: PduHeader,
    start_of_scope: u64,
    end_of_scope: u64,
    segment_requests: Vec<(u64, u64)>,
}

impl NakPdu {
    pub fn new(
        mut pdu_header: PduHeader,
        start_of_scope: u64,
        end_of_scope: u64,
        segment_requests: Vec<(u64, u64)>,
    ) -> Result<Self, PduError> {
        pdu_header.pdu_conf.direction = Direction::TowardsSender;
        if pdu_header.pdu_conf.file_flag == LargeFileFlag::Normal {
            let fits = |value: u64| value <= u32::MAX as u64;
            if !fits(start_of_scope)
                || !fits(end_of_scope)
                || segment_requests
                    .iter()
                    .any(|(start, end)| !fits(*start) || !fits(*end))
            {
                return Err(PduError::InvalidStartOrEndOfScopeValue);
            }
        }
        let mut nak_pdu = Self {
            pdu_header,
            start_of_scope,
            end_of_scope,
            segment_requests,
        };
        nak_pdu.pdu_header.pdu_datafield_len = nak_pdu.calc_pdu_datafield_len() as u16;
        Ok(nak_pdu)
    }

    pub fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    pub fn start_of_scope(&self) -> u64 {
        self.start_of_scope
    }

    pub fn end_of_scope(&self) -> u64 {
        self.end_of_scope
    }

    pub fn segment_requests(&self) -> &[(u64, u64)] {
        &self.segment_requests
    }

    pub fn num_segment_reqs(&self) -> usize {
        self.segment_requests.len()
    }

    /// A NAK with scope `(0, 0)` and an empty segment list is the
    /// metadata-request form emitted when no metadata PDU was seen yet.
    pub fn is_metadata_request(&self) -> bool {
        self.start_of_scope == 0 && self.end_of_scope == 0 && self.segment_requests.is_empty()
    }

    fn field_width(&self) -> usize {
        if self.file_flag() == LargeFileFlag::Large {
            8
        } else {
            4
        }
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        let width = self.field_width();
        let mut len = 1 + 2 * width + self.segment_requests.len() * 2 * width;
        if self.crc_flag() == CrcFlag::WithCrc {
            len += 2;
        }
        len
    }

    pub fn from_bytes(buf: &[u8]) -> Result<NakPdu, PduError> {
        let (pdu_header, mut current_idx) = PduHeader::from_bytes(buf)?;
        let full_len_without_crc = pdu_header.verify_length_and_checksum(buf)?;
        let width: usize = if pdu_header.common_pdu_conf().file_flag == LargeFileFlag::Large {
            8
        } else {
            4
        };
        // Directive octet plus start and end of scope.
        let min_expected_len = current_idx + 1 + 2 * width;
        generic_length_checks_pdu_deserialization(buf, min_expected_len, full_len_without_crc)?;
        let directive_type = FileDirectiveType::try_from(buf[current_idx]).map_err(|_| {
            PduError::InvalidDirectiveType {
                found: buf[current_idx],
                expected: Some(FileDirectiveType::NakPdu),
            }
        })?;
        if directive_type != FileDirectiveType::NakPdu {
            return Err(PduError::WrongDirectiveType {
                found: directive_type,
                expected: FileDirectiveType::NakPdu,
            });
        }
        current_idx += 1;
        let mut read_offset = |current_idx: &mut usize| -> u64 {
            let value = if width == 8 {
                u64::from_be_bytes(buf[*current_idx..*current_idx + 8].try_into().unwrap())
            } else {
                u32::from_be_bytes(buf[*current_idx..*current_idx + 4].try_into().unwrap()).into()
            };
            *current_idx += width;
            value
        };
        let start_of_scope = read_offset(&mut current_idx);
        let end_of_scope = read_offset(&mut current_idx);
        let segments_raw_len = full_len_without_crc - current_idx;
        if segments_raw_len % (2 * width) != 0 {
            return Err(PduError::Format);
        }
        let mut segment_requests = Vec::with_capacity(segments_raw_len / (2 * width));
        while current_idx < full_len_without_crc {
            let start = read_offset(&mut current_idx);
            let end = read_offset(&mut current_idx);
            segment_requests.push((start, end));
        }
        Ok(Self {
            pdu_header,
            start_of_scope,
            end_of_scope,
            segment_requests,
        })
    }
}

impl CfdpPdu for NakPdu {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::NakPdu)
    }
}

impl WritablePdu for NakPdu {
    fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, PduError> {
        let expected_len = self.len_written();
        if buf.len() < expected_len {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: expected_len,
            }
            .into());
        }
        let width = self.field_width();
        let mut current_idx = self.pdu_header.write_to_bytes(buf)?;
        buf[current_idx] = FileDirectiveType::NakPdu as u8;
        current_idx += 1;
        let mut write_offset = |buf: &mut [u8], current_idx: &mut usize, value: u64| {
            if width == 8 {
                buf[*current_idx..*current_idx + 8].copy_from_slice(&value.to_be_bytes());
            } else {
                // The constructor rejects values which do not fit.
                buf[*current_idx..*current_idx + 4]
                    .copy_from_slice(&(value as u32).to_be_bytes());
            }
            *current_idx += width;
        };
        write_offset(buf, &mut current_idx, self.start_of_scope);
        write_offset(buf, &mut current_idx, self.end_of_scope);
        for (start, end) in &self.segment_requests {
            write_offset(buf, &mut current_idx, *start);
            write_offset(buf, &mut current_idx, *end);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::tests::{common_pdu_conf, verify_raw_header};
    use crate::pdu::{PduType, TransmissionMode};

    fn generic_nak_header(crc_flag: CrcFlag, fss: LargeFileFlag) -> PduHeader {
        PduHeader::new_for_file_directive(common_pdu_conf(crc_flag, fss), 0)
    }

    #[test]
    fn test_basic() {
        let pdu_header = generic_nak_header(CrcFlag::NoCrc, LargeFileFlag::Normal);
        let nak_pdu = NakPdu::new(pdu_header, 0, 0, Vec::new()).unwrap();
        assert_eq!(nak_pdu.start_of_scope(), 0);
        assert_eq!(nak_pdu.end_of_scope(), 0);
        assert_eq!(nak_pdu.num_segment_reqs(), 0);
        assert!(nak_pdu.is_metadata_request());
        assert_eq!(nak_pdu.pdu_type(), PduType::FileDirective);
        assert_eq!(nak_pdu.direction(), Direction::TowardsSender);
        assert_eq!(nak_pdu.transmission_mode(), TransmissionMode::Acknowledged);
    }

    #[test]
    fn test_serialization_empty_segment_list() {
        let pdu_header = generic_nak_header(CrcFlag::NoCrc, LargeFileFlag::Normal);
        let nak_pdu = NakPdu::new(pdu_header, 100, 300, Vec::new()).unwrap();
        let mut buf: [u8; 64] = [0; 64];
        let written = nak_pdu.write_to_bytes(&mut buf).unwrap();
        assert_eq!(written, nak_pdu.len_written());
        verify_raw_header(nak_pdu.pdu_header(), &buf);
        let mut current_idx = nak_pdu.pdu_header().header_len();
        assert_eq!(current_idx + 9, nak_pdu.len_written());
        assert_eq!(buf[current_idx], FileDirectiveType::NakPdu as u8);
        current_idx += 1;
        assert_eq!(
            u32::from_be_bytes(buf[current_idx..current_idx + 4].try_into().unwrap()),
            100
        );
        current_idx += 4;
        assert_eq!(
            u32::from_be_bytes(buf[current_idx..current_idx + 4].try_into().unwrap()),
            300
        );
    }

    #[test]
    fn test_serialization_two_segments() {
        let pdu_header = generic_nak_header(CrcFlag::NoCrc, LargeFileFlag::Normal);
        let nak_pdu = NakPdu::new(pdu_header, 0, 10, vec![(0, 4), (8, 10)]).unwrap();
        let mut buf: [u8; 64] = [0; 64];
        nak_pdu.write_to_bytes(&mut buf).unwrap();
        let mut current_idx = nak_pdu.pdu_header().header_len() + 1 + 8;
        for expected in [0u32, 4, 8, 10] {
            assert_eq!(
                u32::from_be_bytes(buf[current_idx..current_idx + 4].try_into().unwrap()),
                expected
            );
            current_idx += 4;
        }
        assert_eq!(current_idx, nak_pdu.len_written());
    }

    #[test]
    fn test_deserialization_roundtrip() {
        let pdu_header = generic_nak_header(CrcFlag::NoCrc, LargeFileFlag::Normal);
        let nak_pdu = NakPdu::new(pdu_header, 0, 10, vec![(0, 4), (8, 10)]).unwrap();
        let nak_vec = nak_pdu.to_vec().unwrap();
        let read_back = NakPdu::from_bytes(&nak_vec).unwrap();
        assert_eq!(read_back, nak_pdu);
        assert_eq!(read_back.segment_requests(), &[(0, 4), (8, 10)]);
    }

    #[test]
    fn test_deserialization_roundtrip_large_file() {
        let pdu_header = generic_nak_header(CrcFlag::NoCrc, LargeFileFlag::Large);
        let large = u32::MAX as u64 + 1;
        let nak_pdu =
            NakPdu::new(pdu_header, 0, large + 100, vec![(large, large + 100)]).unwrap();
        let nak_vec = nak_pdu.to_vec().unwrap();
        let read_back = NakPdu::from_bytes(&nak_vec).unwrap();
        assert_eq!(read_back, nak_pdu);
        assert_eq!(read_back.segment_requests(), &[(large, large + 100)]);
    }

    #[test]
    fn test_scope_too_large_for_normal_file_size() {
        let pdu_header = generic_nak_header(CrcFlag::NoCrc, LargeFileFlag::Normal);
        let error =
            NakPdu::new(pdu_header, u32::MAX as u64 + 1, u32::MAX as u64 + 2, Vec::new())
                .unwrap_err();
        assert!(matches!(error, PduError::InvalidStartOrEndOfScopeValue));
    }

    #[test]
    fn test_segment_too_large_for_normal_file_size() {
        let pdu_header = generic_nak_header(CrcFlag::NoCrc, LargeFileFlag::Normal);
        let error = NakPdu::new(pdu_header, 0, 100, vec![(0, u32::MAX as u64 + 1)]).unwrap_err();
        assert!(matches!(error, PduError::InvalidStartOrEndOfScopeValue));
    }

    #[test]
    fn test_with_crc() {
        let pdu_header = generic_nak_header(CrcFlag::WithCrc, LargeFileFlag::Normal);
        let nak_pdu = NakPdu::new(pdu_header, 0, 0, Vec::new()).unwrap();
        let mut nak_vec = nak_pdu.to_vec().unwrap();
        assert_eq!(nak_vec.len(), nak_pdu.pdu_header().header_len() + 9 + 2);
        let read_back = NakPdu::from_bytes(&nak_vec).unwrap();
        assert_eq!(read_back, nak_pdu);
        nak_vec[nak_pdu.len_written() - 1] ^= 0xff;
        let error = NakPdu::from_bytes(&nak_vec).unwrap_err();
        assert!(matches!(error, PduError::Checksum(_)));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let pdu_header = generic_nak_header(CrcFlag::NoCrc, LargeFileFlag::Normal);
        let nak_pdu = NakPdu::new(pdu_header, 0, 10, vec![(0, 4)]).unwrap();
        let mut nak_vec = nak_pdu.to_vec().unwrap();
        // Add 4 stray bytes so the segment list length is no longer a
        // multiple of one segment request.
        let datafield_len =
            (nak_vec.len() + 4 - nak_pdu.pdu_header().header_len()) as u16;
        nak_vec.extend_from_slice(&[0; 4]);
        nak_vec[1..3].copy_from_slice(&datafield_len.to_be_bytes());
        let error = NakPdu::from_bytes(&nak_vec).unwrap_err();
        assert!(matches!(error, PduError::Format));
    }
}
