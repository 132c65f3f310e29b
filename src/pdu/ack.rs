//! ACK PDU abstraction, CFDP chapter 5.2.4.
use crate::pdu::{
    add_pdu_crc, generic_length_checks_pdu_deserialization, CfdpPdu, ConditionCode, CrcFlag,
    Direction, FileDirectiveType, PduError, PduHeader, TransactionStatus, WritablePdu,
};
use crate::ByteConversionError;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// ACK PDU.
///
/// Only EOF and FIN PDUs are acknowledged. The direction flag is derived
/// from the acknowledged directive: an EOF ACK travels towards the sender,
/// a FIN ACK towards the receiver.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AckPdu {
    pdu_header: PduHeader,
    directive_code_of_acked_pdu: FileDirectiveType,
    condition_code: ConditionCode,
    transaction_status: TransactionStatus,
}

impl AckPdu {
    pub fn new(
        mut pdu_header: PduHeader,
        directive_code_of_acked_pdu: FileDirectiveType,
        condition_code: ConditionCode,
        transaction_status: TransactionStatus,
    ) -> Result<Self, PduError> {
        if directive_code_of_acked_pdu == FileDirectiveType::EofPdu {
            pdu_header.pdu_conf.direction = Direction::TowardsSender;
        } else if directive_code_of_acked_pdu == FileDirectiveType::FinishedPdu {
            pdu_header.pdu_conf.direction = Direction::TowardsReceiver;
        } else {
            return Err(PduError::InvalidDirectiveType {
                found: directive_code_of_acked_pdu as u8,
                expected: None,
            });
        }
        let mut ack_pdu = Self {
            pdu_header,
            directive_code_of_acked_pdu,
            condition_code,
            transaction_status,
        };
        ack_pdu.pdu_header.pdu_datafield_len = ack_pdu.calc_pdu_datafield_len() as u16;
        Ok(ack_pdu)
    }

    pub fn new_for_eof_pdu(
        pdu_header: PduHeader,
        condition_code: ConditionCode,
        transaction_status: TransactionStatus,
    ) -> Self {
        // Unwrap okay, [Self::new] can only fail on invalid directive codes.
        Self::new(
            pdu_header,
            FileDirectiveType::EofPdu,
            condition_code,
            transaction_status,
        )
        .unwrap()
    }

    pub fn new_for_finished_pdu(
        pdu_header: PduHeader,
        condition_code: ConditionCode,
        transaction_status: TransactionStatus,
    ) -> Self {
        // Unwrap okay, [Self::new] can only fail on invalid directive codes.
        Self::new(
            pdu_header,
            FileDirectiveType::FinishedPdu,
            condition_code,
            transaction_status,
        )
        .unwrap()
    }

    pub fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    pub fn directive_code_of_acked_pdu(&self) -> FileDirectiveType {
        self.directive_code_of_acked_pdu
    }

    pub fn condition_code(&self) -> ConditionCode {
        self.condition_code
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        if self.crc_flag() == CrcFlag::WithCrc {
            return 5;
        }
        3
    }

    pub fn from_bytes(buf: &[u8]) -> Result<AckPdu, PduError> {
        let (pdu_header, mut current_idx) = PduHeader::from_bytes(buf)?;
        let full_len_without_crc = pdu_header.verify_length_and_checksum(buf)?;
        generic_length_checks_pdu_deserialization(buf, current_idx + 3, full_len_without_crc)?;
        let directive_type = FileDirectiveType::try_from(buf[current_idx]).map_err(|_| {
            PduError::InvalidDirectiveType {
                found: buf[current_idx],
                expected: Some(FileDirectiveType::AckPdu),
            }
        })?;
        if directive_type != FileDirectiveType::AckPdu {
            return Err(PduError::WrongDirectiveType {
                found: directive_type,
                expected: FileDirectiveType::AckPdu,
            });
        }
        current_idx += 1;
        let acked_directive_type =
            FileDirectiveType::try_from(buf[current_idx] >> 4).map_err(|_| {
                PduError::InvalidDirectiveType {
                    found: buf[current_idx] >> 4,
                    expected: None,
                }
            })?;
        if acked_directive_type != FileDirectiveType::EofPdu
            && acked_directive_type != FileDirectiveType::FinishedPdu
        {
            return Err(PduError::InvalidDirectiveType {
                found: acked_directive_type as u8,
                expected: None,
            });
        }
        current_idx += 1;
        let condition_code = ConditionCode::try_from((buf[current_idx] >> 4) & 0b1111)
            .map_err(|_| PduError::InvalidConditionCode((buf[current_idx] >> 4) & 0b1111))?;
        // Unwrap okay, two bit field conversion can not fail.
        let transaction_status = TransactionStatus::try_from(buf[current_idx] & 0b11).unwrap();
        Ok(Self {
            pdu_header,
            directive_code_of_acked_pdu: acked_directive_type,
            condition_code,
            transaction_status,
        })
    }
}

impl CfdpPdu for AckPdu {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::AckPdu)
    }
}

impl WritablePdu for AckPdu {
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
        buf[current_idx] = FileDirectiveType::AckPdu as u8;
        current_idx += 1;
        // The subtype code is 0b0001 when acknowledging a FIN, 0 otherwise.
        buf[current_idx] = (self.directive_code_of_acked_pdu as u8) << 4;
        if self.directive_code_of_acked_pdu == FileDirectiveType::FinishedPdu {
            buf[current_idx] |= 0b0001;
        }
        current_idx += 1;
        buf[current_idx] =
            ((self.condition_code as u8) << 4) | (self.transaction_status as u8);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::tests::{common_pdu_conf, verify_raw_header};
    use crate::pdu::LargeFileFlag;

    #[test]
    fn test_basic_eof_ack() {
        let pdu_header = PduHeader::new_for_file_directive(
            common_pdu_conf(CrcFlag::NoCrc, LargeFileFlag::Normal),
            0,
        );
        let ack_pdu = AckPdu::new_for_eof_pdu(
            pdu_header,
            ConditionCode::NoError,
            TransactionStatus::Active,
        );
        assert_eq!(
            ack_pdu.directive_code_of_acked_pdu(),
            FileDirectiveType::EofPdu
        );
        assert_eq!(ack_pdu.condition_code(), ConditionCode::NoError);
        assert_eq!(ack_pdu.transaction_status(), TransactionStatus::Active);
        assert_eq!(ack_pdu.direction(), Direction::TowardsSender);
    }

    #[test]
    fn test_basic_fin_ack() {
        let pdu_header = PduHeader::new_for_file_directive(
            common_pdu_conf(CrcFlag::NoCrc, LargeFileFlag::Normal),
            0,
        );
        let ack_pdu = AckPdu::new_for_finished_pdu(
            pdu_header,
            ConditionCode::NoError,
            TransactionStatus::Terminated,
        );
        assert_eq!(
            ack_pdu.directive_code_of_acked_pdu(),
            FileDirectiveType::FinishedPdu
        );
        assert_eq!(ack_pdu.direction(), Direction::TowardsReceiver);
    }

    #[test]
    fn test_invalid_acked_directive() {
        let pdu_header = PduHeader::new_for_file_directive(
            common_pdu_conf(CrcFlag::NoCrc, LargeFileFlag::Normal),
            0,
        );
        let error = AckPdu::new(
            pdu_header,
            FileDirectiveType::NakPdu,
            ConditionCode::NoError,
            TransactionStatus::Active,
        )
        .unwrap_err();
        assert!(matches!(error, PduError::InvalidDirectiveType { .. }));
    }

    #[test]
    fn test_serialization_roundtrip_eof_ack() {
        let pdu_header = PduHeader::new_for_file_directive(
            common_pdu_conf(CrcFlag::NoCrc, LargeFileFlag::Normal),
            0,
        );
        let ack_pdu = AckPdu::new_for_eof_pdu(
            pdu_header,
            ConditionCode::NoError,
            TransactionStatus::Active,
        );
        let mut buf: [u8; 64] = [0; 64];
        let written = ack_pdu.write_to_bytes(&mut buf).unwrap();
        assert_eq!(written, ack_pdu.len_written());
        verify_raw_header(ack_pdu.pdu_header(), &buf);
        let mut current_idx = ack_pdu.pdu_header().header_len();
        assert_eq!(buf[current_idx], FileDirectiveType::AckPdu as u8);
        current_idx += 1;
        assert_eq!(buf[current_idx] >> 4, FileDirectiveType::EofPdu as u8);
        assert_eq!(buf[current_idx] & 0b1111, 0);
        current_idx += 1;
        assert_eq!((buf[current_idx] >> 4) & 0b1111, ConditionCode::NoError as u8);
        assert_eq!(buf[current_idx] & 0b11, TransactionStatus::Active as u8);
        let read_back = AckPdu::from_bytes(&buf).unwrap();
        assert_eq!(read_back, ack_pdu);
    }

    #[test]
    fn test_serialization_roundtrip_fin_ack_with_crc() {
        let pdu_header = PduHeader::new_for_file_directive(
            common_pdu_conf(CrcFlag::WithCrc, LargeFileFlag::Normal),
            0,
        );
        let ack_pdu = AckPdu::new_for_finished_pdu(
            pdu_header,
            ConditionCode::CancelRequestReceived,
            TransactionStatus::Terminated,
        );
        let mut ack_vec = ack_pdu.to_vec().unwrap();
        let read_back = AckPdu::from_bytes(&ack_vec).unwrap();
        assert_eq!(read_back, ack_pdu);
        ack_vec[ack_pdu.len_written() - 1] ^= 0xff;
        assert!(AckPdu::from_bytes(&ack_vec).is_err());
    }
}
