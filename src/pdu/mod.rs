//! CFDP Packet Data Unit (PDU) codec.
//!
//! This module translates between raw PDU frames and logical PDU values
//! according to chapter 5 of CCSDS 727.0-B-5. One file per PDU kind, plus the
//! common header machinery and the [decode_pdu] dispatcher used by the engine
//! for inbound frames.
use crate::crc::CRC_CCITT_FALSE;
use crate::util::{UnsignedByteField, UnsignedByteFieldU8, UnsignedEnum};
use crate::ByteConversionError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod ack;
pub mod eof;
pub mod file_data;
pub mod finished;
pub mod keep_alive;
pub mod lv;
pub mod metadata;
pub mod nak;
pub mod prompt;
pub mod tlv;

pub use ack::AckPdu;
pub use eof::EofPdu;
pub use file_data::FileDataPdu;
pub use finished::FinishedPdu;
pub use keep_alive::KeepAlivePdu;
pub use metadata::MetadataPdu;
pub use nak::NakPdu;
pub use prompt::PromptPdu;

/// This is the name of the standard this codec is based on.
pub const CFDP_VERSION_2_NAME: &str = "CCSDS 727.0-B-5";
/// Currently, only this version is supported.
pub const CFDP_VERSION_2: u8 = 0b001;

pub const FIXED_HEADER_LEN: usize = 4;

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum PduType {
    FileDirective = 0,
    FileData = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum Direction {
    TowardsReceiver = 0,
    TowardsSender = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum TransmissionMode {
    Acknowledged = 0,
    Unacknowledged = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum CrcFlag {
    NoCrc = 0,
    WithCrc = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum LargeFileFlag {
    /// 32 bit maximum file size and file size sensitive (FSS) field size.
    Normal = 0,
    /// 64 bit maximum file size and FSS field size.
    Large = 1,
}

/// Always 0 and ignored for file directive PDUs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum SegmentMetadataFlag {
    NotPresent = 0,
    Present = 1,
}

/// Always 0 and ignored for file directive PDUs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum SegmentationControl {
    NoRecordBoundaryPreservation = 0,
    WithRecordBoundaryPreservation = 1,
}

/// Condition codes as specified in chapter 5.1.5 of the CFDP standard.
///
/// Terminal transaction states latch one of these values as the transaction
/// status, and the same 4-bit values travel in the EOF, FIN and ACK PDUs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ConditionCode {
    NoError = 0b0000,
    PositiveAckLimitReached = 0b0001,
    KeepAliveLimitReached = 0b0010,
    InvalidTransmissionMode = 0b0011,
    FilestoreRejection = 0b0100,
    FileChecksumFailure = 0b0101,
    FileSizeError = 0b0110,
    NakLimitReached = 0b0111,
    InactivityDetected = 0b1000,
    InvalidFileStructure = 0b1001,
    CheckLimitReached = 0b1010,
    UnsupportedChecksumType = 0b1011,
    /// Not an actual fault condition for which fault handler overrides can be
    /// specified.
    SuspendRequestReceived = 0b1110,
    /// Not an actual fault condition for which fault handler overrides can be
    /// specified.
    CancelRequestReceived = 0b1111,
}

impl ConditionCode {
    /// Everything except [Self::NoError] counts as a fault for the purpose of
    /// FIN delivery and file status fields.
    pub fn is_fault(&self) -> bool {
        *self != ConditionCode::NoError
    }
}

/// Transaction status for the ACK PDU field according to chapter 5.2.4 of the
/// CFDP standard.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum TransactionStatus {
    /// Transaction is not currently active and the CFDP implementation does
    /// not retain a transaction history.
    Undefined = 0b00,
    Active = 0b01,
    /// Transaction was active in the past and was terminated.
    Terminated = 0b10,
    /// The CFDP implementation does retain a transaction history, and the
    /// transaction is not and never was active at this entity.
    Unrecognized = 0b11,
}

/// Checksum types according to the
/// [SANA Checksum Types registry](https://sanaregistry.org/r/checksum_identifiers/).
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ChecksumType {
    /// Modular legacy checksum.
    Modular = 0,
    Crc32Proximity1 = 1,
    Crc32C = 2,
    /// Polynomial: 0x04C11DB7. The only type this engine verifies.
    Crc32 = 3,
    NullChecksum = 15,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum FileDirectiveType {
    EofPdu = 0x04,
    FinishedPdu = 0x05,
    AckPdu = 0x06,
    MetadataPdu = 0x07,
    NakPdu = 0x08,
    PromptPdu = 0x09,
    KeepAlivePdu = 0x0c,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PduError {
    #[error("byte conversion error: {0}")]
    ByteConversion(#[from] ByteConversionError),
    /// Found version ID invalid, not equal to [CFDP_VERSION_2].
    #[error("CFDP version missmatch, found {0}, expected {ver}", ver = CFDP_VERSION_2)]
    CfdpVersionMissmatch(u8),
    /// Invalid length for the entity ID detected. Only the values 1, 2, 4 and
    /// 8 are supported.
    #[error("invalid PDU entity ID length {0}, only [1, 2, 4, 8] are allowed")]
    InvalidEntityLen(u8),
    /// Invalid length for the transaction sequence number. Only the values 1,
    /// 2, 4 and 8 are supported.
    #[error("invalid transaction sequence number length {0}")]
    InvalidTransactionSeqNumLen(u8),
    #[error(
        "missmatch of PDU source ID length {src_id_len} and destination ID length {dest_id_len}"
    )]
    SourceDestIdLenMissmatch {
        src_id_len: usize,
        dest_id_len: usize,
    },
    /// The directive type field contained a value not in the range of
    /// permitted values.
    #[error("invalid directive type, found {found:?}, expected {expected:?}")]
    InvalidDirectiveType {
        found: u8,
        expected: Option<FileDirectiveType>,
    },
    /// Wrong directive type, for example when parsing an EOF PDU from a frame
    /// which holds a different file directive.
    #[error("wrong directive type, found {found:?}, expected {expected:?}")]
    WrongDirectiveType {
        found: FileDirectiveType,
        expected: FileDirectiveType,
    },
    /// Invalid condition code. Contains the raw detected value.
    #[error("invalid condition code {0}")]
    InvalidConditionCode(u8),
    /// Invalid checksum type which is not part of the SANA checksum registry.
    #[error("invalid checksum type {0}")]
    InvalidChecksumType(u8),
    #[error("file size {0} too large for normal file size PDU")]
    FileSizeTooLarge(u64),
    /// Start or end of scope larger than [u32::MAX] in a NAK PDU without the
    /// large file flag.
    #[error("invalid start or end of scope for NAK PDU")]
    InvalidStartOrEndOfScopeValue,
    /// The CRC flag for a PDU is enabled and the checksum check failed.
    /// Contains the raw 16 bit CRC.
    #[error("checksum error for checksum {0}")]
    Checksum(u16),
    /// Generic error for invalid PDU formats.
    #[error("generic PDU format error")]
    Format,
    /// Error handling a TLV or LV field.
    #[error("TLV/LV error: {0}")]
    TlvLv(#[from] tlv::TlvLvError),
}

/// Common configuration fields of a PDU header.
///
/// The custom [PartialEq] implementation compares the entity IDs and the
/// sequence number by value only, so two configurations with different field
/// widths but equal values compare equal.
#[derive(Debug, Copy, Clone, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CommonPduConfig {
    source_entity_id: UnsignedByteField,
    dest_entity_id: UnsignedByteField,
    pub transaction_seq_num: UnsignedByteField,
    pub trans_mode: TransmissionMode,
    pub file_flag: LargeFileFlag,
    pub crc_flag: CrcFlag,
    pub direction: Direction,
}

impl CommonPduConfig {
    #[inline]
    pub fn new(
        source_id: impl Into<UnsignedByteField>,
        dest_id: impl Into<UnsignedByteField>,
        transaction_seq_num: impl Into<UnsignedByteField>,
        trans_mode: TransmissionMode,
        file_flag: LargeFileFlag,
        crc_flag: CrcFlag,
        direction: Direction,
    ) -> Result<Self, PduError> {
        let (source_id, dest_id) = Self::source_dest_id_check(source_id, dest_id)?;
        let transaction_seq_num = transaction_seq_num.into();
        if !matches!(transaction_seq_num.size(), 1 | 2 | 4 | 8) {
            return Err(PduError::InvalidTransactionSeqNumLen(
                transaction_seq_num.size() as u8,
            ));
        }
        Ok(Self {
            source_entity_id: source_id,
            dest_entity_id: dest_id,
            transaction_seq_num,
            trans_mode,
            file_flag,
            crc_flag,
            direction,
        })
    }

    #[inline]
    pub fn new_with_byte_fields(
        source_id: impl Into<UnsignedByteField>,
        dest_id: impl Into<UnsignedByteField>,
        transaction_seq_num: impl Into<UnsignedByteField>,
    ) -> Result<Self, PduError> {
        Self::new(
            source_id,
            dest_id,
            transaction_seq_num,
            TransmissionMode::Acknowledged,
            LargeFileFlag::Normal,
            CrcFlag::NoCrc,
            Direction::TowardsReceiver,
        )
    }

    #[inline]
    pub fn source_id(&self) -> UnsignedByteField {
        self.source_entity_id
    }

    #[inline]
    pub fn dest_id(&self) -> UnsignedByteField {
        self.dest_entity_id
    }

    #[inline]
    fn source_dest_id_check(
        source_id: impl Into<UnsignedByteField>,
        dest_id: impl Into<UnsignedByteField>,
    ) -> Result<(UnsignedByteField, UnsignedByteField), PduError> {
        let source_id = source_id.into();
        let dest_id = dest_id.into();
        if source_id.size() != dest_id.size() {
            return Err(PduError::SourceDestIdLenMissmatch {
                src_id_len: source_id.size(),
                dest_id_len: dest_id.size(),
            });
        }
        if !matches!(source_id.size(), 1 | 2 | 4 | 8) {
            return Err(PduError::InvalidEntityLen(source_id.size() as u8));
        }
        Ok((source_id, dest_id))
    }

    #[inline]
    pub fn set_source_and_dest_id(
        &mut self,
        source_id: impl Into<UnsignedByteField>,
        dest_id: impl Into<UnsignedByteField>,
    ) -> Result<(), PduError> {
        let (source_id, dest_id) = Self::source_dest_id_check(source_id, dest_id)?;
        self.source_entity_id = source_id;
        self.dest_entity_id = dest_id;
        Ok(())
    }
}

impl Default for CommonPduConfig {
    /// Entity IDs and the sequence number default to one-byte fields with a
    /// value of 0.
    #[inline]
    fn default() -> Self {
        // The new function can not fail for these input parameters.
        Self::new(
            UnsignedByteFieldU8::new(0),
            UnsignedByteFieldU8::new(0),
            UnsignedByteFieldU8::new(0),
            TransmissionMode::Acknowledged,
            LargeFileFlag::Normal,
            CrcFlag::NoCrc,
            Direction::TowardsReceiver,
        )
        .unwrap()
    }
}

impl PartialEq for CommonPduConfig {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.source_entity_id.value() == other.source_entity_id.value()
            && self.dest_entity_id.value() == other.dest_entity_id.value()
            && self.transaction_seq_num.value() == other.transaction_seq_num.value()
            && self.trans_mode == other.trans_mode
            && self.file_flag == other.file_flag
            && self.crc_flag == other.crc_flag
            && self.direction == other.direction
    }
}

/// Abstraction for the PDU header common to all CFDP PDUs.
///
/// For detailed information, refer to chapter 5.1 of the CFDP standard.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PduHeader {
    pdu_type: PduType,
    pdu_conf: CommonPduConfig,
    seg_metadata_flag: SegmentMetadataFlag,
    seg_ctrl: SegmentationControl,
    pdu_datafield_len: u16,
}

impl PduHeader {
    pub const FIXED_LEN: usize = FIXED_HEADER_LEN;

    #[inline]
    pub fn new_for_file_data(
        pdu_conf: CommonPduConfig,
        pdu_datafield_len: u16,
        seg_metadata_flag: SegmentMetadataFlag,
        seg_ctrl: SegmentationControl,
    ) -> Self {
        Self::new_generic(
            PduType::FileData,
            pdu_conf,
            pdu_datafield_len,
            seg_metadata_flag,
            seg_ctrl,
        )
    }

    #[inline]
    pub fn new_for_file_data_default(pdu_conf: CommonPduConfig, pdu_datafield_len: u16) -> Self {
        Self::new_generic(
            PduType::FileData,
            pdu_conf,
            pdu_datafield_len,
            SegmentMetadataFlag::NotPresent,
            SegmentationControl::NoRecordBoundaryPreservation,
        )
    }

    #[inline]
    pub fn new_for_file_directive(pdu_conf: CommonPduConfig, pdu_datafield_len: u16) -> Self {
        Self::new_generic(
            PduType::FileDirective,
            pdu_conf,
            pdu_datafield_len,
            SegmentMetadataFlag::NotPresent,
            SegmentationControl::NoRecordBoundaryPreservation,
        )
    }

    #[inline]
    pub fn new_generic(
        pdu_type: PduType,
        pdu_conf: CommonPduConfig,
        pdu_datafield_len: u16,
        seg_metadata_flag: SegmentMetadataFlag,
        seg_ctrl: SegmentationControl,
    ) -> Self {
        Self {
            pdu_type,
            pdu_conf,
            seg_metadata_flag,
            seg_ctrl,
            pdu_datafield_len,
        }
    }

    /// Returns only the length of the PDU header when written to a raw buffer.
    #[inline]
    pub fn header_len(&self) -> usize {
        FIXED_HEADER_LEN
            + self.pdu_conf.source_entity_id.size()
            + self.pdu_conf.transaction_seq_num.size()
            + self.pdu_conf.dest_entity_id.size()
    }

    #[inline]
    pub fn pdu_datafield_len(&self) -> usize {
        self.pdu_datafield_len.into()
    }

    /// Returns the full length of the PDU when written to a raw buffer, which
    /// is the header length plus the PDU datafield length.
    #[inline]
    pub fn pdu_len(&self) -> usize {
        self.header_len() + self.pdu_datafield_len as usize
    }

    pub fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, ByteConversionError> {
        if buf.len() < self.header_len() {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: self.header_len(),
            });
        }
        let mut current_idx = 0;
        buf[current_idx] = (CFDP_VERSION_2 << 5)
            | ((self.pdu_type as u8) << 4)
            | ((self.pdu_conf.direction as u8) << 3)
            | ((self.pdu_conf.trans_mode as u8) << 2)
            | ((self.pdu_conf.crc_flag as u8) << 1)
            | (self.pdu_conf.file_flag as u8);
        current_idx += 1;
        buf[current_idx..current_idx + 2].copy_from_slice(&self.pdu_datafield_len.to_be_bytes());
        current_idx += 2;
        buf[current_idx] = ((self.seg_ctrl as u8) << 7)
            | (((self.pdu_conf.source_entity_id.size() - 1) as u8) << 4)
            | ((self.seg_metadata_flag as u8) << 3)
            | ((self.pdu_conf.transaction_seq_num.size() - 1) as u8);
        current_idx += 1;
        self.pdu_conf.source_entity_id.write_to_be_bytes(
            &mut buf[current_idx..current_idx + self.pdu_conf.source_entity_id.size()],
        )?;
        current_idx += self.pdu_conf.source_entity_id.size();
        self.pdu_conf.transaction_seq_num.write_to_be_bytes(
            &mut buf[current_idx..current_idx + self.pdu_conf.transaction_seq_num.size()],
        )?;
        current_idx += self.pdu_conf.transaction_seq_num.size();
        self.pdu_conf.dest_entity_id.write_to_be_bytes(
            &mut buf[current_idx..current_idx + self.pdu_conf.dest_entity_id.size()],
        )?;
        current_idx += self.pdu_conf.dest_entity_id.size();
        Ok(current_idx)
    }

    /// This function first verifies that the buffer can hold the full length
    /// of the PDU parsed from the header. Then, it verifies the checksum as
    /// specified in the standard if the CRC flag of the PDU header is set.
    ///
    /// Returns the PDU length excluding the 2 CRC bytes on success. If the
    /// CRC flag is not set, it simply returns the full PDU length.
    pub fn verify_length_and_checksum(&self, buf: &[u8]) -> Result<usize, PduError> {
        if buf.len() < self.pdu_len() {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: self.pdu_len(),
            }
            .into());
        }
        if self.pdu_conf.crc_flag == CrcFlag::WithCrc {
            let mut digest = CRC_CCITT_FALSE.digest();
            digest.update(&buf[..self.pdu_len()]);
            if digest.finalize() != 0 {
                return Err(PduError::Checksum(u16::from_be_bytes(
                    buf[self.pdu_len() - 2..self.pdu_len()].try_into().unwrap(),
                )));
            }
            return Ok(self.pdu_len() - 2);
        }
        Ok(self.pdu_len())
    }

    /// Please note that this function will not verify that the passed buffer
    /// can hold the full PDU length, and it will not perform the CRC
    /// procedure of chapter 4.1.1, because both require the buffer to be
    /// large enough to hold the full PDU. Both can be performed with the
    /// [Self::verify_length_and_checksum] function.
    pub fn from_bytes(buf: &[u8]) -> Result<(Self, usize), PduError> {
        if buf.len() < FIXED_HEADER_LEN {
            return Err(PduError::ByteConversion(
                ByteConversionError::FromSliceTooSmall {
                    found: buf.len(),
                    expected: FIXED_HEADER_LEN,
                },
            ));
        }
        let cfdp_version_raw = (buf[0] >> 5) & 0b111;
        if cfdp_version_raw != CFDP_VERSION_2 {
            return Err(PduError::CfdpVersionMissmatch(cfdp_version_raw));
        }
        // Unwrap for single bit fields: these operations will always succeed.
        let pdu_type = PduType::try_from((buf[0] >> 4) & 0b1).unwrap();
        let direction = Direction::try_from((buf[0] >> 3) & 0b1).unwrap();
        let trans_mode = TransmissionMode::try_from((buf[0] >> 2) & 0b1).unwrap();
        let crc_flag = CrcFlag::try_from((buf[0] >> 1) & 0b1).unwrap();
        let file_flag = LargeFileFlag::try_from(buf[0] & 0b1).unwrap();
        let pdu_datafield_len = u16::from_be_bytes(buf[1..3].try_into().unwrap());
        let seg_ctrl = SegmentationControl::try_from((buf[3] >> 7) & 0b1).unwrap();
        let expected_len_entity_ids = (((buf[3] >> 4) & 0b111) + 1) as usize;
        if !matches!(expected_len_entity_ids, 1 | 2 | 4 | 8) {
            return Err(PduError::InvalidEntityLen(expected_len_entity_ids as u8));
        }
        let seg_metadata_flag = SegmentMetadataFlag::try_from((buf[3] >> 3) & 0b1).unwrap();
        let expected_len_seq_num = ((buf[3] & 0b111) + 1) as usize;
        if !matches!(expected_len_seq_num, 1 | 2 | 4 | 8) {
            return Err(PduError::InvalidTransactionSeqNumLen(
                expected_len_seq_num as u8,
            ));
        }
        if buf.len() < (FIXED_HEADER_LEN + 2 * expected_len_entity_ids + expected_len_seq_num) {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: FIXED_HEADER_LEN + 2 * expected_len_entity_ids + expected_len_seq_num,
            }
            .into());
        }
        let mut current_idx = FIXED_HEADER_LEN;
        // It is okay to unwrap here because the validity of the expected
        // lengths and the remaining buffer length were checked above.
        let source_id =
            UnsignedByteField::new_from_be_bytes(expected_len_entity_ids, &buf[current_idx..])
                .unwrap();
        current_idx += expected_len_entity_ids;
        let transaction_seq_num =
            UnsignedByteField::new_from_be_bytes(expected_len_seq_num, &buf[current_idx..])
                .unwrap();
        current_idx += expected_len_seq_num;
        let dest_id =
            UnsignedByteField::new_from_be_bytes(expected_len_entity_ids, &buf[current_idx..])
                .unwrap();
        current_idx += expected_len_entity_ids;
        let common_pdu_conf = CommonPduConfig::new(
            source_id,
            dest_id,
            transaction_seq_num,
            trans_mode,
            file_flag,
            crc_flag,
            direction,
        )
        .unwrap();
        Ok((
            PduHeader {
                pdu_type,
                pdu_conf: common_pdu_conf,
                seg_metadata_flag,
                seg_ctrl,
                pdu_datafield_len,
            },
            current_idx,
        ))
    }

    #[inline]
    pub fn pdu_type(&self) -> PduType {
        self.pdu_type
    }

    #[inline]
    pub fn common_pdu_conf(&self) -> &CommonPduConfig {
        &self.pdu_conf
    }

    #[inline]
    pub fn seg_metadata_flag(&self) -> SegmentMetadataFlag {
        self.seg_metadata_flag
    }

    #[inline]
    pub fn seg_ctrl(&self) -> SegmentationControl {
        self.seg_ctrl
    }
}

/// Trait all PDU kinds implement for encoding.
pub trait WritablePdu {
    fn len_written(&self) -> usize;
    fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, PduError>;

    fn to_vec(&self) -> Result<Vec<u8>, PduError> {
        let mut vec = vec![0; self.len_written()];
        self.write_to_bytes(&mut vec)?;
        Ok(vec)
    }
}

/// Abstraction trait for fields and properties common for all PDUs.
pub trait CfdpPdu {
    fn pdu_header(&self) -> &PduHeader;

    #[inline]
    fn source_id(&self) -> UnsignedByteField {
        self.pdu_header().common_pdu_conf().source_entity_id
    }

    #[inline]
    fn dest_id(&self) -> UnsignedByteField {
        self.pdu_header().common_pdu_conf().dest_entity_id
    }

    #[inline]
    fn transaction_seq_num(&self) -> UnsignedByteField {
        self.pdu_header().common_pdu_conf().transaction_seq_num
    }

    #[inline]
    fn transmission_mode(&self) -> TransmissionMode {
        self.pdu_header().common_pdu_conf().trans_mode
    }

    #[inline]
    fn direction(&self) -> Direction {
        self.pdu_header().common_pdu_conf().direction
    }

    #[inline]
    fn crc_flag(&self) -> CrcFlag {
        self.pdu_header().common_pdu_conf().crc_flag
    }

    #[inline]
    fn file_flag(&self) -> LargeFileFlag {
        self.pdu_header().common_pdu_conf().file_flag
    }

    #[inline]
    fn pdu_type(&self) -> PduType {
        self.pdu_header().pdu_type()
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType>;
}

/// Logical payload of a decoded PDU.
#[derive(Debug, PartialEq, Eq)]
pub enum PduPayload<'raw> {
    Metadata(MetadataPdu<'raw>),
    FileData(FileDataPdu<'raw>),
    Eof(EofPdu),
    Finished(FinishedPdu),
    Ack(AckPdu),
    Nak(NakPdu),
    KeepAlive(KeepAlivePdu),
    Prompt(PromptPdu),
}

impl PduPayload<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            PduPayload::Metadata(_) => "MD",
            PduPayload::FileData(_) => "FD",
            PduPayload::Eof(_) => "EOF",
            PduPayload::Finished(_) => "FIN",
            PduPayload::Ack(_) => "ACK",
            PduPayload::Nak(_) => "NAK",
            PduPayload::KeepAlive(_) => "KEEPALIVE",
            PduPayload::Prompt(_) => "PROMPT",
        }
    }
}

/// A fully decoded PDU: common header plus the kind-specific payload.
#[derive(Debug, PartialEq, Eq)]
pub struct DecodedPdu<'raw> {
    pub header: PduHeader,
    pub payload: PduPayload<'raw>,
}

/// Decode one raw frame into its logical PDU representation.
///
/// This is the inbound entry point of the codec: it interprets the common
/// header, dispatches on the PDU type and directive code, and runs the
/// kind-specific deserialization, which includes the trailer CRC check when
/// the header CRC flag is set.
pub fn decode_pdu(buf: &[u8]) -> Result<DecodedPdu<'_>, PduError> {
    let (header, header_len) = PduHeader::from_bytes(buf)?;
    if header.pdu_type() == PduType::FileData {
        let fd = FileDataPdu::from_bytes(buf)?;
        return Ok(DecodedPdu {
            header,
            payload: PduPayload::FileData(fd),
        });
    }
    if buf.len() < header_len + 1 {
        return Err(ByteConversionError::FromSliceTooSmall {
            found: buf.len(),
            expected: header_len + 1,
        }
        .into());
    }
    let directive =
        FileDirectiveType::try_from(buf[header_len]).map_err(|_| PduError::InvalidDirectiveType {
            found: buf[header_len],
            expected: None,
        })?;
    let payload = match directive {
        FileDirectiveType::MetadataPdu => PduPayload::Metadata(MetadataPdu::from_bytes(buf)?),
        FileDirectiveType::EofPdu => PduPayload::Eof(EofPdu::from_bytes(buf)?),
        FileDirectiveType::FinishedPdu => PduPayload::Finished(FinishedPdu::from_bytes(buf)?),
        FileDirectiveType::AckPdu => PduPayload::Ack(AckPdu::from_bytes(buf)?),
        FileDirectiveType::NakPdu => PduPayload::Nak(NakPdu::from_bytes(buf)?),
        FileDirectiveType::KeepAlivePdu => PduPayload::KeepAlive(KeepAlivePdu::from_bytes(buf)?),
        FileDirectiveType::PromptPdu => PduPayload::Prompt(PromptPdu::from_bytes(buf)?),
    };
    Ok(DecodedPdu { header, payload })
}

pub(crate) fn write_fss_field(
    file_flag: LargeFileFlag,
    file_size: u64,
    buf: &mut [u8],
) -> Result<usize, PduError> {
    Ok(if file_flag == LargeFileFlag::Large {
        buf[..core::mem::size_of::<u64>()].copy_from_slice(&file_size.to_be_bytes());
        core::mem::size_of::<u64>()
    } else {
        if file_size > u32::MAX as u64 {
            return Err(PduError::FileSizeTooLarge(file_size));
        }
        buf[..core::mem::size_of::<u32>()].copy_from_slice(&(file_size as u32).to_be_bytes());
        core::mem::size_of::<u32>()
    })
}

pub(crate) fn read_fss_field(file_flag: LargeFileFlag, buf: &[u8]) -> (usize, u64) {
    if file_flag == LargeFileFlag::Large {
        (
            core::mem::size_of::<u64>(),
            u64::from_be_bytes(buf[..core::mem::size_of::<u64>()].try_into().unwrap()),
        )
    } else {
        (
            core::mem::size_of::<u32>(),
            u32::from_be_bytes(buf[..core::mem::size_of::<u32>()].try_into().unwrap()).into(),
        )
    }
}

// This is a generic length check applicable to most PDU deserializations. It
// first checks whether a given buffer can hold an expected minimum size, and
// then it checks whether the PDU datafield length is larger than that
// expected minimum size.
pub(crate) fn generic_length_checks_pdu_deserialization(
    buf: &[u8],
    min_expected_len: usize,
    full_len_without_crc: usize,
) -> Result<(), ByteConversionError> {
    // Buffer too short to hold additional expected minimum datasize.
    if buf.len() < min_expected_len {
        return Err(ByteConversionError::FromSliceTooSmall {
            found: buf.len(),
            expected: min_expected_len,
        });
    }
    // This can happen if the PDU datafield length value is invalid.
    if full_len_without_crc < min_expected_len {
        return Err(ByteConversionError::FromSliceTooSmall {
            found: full_len_without_crc,
            expected: min_expected_len,
        });
    }
    Ok(())
}

pub(crate) fn add_pdu_crc(buf: &mut [u8], mut current_idx: usize) -> usize {
    let mut digest = CRC_CCITT_FALSE.digest();
    digest.update(&buf[..current_idx]);
    buf[current_idx..current_idx + 2].copy_from_slice(&digest.finalize().to_be_bytes());
    current_idx += 2;
    current_idx
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::util::{UbfU16, UbfU8};

    pub(crate) const TEST_SRC_ID: UbfU8 = UbfU8::new(5);
    pub(crate) const TEST_DEST_ID: UbfU8 = UbfU8::new(10);
    pub(crate) const TEST_SEQ_NUM: UbfU8 = UbfU8::new(20);

    pub(crate) fn common_pdu_conf(crc_flag: CrcFlag, fss: LargeFileFlag) -> CommonPduConfig {
        let mut pdu_conf =
            CommonPduConfig::new_with_byte_fields(TEST_SRC_ID, TEST_DEST_ID, TEST_SEQ_NUM)
                .expect("generating common PDU config failed");
        pdu_conf.crc_flag = crc_flag;
        pdu_conf.file_flag = fss;
        pdu_conf
    }

    pub(crate) fn verify_raw_header(pdu_header: &PduHeader, buf: &[u8]) {
        assert_eq!((buf[0] >> 5) & 0b111, CFDP_VERSION_2);
        assert_eq!((buf[0] >> 4) & 1, pdu_header.pdu_type as u8);
        assert_eq!((buf[0] >> 3) & 1, pdu_header.pdu_conf.direction as u8);
        assert_eq!((buf[0] >> 2) & 1, pdu_header.pdu_conf.trans_mode as u8);
        assert_eq!((buf[0] >> 1) & 1, pdu_header.pdu_conf.crc_flag as u8);
        assert_eq!(buf[0] & 1, pdu_header.pdu_conf.file_flag as u8);
        let pdu_datafield_len = u16::from_be_bytes(buf[1..3].try_into().unwrap());
        assert_eq!(pdu_datafield_len, pdu_header.pdu_datafield_len);
        assert_eq!((buf[3] >> 7) & 1, pdu_header.seg_ctrl as u8);
        let entity_id_len = pdu_header.pdu_conf.source_entity_id.size();
        // The raw width fields hold the actual number of octets minus one.
        assert_eq!((buf[3] >> 4) & 0b111, entity_id_len as u8 - 1);
        assert_eq!((buf[3] >> 3) & 0b1, pdu_header.seg_metadata_flag as u8);
        let seq_num_len = pdu_header.pdu_conf.transaction_seq_num.size();
        assert_eq!(buf[3] & 0b111, seq_num_len as u8 - 1);
        let mut current_idx = 4;
        let mut byte_field_check = |field_len: usize, ubf: &UnsignedByteField| {
            let read =
                UnsignedByteField::new_from_be_bytes(field_len, &buf[current_idx..]).unwrap();
            assert_eq!(read.value(), ubf.value());
            current_idx += field_len;
        };
        byte_field_check(entity_id_len, &pdu_header.pdu_conf.source_entity_id);
        byte_field_check(seq_num_len, &pdu_header.pdu_conf.transaction_seq_num);
        byte_field_check(entity_id_len, &pdu_header.pdu_conf.dest_entity_id);
    }

    #[test]
    fn test_basic_header_state() {
        let common_pdu_cfg =
            CommonPduConfig::new_with_byte_fields(UbfU8::new(1), UbfU8::new(2), UbfU8::new(3))
                .expect("common config creation failed");
        let pdu_header = PduHeader::new_for_file_directive(common_pdu_cfg, 5);
        assert_eq!(pdu_header.pdu_type(), PduType::FileDirective);
        assert_eq!(*pdu_header.common_pdu_conf(), common_pdu_cfg);
        // These should be 0 and ignored for non-filedata PDUs.
        assert_eq!(
            pdu_header.seg_metadata_flag(),
            SegmentMetadataFlag::NotPresent
        );
        assert_eq!(
            pdu_header.seg_ctrl(),
            SegmentationControl::NoRecordBoundaryPreservation
        );
        assert_eq!(pdu_header.pdu_datafield_len(), 5);
        assert_eq!(pdu_header.header_len(), 7);
        assert_eq!(pdu_header.pdu_len(), 12);
    }

    #[test]
    fn test_common_pdu_conf_partial_eq() {
        let common_pdu_cfg_0 =
            CommonPduConfig::new_with_byte_fields(UbfU8::new(1), UbfU8::new(2), UbfU8::new(3))
                .expect("common config creation failed");
        let common_pdu_cfg_1 =
            CommonPduConfig::new_with_byte_fields(UbfU16::new(1), UbfU16::new(2), UbfU16::new(3))
                .expect("common config creation failed");
        assert_eq!(common_pdu_cfg_0, common_pdu_cfg_1);
    }

    #[test]
    fn test_header_serialization_roundtrip_1_byte_fields() {
        let common_pdu_cfg =
            CommonPduConfig::new_with_byte_fields(UbfU8::new(1), UbfU8::new(2), UbfU8::new(3))
                .expect("common config creation failed");
        let pdu_header = PduHeader::new_for_file_directive(common_pdu_cfg, 5);
        let mut buf: [u8; 7] = [0; 7];
        let written = pdu_header.write_to_bytes(&mut buf).unwrap();
        assert_eq!(written, 7);
        verify_raw_header(&pdu_header, &buf);
        let (header_read_back, read_size) = PduHeader::from_bytes(&buf).unwrap();
        assert_eq!(read_size, 7);
        assert_eq!(header_read_back, pdu_header);
    }

    #[test]
    fn test_header_serialization_roundtrip_2_byte_fields() {
        let mut common_pdu_cfg = CommonPduConfig::new_with_byte_fields(
            UbfU16::new(0x0001),
            UbfU16::new(0x0203),
            UbfU16::new(0x0405),
        )
        .expect("common config creation failed");
        common_pdu_cfg.crc_flag = CrcFlag::WithCrc;
        common_pdu_cfg.direction = Direction::TowardsSender;
        common_pdu_cfg.trans_mode = TransmissionMode::Unacknowledged;
        common_pdu_cfg.file_flag = LargeFileFlag::Large;
        let pdu_header = PduHeader::new_for_file_data(
            common_pdu_cfg,
            5,
            SegmentMetadataFlag::Present,
            SegmentationControl::WithRecordBoundaryPreservation,
        );
        assert_eq!(pdu_header.header_len(), 10);
        let mut buf: [u8; 16] = [0; 16];
        let written = pdu_header.write_to_bytes(&mut buf).unwrap();
        assert_eq!(written, 10);
        verify_raw_header(&pdu_header, &buf);
        let (header_read_back, read_size) = PduHeader::from_bytes(&buf).unwrap();
        assert_eq!(read_size, 10);
        assert_eq!(header_read_back, pdu_header);
    }

    #[test]
    fn test_invalid_raw_version() {
        let pdu_header = PduHeader::new_for_file_directive(CommonPduConfig::default(), 5);
        let mut buf: [u8; 7] = [0; 7];
        pdu_header.write_to_bytes(&mut buf).unwrap();
        buf[0] &= !0b1110_0000;
        buf[0] |= (CFDP_VERSION_2 + 1) << 5;
        let error = PduHeader::from_bytes(&buf).unwrap_err();
        if let PduError::CfdpVersionMissmatch(raw_version) = error {
            assert_eq!(raw_version, CFDP_VERSION_2 + 1);
        } else {
            panic!("invalid exception: {}", error);
        }
    }

    #[test]
    fn test_header_buf_too_small() {
        let buf: [u8; 3] = [0; 3];
        let error = PduHeader::from_bytes(&buf).unwrap_err();
        if let PduError::ByteConversion(ByteConversionError::FromSliceTooSmall {
            found,
            expected,
        }) = error
        {
            assert_eq!(found, 3);
            assert_eq!(expected, FIXED_HEADER_LEN);
        } else {
            panic!("invalid exception: {}", error);
        }
    }

    #[test]
    fn test_invalid_raw_entity_id_len() {
        let pdu_header = PduHeader::new_for_file_directive(CommonPduConfig::default(), 5);
        let mut buf: [u8; 7] = [0; 7];
        pdu_header.write_to_bytes(&mut buf).unwrap();
        buf[3] &= !0b0111_0000;
        // Equivalent to a length of three.
        buf[3] |= 0b10 << 4;
        let error = PduHeader::from_bytes(&buf).unwrap_err();
        if let PduError::InvalidEntityLen(len) = error {
            assert_eq!(len, 3);
        } else {
            panic!("invalid exception {:?}", error)
        }
    }

    #[test]
    fn test_invalid_raw_seq_num_len() {
        let pdu_header = PduHeader::new_for_file_directive(CommonPduConfig::default(), 5);
        let mut buf: [u8; 7] = [0; 7];
        pdu_header.write_to_bytes(&mut buf).unwrap();
        buf[3] &= !0b0000_0111;
        buf[3] |= 0b10;
        let error = PduHeader::from_bytes(&buf).unwrap_err();
        if let PduError::InvalidTransactionSeqNumLen(len) = error {
            assert_eq!(len, 3);
        } else {
            panic!("invalid exception {:?}", error)
        }
    }

    #[test]
    fn test_missmatch_src_dest_id() {
        let src_id = UnsignedByteField::new(1, 5);
        let dest_id = UnsignedByteField::new(2, 5);
        let error = CommonPduConfig::new_with_byte_fields(src_id, dest_id, UbfU8::new(3))
            .unwrap_err();
        if let PduError::SourceDestIdLenMissmatch {
            src_id_len,
            dest_id_len,
        } = error
        {
            assert_eq!(src_id_len, 1);
            assert_eq!(dest_id_len, 2);
        } else {
            panic!("invalid exception {:?}", error)
        }
    }

    #[test]
    fn test_invalid_seq_num_width() {
        let invalid_byte_field = UnsignedByteField::new(3, 5);
        let error =
            CommonPduConfig::new_with_byte_fields(UbfU8::new(1), UbfU8::new(2), invalid_byte_field)
                .unwrap_err();
        if let PduError::InvalidTransactionSeqNumLen(len) = error {
            assert_eq!(len, 3);
        } else {
            panic!("invalid exception: {}", error)
        }
    }

    #[test]
    fn test_decode_dispatch_invalid_directive() {
        let pdu_header = PduHeader::new_for_file_directive(CommonPduConfig::default(), 2);
        let mut buf: [u8; 16] = [0; 16];
        let header_len = pdu_header.write_to_bytes(&mut buf).unwrap();
        buf[header_len] = 0x3f;
        let error = decode_pdu(&buf).unwrap_err();
        if let PduError::InvalidDirectiveType { found, expected } = error {
            assert_eq!(found, 0x3f);
            assert_eq!(expected, None);
        } else {
            panic!("invalid exception {:?}", error)
        }
    }

    #[test]
    #[cfg(feature = "serde")]
    fn test_serde_impl_condition_code() {
        crate::tests::generic_serde_test(ConditionCode::NakLimitReached);
    }

    #[test]
    #[cfg(feature = "serde")]
    fn test_serde_impl_pdu_header() {
        crate::tests::generic_serde_test(PduHeader::new_for_file_directive(
            CommonPduConfig::default(),
            5,
        ));
    }
}
