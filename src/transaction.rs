//! Per-transfer transaction state.
use crate::chunk::ChunkList;
use crate::config::CfdpClass;
use crate::crc::FileChecksum;
use crate::filestore::FileHandle;
use crate::pdu::{CommonPduConfig, ConditionCode, TransmissionMode};
use crate::timer::Timer;
use crate::TransferDirection;
use core::fmt::{Display, Formatter};
use delegate::delegate;
use std::path::PathBuf;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifier of one file transfer: the source entity ID and the transaction
/// sequence number assigned by that entity. Unique among all non-free
/// transactions of a channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransactionKey {
    pub source_id: u64,
    pub seq_num: u64,
}

impl TransactionKey {
    pub const fn new(source_id: u64, seq_num: u64) -> Self {
        Self { source_id, seq_num }
    }
}

impl Display for TransactionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {})", self.source_id, self.seq_num)
    }
}

/// Role of a transaction, fixed at allocation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TxnRole {
    /// Class 1 receive.
    R1,
    /// Class 2 receive.
    R2,
    /// Class 1 send. Driven by an external send collaborator.
    S1,
    /// Class 2 send. Driven by an external send collaborator.
    S2,
}

impl TxnRole {
    pub fn is_rx(&self) -> bool {
        matches!(self, TxnRole::R1 | TxnRole::R2)
    }

    pub fn class(&self) -> CfdpClass {
        match self {
            TxnRole::R1 | TxnRole::S1 => CfdpClass::Class1,
            TxnRole::R2 | TxnRole::S2 => CfdpClass::Class2,
        }
    }

    pub fn direction(&self) -> TransferDirection {
        if self.is_rx() {
            TransferDirection::Rx
        } else {
            TransferDirection::Tx
        }
    }

    /// Receive role matching the transmission mode of an inbound PDU.
    pub fn rx_role_for_mode(mode: TransmissionMode) -> Self {
        match mode {
            TransmissionMode::Acknowledged => TxnRole::R2,
            TransmissionMode::Unacknowledged => TxnRole::R1,
        }
    }
}

/// High-level state of a transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TxnState {
    /// Freshly allocated, no PDU applied yet.
    #[default]
    Idle,
    /// Normal protocol operation.
    Active,
    /// A fault occurred; remaining PDUs are consumed without effect while
    /// the transaction winds down.
    DropOnError,
    /// Terminal. The engine reaps the transaction into history.
    Finished,
}

/// Sub-state of a receive transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RxSubState {
    /// Nothing received yet, or only file data without metadata.
    #[default]
    WaitMd,
    RecvFileData,
    /// EOF received, completion check and checksum verification pending.
    WaitEof,
    /// Gaps remain after EOF, NAK cycle running.
    SendNak,
    /// Verdict reached, FIN emission pending.
    SendFin,
    WaitFinAck,
    /// Terminal sub-state.
    Complete,
}

/// Boolean state of a receive transaction.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TxnFlags {
    pub md_recv: bool,
    pub eof_recv: bool,
    pub crc_ok: bool,
    pub send_ack: bool,
    pub send_nak: bool,
    pub send_fin: bool,
    pub inactivity_fired: bool,
    pub canceled: bool,
    pub suspended: bool,
}

/// File names associated with a transaction.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TxnFilenames {
    /// Source file name as announced in the metadata PDU.
    pub src: String,
    /// Local destination path.
    pub dst: PathBuf,
    /// Temporary file path, present while file data arrived before metadata.
    pub temp: Option<PathBuf>,
}

/// Record of a completed transaction, kept in the bounded per-channel
/// history ring.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistoryEntry {
    pub key: TransactionKey,
    pub peer_eid: u64,
    pub direction: TransferDirection,
    pub src_name: String,
    pub dst_name: String,
    pub status: ConditionCode,
}

/// State of one file transfer.
///
/// Lifecycle: free pool slot, allocated on first matching PDU (receive) or
/// pending request (send), active until terminal, then reaped into history
/// and scrubbed back onto the freelist.
#[derive(Debug)]
pub struct Transaction {
    pub key: TransactionKey,
    pub chan_num: u8,
    pub role: TxnRole,
    pub state: TxnState,
    pub sub_state: RxSubState,
    /// PDU configuration captured from the first inbound PDU. Retains the
    /// peer IDs and the encoded field widths for every response.
    pub pdu_conf: CommonPduConfig,
    pub priority: u8,
    pub flags: TxnFlags,
    pub ack_timer: Option<Timer>,
    pub nak_timer: Option<Timer>,
    pub inactivity_timer: Option<Timer>,
    pub ack_retries: u8,
    pub nak_retries: u8,
    /// Known after metadata or EOF was received.
    pub fsize_expected: Option<u64>,
    pub bytes_received: u64,
    pub crc_expected: Option<u32>,
    pub crc: FileChecksum,
    /// Progress of the chunked checksum verification (R2) or of the
    /// streamed digest (R1).
    pub crc_bytes_consumed: u64,
    /// Condition code of the received EOF, echoed into the EOF-ACK.
    pub eof_cc: ConditionCode,
    pub chunks: ChunkList,
    pub fd: Option<FileHandle>,
    pub fnames: TxnFilenames,
    /// Latched once at finalization; `None` while in progress.
    pub status: Option<ConditionCode>,
}

impl Transaction {
    pub fn new_rx(
        key: TransactionKey,
        chan_num: u8,
        role: TxnRole,
        pdu_conf: CommonPduConfig,
        max_chunks: usize,
    ) -> Self {
        debug_assert!(role.is_rx());
        Self {
            key,
            chan_num,
            role,
            state: TxnState::Idle,
            sub_state: RxSubState::WaitMd,
            pdu_conf,
            priority: 0,
            flags: TxnFlags::default(),
            ack_timer: None,
            nak_timer: None,
            inactivity_timer: None,
            ack_retries: 0,
            nak_retries: 0,
            fsize_expected: None,
            bytes_received: 0,
            crc_expected: None,
            crc: FileChecksum::new(),
            crc_bytes_consumed: 0,
            eof_cc: ConditionCode::NoError,
            chunks: ChunkList::new(max_chunks),
            fd: None,
            fnames: TxnFilenames::default(),
            status: None,
        }
    }

    /// Send-side transaction shell occupying a pool slot and the pending
    /// queue. The send state machine itself lives outside this crate.
    pub fn new_tx(
        key: TransactionKey,
        chan_num: u8,
        role: TxnRole,
        priority: u8,
        src: String,
        dst: PathBuf,
        max_chunks: usize,
    ) -> Self {
        debug_assert!(!role.is_rx());
        let mut txn = Self::new_rx(key, chan_num, TxnRole::R1, CommonPduConfig::default(), max_chunks);
        txn.role = role;
        txn.priority = priority;
        txn.fnames.src = src;
        txn.fnames.dst = dst;
        txn
    }

    pub fn peer_eid(&self) -> u64 {
        use crate::util::UnsignedEnum;
        self.pdu_conf.source_id().value()
    }

    pub fn is_terminal(&self) -> bool {
        self.state == TxnState::Finished
    }

    /// Latch a status code. The first latched code wins, later faults do
    /// not overwrite it.
    pub fn latch_status(&mut self, status: ConditionCode) {
        if self.status.is_none() || self.status == Some(ConditionCode::NoError) {
            if self.status.is_none() || status.is_fault() {
                self.status = Some(status);
            }
        }
    }

    /// Effective status for FIN/history purposes.
    pub fn status_or_no_error(&self) -> ConditionCode {
        self.status.unwrap_or(ConditionCode::NoError)
    }

    /// The checksum phase runs when everything was received but the file
    /// content digest has not caught up yet.
    pub fn needs_crc_check(&self) -> bool {
        self.role == TxnRole::R2
            && self.state == TxnState::Active
            && !self.flags.suspended
            && !self.flags.send_fin
            && self.flags.md_recv
            && self.flags.eof_recv
            && !self.flags.crc_ok
            && self.status.is_none()
            && self
                .fsize_expected
                .map(|size| self.chunks.is_covered(size))
                .unwrap_or(false)
    }

    pub fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            key: self.key,
            peer_eid: self.peer_eid(),
            direction: self.role.direction(),
            src_name: self.fnames.src.clone(),
            dst_name: self.fnames.dst.to_string_lossy().into_owned(),
            status: self.status_or_no_error(),
        }
    }

    delegate! {
        to self.chunks {
            #[call(total_bytes)]
            pub fn chunked_bytes(&self) -> u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::ConditionCode;

    fn test_txn() -> Transaction {
        Transaction::new_rx(
            TransactionKey::new(1, 2),
            0,
            TxnRole::R2,
            CommonPduConfig::default(),
            8,
        )
    }

    #[test]
    fn test_key_display() {
        assert_eq!(TransactionKey::new(3, 42).to_string(), "(3, 42)");
    }

    #[test]
    fn test_role_helpers() {
        assert!(TxnRole::R1.is_rx());
        assert!(TxnRole::R2.is_rx());
        assert!(!TxnRole::S1.is_rx());
        assert_eq!(TxnRole::R2.class(), CfdpClass::Class2);
        assert_eq!(TxnRole::S1.class(), CfdpClass::Class1);
        assert_eq!(
            TxnRole::rx_role_for_mode(TransmissionMode::Acknowledged),
            TxnRole::R2
        );
        assert_eq!(
            TxnRole::rx_role_for_mode(TransmissionMode::Unacknowledged),
            TxnRole::R1
        );
    }

    #[test]
    fn test_status_latching_first_fault_wins() {
        let mut txn = test_txn();
        assert_eq!(txn.status, None);
        txn.latch_status(ConditionCode::FileChecksumFailure);
        txn.latch_status(ConditionCode::CancelRequestReceived);
        assert_eq!(txn.status, Some(ConditionCode::FileChecksumFailure));
    }

    #[test]
    fn test_no_error_upgradeable_to_fault() {
        let mut txn = test_txn();
        txn.latch_status(ConditionCode::NoError);
        txn.latch_status(ConditionCode::NakLimitReached);
        assert_eq!(txn.status, Some(ConditionCode::NakLimitReached));
        txn.latch_status(ConditionCode::FileSizeError);
        assert_eq!(txn.status, Some(ConditionCode::NakLimitReached));
    }

    #[test]
    fn test_needs_crc_check() {
        let mut txn = test_txn();
        txn.state = TxnState::Active;
        txn.flags.md_recv = true;
        txn.flags.eof_recv = true;
        txn.fsize_expected = Some(4);
        assert!(!txn.needs_crc_check());
        txn.chunks.add(0, 4);
        assert!(txn.needs_crc_check());
        txn.flags.suspended = true;
        assert!(!txn.needs_crc_check());
        txn.flags.suspended = false;
        txn.flags.crc_ok = true;
        assert!(!txn.needs_crc_check());
    }

    #[test]
    fn test_history_entry() {
        let mut txn = test_txn();
        txn.fnames.src = "a.bin".to_string();
        txn.fnames.dst = PathBuf::from("/dst/a.bin");
        txn.latch_status(ConditionCode::NoError);
        let entry = txn.history_entry();
        assert_eq!(entry.key, txn.key);
        assert_eq!(entry.direction, TransferDirection::Rx);
        assert_eq!(entry.src_name, "a.bin");
        assert_eq!(entry.dst_name, "/dst/a.bin");
        assert_eq!(entry.status, ConditionCode::NoError);
    }
}
