//! Engine configuration.
//!
//! All values are loaded once at initialization, the core only reads them.
//! The structures mirror the layout of the mission configuration table:
//! global engine parameters, one entry per channel, and per-channel polling
//! directory entries. With the `serde` feature (default), the structures can
//! be deserialized from TOML or any other serde format.
use std::path::PathBuf;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Compile-time size of the PDU data buffer. Outgoing file data chunks must
/// fit into this together with the largest possible header.
pub const PDU_DATA_BUF_SIZE: usize = 2048;

/// Upper bound for segment requests in a single NAK PDU.
pub const MAX_NAK_SEGMENTS: usize = 58;

/// Chunk list capacity of a single receive transaction.
pub const MAX_CHUNKS_PER_TRANSACTION: usize = 16;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("ticks_per_second must not be zero")]
    ZeroTicksPerSecond,
    #[error("rx_crc_calc_bytes_per_wakeup must be a positive multiple of 1024, got {0}")]
    InvalidCrcBytesPerWakeup(u32),
    #[error("outgoing_file_chunk_size {0} exceeds the PDU data buffer size {max}", max = PDU_DATA_BUF_SIZE)]
    ChunkSizeTooLarge(u16),
    #[error("outgoing_file_chunk_size must not be zero")]
    ZeroChunkSize,
    #[error("at least one channel must be configured")]
    NoChannels,
    #[error("channel {0}: transaction pool share must not be zero")]
    ZeroPoolShare(usize),
}

/// CFDP transfer class.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CfdpClass {
    /// Unacknowledged operation.
    Class1,
    /// Acknowledged operation with NAK based retransmission.
    Class2,
}

/// Configuration entry for directory polling.
///
/// The engine only owns the enable flag at runtime; scanning the directory
/// and producing pending transactions is the job of the
/// [crate::transport::TransactionSource] collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PollDirConfig {
    /// Seconds to wait before polling the directory again.
    pub interval_sec: u32,
    /// Priority for transactions placed on the pending queue.
    pub priority: u8,
    pub class: CfdpClass,
    pub dest_eid: u64,
    pub src_dir: PathBuf,
    pub dst_dir: PathBuf,
    pub enabled: bool,
}

/// Configuration entry for one CFDP channel.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelConfig {
    /// Maximum number of PDUs to send per wakeup (0 means unlimited).
    pub max_outgoing_messages_per_wakeup: u32,
    /// Maximum number of inbound messages to process per wakeup.
    pub rx_max_messages_per_wakeup: u32,
    /// Acknowledge timer in seconds.
    pub ack_timer_s: u32,
    /// Non-acknowledge timer in seconds.
    pub nak_timer_s: u32,
    /// Inactivity timer in seconds.
    pub inactivity_timer_s: u32,
    /// Number of times to wait out the ACK timer before giving up, for
    /// example when waiting for a FIN-ACK after sending FIN.
    pub ack_limit: u8,
    /// Number of times to re-send a NAK without any progress before giving
    /// up. A coverage-increasing file data PDU resets the count.
    pub nak_limit: u8,
    /// Message ID for inbound PDUs.
    pub mid_input: u32,
    /// Message ID for outbound PDUs.
    pub mid_output: u32,
    /// Depth of the inbound message pipe.
    pub pipe_depth_input: u16,
    /// Transaction pool slots reserved for this channel.
    pub max_simultaneous_transactions: u16,
    /// Bounded history ring size.
    pub history_depth: u16,
    #[cfg_attr(feature = "serde", serde(default))]
    pub polldirs: Vec<PollDirConfig>,
    /// Name of the throttling semaphore owned by the downlink task.
    pub sem_name: String,
    /// If true, the channel moves pending transactions to the active queue.
    pub dequeue_enabled: bool,
    /// Move finished outbound files here instead of deleting them.
    #[cfg_attr(feature = "serde", serde(default))]
    pub move_dir: Option<PathBuf>,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineConfig {
    /// Expected wakeups per second. Pins the timer resolution.
    pub ticks_per_second: u32,
    /// File checksum budget per wakeup, shared by all class 2 receive
    /// transactions in the checksum phase. Must be a positive multiple of
    /// 1024.
    pub rx_crc_calc_bytes_per_wakeup: u32,
    /// The local CFDP entity ID.
    pub local_eid: u64,
    pub channels: Vec<ChannelConfig>,
    /// Maximum file data size for outgoing PDUs.
    pub outgoing_file_chunk_size: u16,
    /// Directory for temporary files opened before metadata arrives.
    pub tmp_dir: PathBuf,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ticks_per_second == 0 {
            return Err(ConfigError::ZeroTicksPerSecond);
        }
        if self.rx_crc_calc_bytes_per_wakeup == 0 || self.rx_crc_calc_bytes_per_wakeup % 1024 != 0
        {
            return Err(ConfigError::InvalidCrcBytesPerWakeup(
                self.rx_crc_calc_bytes_per_wakeup,
            ));
        }
        if self.outgoing_file_chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.outgoing_file_chunk_size as usize > PDU_DATA_BUF_SIZE {
            return Err(ConfigError::ChunkSizeTooLarge(self.outgoing_file_chunk_size));
        }
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        for (index, chan) in self.channels.iter().enumerate() {
            if chan.max_simultaneous_transactions == 0 {
                return Err(ConfigError::ZeroPoolShare(index));
            }
        }
        Ok(())
    }

    /// Total transaction pool capacity over all channels.
    pub fn pool_capacity(&self) -> usize {
        self.channels
            .iter()
            .map(|c| c.max_simultaneous_transactions as usize)
            .sum()
    }

    /// Small single-channel configuration used throughout the test suites.
    pub fn single_channel_for_test() -> Self {
        Self {
            ticks_per_second: 10,
            rx_crc_calc_bytes_per_wakeup: 4096,
            local_eid: 10,
            channels: vec![ChannelConfig {
                max_outgoing_messages_per_wakeup: 4,
                rx_max_messages_per_wakeup: 8,
                ack_timer_s: 2,
                nak_timer_s: 2,
                inactivity_timer_s: 10,
                ack_limit: 2,
                nak_limit: 2,
                mid_input: 0x18c8,
                mid_output: 0x08c2,
                pipe_depth_input: 16,
                max_simultaneous_transactions: 8,
                history_depth: 4,
                polldirs: Vec::new(),
                sem_name: "cf_throttle_0".to_string(),
                dequeue_enabled: true,
                move_dir: None,
            }],
            outgoing_file_chunk_size: 1024,
            tmp_dir: PathBuf::from("/tmp/cf"),
        }
    }
}
