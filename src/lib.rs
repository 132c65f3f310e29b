//! # CCSDS File Delivery Protocol (CFDP) receive engine
//!
//! This crate contains a tick-driven CFDP engine core geared towards embedded
//! flight software use. It implements the receive side of
//! [CCSDS 727.0-B-5](https://public.ccsds.org/Pubs/727x0b5.pdf):
//!
//!  - Class 1 (unacknowledged) and class 2 (acknowledged) receive transaction
//!    state machines, including NAK based gap recovery, EOF/FIN/ACK sequencing
//!    and chunked file checksum verification.
//!  - A bit-exact PDU codec for the metadata, file data, EOF, finished, ACK,
//!    NAK, keep alive and prompt PDU types with variable-width entity IDs and
//!    32 or 64 bit file size fields selected by the large file header flag.
//!  - The per-wakeup scheduler: inbound draining, transaction ticking, bounded
//!    and throttled transmission, and transaction pool/queue management.
//!
//! The engine never consults a wall clock. All timeouts are quantised to the
//! periodic [wakeup](engine::Engine::wakeup), which makes the core fully
//! deterministic and testable without any time mocking. Interaction with the
//! outside world goes through narrow ports: [filestore::Filestore] for file
//! access, [transport::PduTransport] for the underlying message bus and
//! [report::Reporter] for classified event emission.
use core::fmt::{Display, Formatter};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod channel;
pub mod chunk;
pub mod cmd;
pub mod config;
pub mod crc;
pub mod engine;
pub mod filestore;
pub mod pdu;
pub mod pool;
pub mod recv;
pub mod report;
pub mod timer;
pub mod transaction;
pub mod transport;
pub mod util;

/// Error type for low-level byte conversions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ByteConversionError {
    /// The target buffer is too small. Contains the passed buffer length and
    /// the expected minimum size.
    #[error("target slice with size {found} too small, expected at least {expected} bytes")]
    ToSliceTooSmall { found: usize, expected: usize },
    /// The source buffer is too small. Contains the passed buffer length and
    /// the expected minimum size.
    #[error("source slice with size {found} too small, expected at least {expected} bytes")]
    FromSliceTooSmall { found: usize, expected: usize },
}

/// Direction of a transfer as seen from the local entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TransferDirection {
    Rx,
    Tx,
}

impl Display for TransferDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            TransferDirection::Rx => write!(f, "RX"),
            TransferDirection::Tx => write!(f, "TX"),
        }
    }
}
