//! Classified engine event reporting.
//!
//! The engine emits typed events instead of formatted text. The [Reporter]
//! port decides what happens with them: the provided [TracingReporter] maps
//! them onto `tracing` levels, flight integrations typically translate them
//! into their telemetry event service.
use crate::pdu::{ConditionCode, PduError};
use crate::transaction::TransactionKey;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Error,
}

/// Events emitted by the engine core.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineEvent {
    /// An inbound frame failed to decode and was dropped.
    PduDecodeFailed { chan: u8, error: PduError },
    /// A well-formed PDU was dropped, for example because it does not fit
    /// the transaction state it was routed to.
    PduDropped {
        chan: u8,
        key: TransactionKey,
        kind: &'static str,
    },
    /// An inbound PDU arrived for an unseen transaction but the pool had no
    /// free slot.
    PoolExhausted { chan: u8 },
    /// Metadata without a matching transaction and without a file directive
    /// the receive side can start from.
    UnexpectedPdu { chan: u8, kind: &'static str },
    /// A metadata PDU carried no usable destination file name.
    InvalidFilename { chan: u8, key: TransactionKey },
    /// File data arrived before metadata, reception continues into a
    /// temporary file.
    TempFileOpened { chan: u8, key: TransactionKey },
    /// Late metadata arrived and the temporary file was moved into place.
    TempFileMoved { chan: u8, key: TransactionKey },
    /// A filestore operation failed.
    FilestoreError {
        chan: u8,
        key: TransactionKey,
        operation: &'static str,
    },
    /// File size in the EOF PDU contradicts the metadata PDU.
    FileSizeMismatch {
        chan: u8,
        key: TransactionKey,
        expected: u64,
        received: u64,
    },
    /// File data beyond the announced file size.
    FileDataBeyondEof {
        chan: u8,
        key: TransactionKey,
        offset: u64,
        length: u64,
    },
    /// Final checksum verification failed.
    CrcMismatch {
        chan: u8,
        key: TransactionKey,
        expected: u32,
        computed: u32,
    },
    /// The inactivity timer of a transaction fired.
    InactivityTimerExpired { chan: u8, key: TransactionKey },
    /// The NAK retry limit was exhausted without progress.
    NakLimitReached { chan: u8, key: TransactionKey },
    /// The ACK retry limit was exhausted waiting for a FIN-ACK.
    AckLimitReached { chan: u8, key: TransactionKey },
    /// A transaction reached its terminal state.
    TransactionFinished {
        chan: u8,
        key: TransactionKey,
        status: ConditionCode,
    },
    /// Outbound transmission failed on the bus port.
    TransportSendFailed { chan: u8 },
}

impl EngineEvent {
    pub fn severity(&self) -> Severity {
        match self {
            EngineEvent::TempFileOpened { .. }
            | EngineEvent::TempFileMoved { .. }
            | EngineEvent::TransactionFinished { .. } => Severity::Info,
            EngineEvent::PduDropped { .. } | EngineEvent::UnexpectedPdu { .. } => Severity::Debug,
            _ => Severity::Error,
        }
    }
}

/// Event sink port.
pub trait Reporter {
    fn event(&mut self, event: EngineEvent);
}

/// Default reporter forwarding events to the `tracing` ecosystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn event(&mut self, event: EngineEvent) {
        match event.severity() {
            Severity::Debug => tracing::debug!(?event, "cfdp event"),
            Severity::Info => tracing::info!(?event, "cfdp event"),
            Severity::Error => tracing::warn!(?event, "cfdp event"),
        }
    }
}

/// Reporter retaining every event, for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub events: Vec<EngineEvent>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, predicate: impl Fn(&EngineEvent) -> bool) -> bool {
        self.events.iter().any(predicate)
    }
}

impl Reporter for RecordingReporter {
    fn event(&mut self, event: EngineEvent) {
        self.events.push(event);
    }
}
