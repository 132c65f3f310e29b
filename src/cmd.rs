//! Decoded ground command surface.
//!
//! Command parsing and validation of the raw command packets is an external
//! concern; the engine receives these already-decoded requests through
//! [crate::engine::Engine::handle_command] and answers with a typed result.
use crate::transaction::TransactionKey;
use crate::transport::PlaybackRequest;

/// Scope of a reset request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResetScope {
    /// Counters and history of every channel.
    All,
    /// Counters only.
    Stats,
    /// History rings only.
    History,
}

/// Per-channel parameters reachable through `SetParam`/`GetParam`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParamId {
    AckTimerS,
    NakTimerS,
    InactivityTimerS,
    AckLimit,
    NakLimit,
    /// Global, the channel argument is ignored.
    RxCrcBytesPerWakeup,
    /// Global, the channel argument is ignored.
    OutgoingFileChunkSize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Noop,
    Reset(ResetScope),
    SetParam { chan: u8, id: ParamId, value: u32 },
    GetParam { chan: u8, id: ParamId },
    EnableChannel(u8),
    DisableChannel(u8),
    CancelTxn(TransactionKey),
    SuspendTxn(TransactionKey),
    ResumeTxn(TransactionKey),
    AbandonTxn(TransactionKey),
    PlaybackDir(PlaybackRequest),
    PollDirControl { chan: u8, index: u8, enable: bool },
}

/// Successful command outcome.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommandAck {
    Ok,
    Param(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("channel {0} does not exist")]
    UnknownChannel(u8),
    #[error("transaction {0} not found")]
    UnknownTransaction(TransactionKey),
    #[error("polling directory index {index} does not exist on channel {chan}")]
    UnknownPollDir { chan: u8, index: u8 },
    #[error("invalid value {value} for parameter {id:?}")]
    InvalidParamValue { id: ParamId, value: u32 },
    #[error("transaction {0} is not suspended")]
    NotSuspended(TransactionKey),
    #[error("no transaction source attached")]
    NoTransactionSource,
    #[error("playback request rejected by the transaction source")]
    PlaybackRejected,
}
