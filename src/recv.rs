//! Receive-side transaction state machines.
//!
//! Class 1 (R1) consumes a metadata/filedata/EOF stream, digesting the file
//! checksum on the fly, and never transmits. Class 2 (R2) adds the reliable
//! machinery: EOF acknowledgment, NAK based gap recovery, chunked checksum
//! verification and the FIN / FIN-ACK closing handshake.
//!
//! All handlers are plain functions over a transaction record and an
//! [RxContext] carrying the ports. PDU emission is flag-driven: receive
//! handlers and timer expiries only set `send_ack`/`send_nak`/`send_fin`,
//! and [tick] turns the flags into encoded PDUs when the per-wakeup
//! transmission allowance permits, in the order ACK, NAK, FIN.
use crate::config::{ChannelConfig, EngineConfig, MAX_NAK_SEGMENTS};
use crate::filestore::Filestore;
use crate::pdu::{
    AckPdu, ConditionCode, DecodedPdu, EofPdu, FileDataPdu, FinishedPdu, MetadataPdu, NakPdu,
    PduHeader, PduPayload, TransactionStatus, WritablePdu,
};
use crate::pdu::finished::{DeliveryCode, FileStatus};
use crate::report::{EngineEvent, Reporter};
use crate::timer::Timer;
use crate::transaction::{RxSubState, Transaction, TxnRole, TxnState};
use std::collections::VecDeque;
use std::path::PathBuf;

/// Ports and budgets a receive handler may touch.
pub(crate) struct RxContext<'a, F: Filestore, R: Reporter> {
    pub config: &'a EngineConfig,
    pub chan_config: &'a ChannelConfig,
    pub chan_num: u8,
    pub filestore: &'a mut F,
    pub reporter: &'a mut R,
    pub outbox: &'a mut VecDeque<Vec<u8>>,
    /// Remaining PDU generation allowance for this wakeup. `u32::MAX`
    /// means unlimited.
    pub tx_allowance: &'a mut u32,
}

impl<F: Filestore, R: Reporter> RxContext<'_, F, R> {
    fn report(&mut self, event: EngineEvent) {
        self.reporter.event(event);
    }

    /// Encode and stage one PDU if the allowance permits. Returns false
    /// when the caller has to keep its send flag set for the next wakeup.
    fn stage<P: WritablePdu>(&mut self, pdu: &P) -> bool {
        if *self.tx_allowance == 0 {
            return false;
        }
        match pdu.to_vec() {
            Ok(frame) => {
                if *self.tx_allowance != u32::MAX {
                    *self.tx_allowance -= 1;
                }
                self.outbox.push_back(frame);
                true
            }
            // Encoding a response we built ourselves only fails on logic
            // errors; drop it rather than wedging the transaction.
            Err(_) => true,
        }
    }

    fn arm_inactivity(&self, txn: &mut Transaction) {
        txn.inactivity_timer = Some(Timer::from_seconds(
            self.chan_config.inactivity_timer_s,
            self.config.ticks_per_second,
        ));
    }

    fn arm_ack_timer(&self, txn: &mut Transaction) {
        txn.ack_timer = Some(Timer::from_seconds(
            self.chan_config.ack_timer_s,
            self.config.ticks_per_second,
        ));
    }

    fn arm_nak_timer(&self, txn: &mut Transaction) {
        txn.nak_timer = Some(Timer::from_seconds(
            self.chan_config.nak_timer_s,
            self.config.ticks_per_second,
        ));
    }
}

/// Apply one inbound PDU to a receive transaction.
pub(crate) fn recv<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    pdu: &DecodedPdu<'_>,
    ctx: &mut RxContext<'_, F, R>,
) {
    if txn.is_terminal() {
        return;
    }
    // Any traffic for the transaction proves the peer is alive, even if the
    // PDU itself ends up dropped. Frozen timers stay frozen.
    if !txn.flags.suspended {
        ctx.arm_inactivity(txn);
    }
    match txn.role {
        TxnRole::R1 => r1_recv(txn, pdu, ctx),
        TxnRole::R2 => r2_recv(txn, pdu, ctx),
        // Send transactions are driven by an external collaborator; inbound
        // PDUs for them are not routed here.
        TxnRole::S1 | TxnRole::S2 => {}
    }
}

/// Per-wakeup processing: advance timers, run expiry actions and emit
/// flag-driven PDUs.
pub(crate) fn tick<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    ctx: &mut RxContext<'_, F, R>,
) {
    if txn.is_terminal() || txn.flags.suspended {
        return;
    }
    if txn.flags.canceled && txn.state != TxnState::Finished {
        txn.latch_status(ConditionCode::CancelRequestReceived);
        finalize(txn, ctx);
        return;
    }
    if let Some(timer) = txn.inactivity_timer.as_mut() {
        timer.tick();
        if timer.expired() {
            txn.inactivity_timer = None;
            send_inactivity_event(txn, ctx);
            txn.flags.inactivity_fired = true;
            txn.latch_status(ConditionCode::InactivityDetected);
            finalize(txn, ctx);
            return;
        }
    }
    // Explicit responses generated during receive go out first.
    if txn.flags.send_ack {
        let ack = AckPdu::new_for_eof_pdu(
            response_header(txn),
            txn.eof_cc,
            TransactionStatus::Active,
        );
        if ctx.stage(&ack) {
            txn.flags.send_ack = false;
        }
    }
    // Winding down after a sender-side cancel: only the EOF-ACK is owed.
    if txn.state == TxnState::DropOnError && !txn.flags.send_ack {
        finalize(txn, ctx);
        return;
    }
    ack_timer_tick(txn, ctx);
    nak_timer_tick(txn, ctx);
    if txn.flags.send_nak {
        if stage_nak(txn, ctx) {
            txn.flags.send_nak = false;
        }
    }
    if txn.flags.send_fin {
        if stage_fin(txn, ctx) {
            txn.flags.send_fin = false;
            txn.sub_state = RxSubState::WaitFinAck;
            ctx.arm_ack_timer(txn);
        }
    }
}

/// External cancel request. Takes effect on the next tick.
pub(crate) fn cancel(txn: &mut Transaction) {
    if !txn.is_terminal() {
        txn.flags.canceled = true;
    }
}

/// External abandon request: terminate immediately, without any closing
/// exchange with the peer.
pub(crate) fn abandon<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    ctx: &mut RxContext<'_, F, R>,
) {
    if txn.is_terminal() {
        return;
    }
    txn.latch_status(ConditionCode::CancelRequestReceived);
    finalize(txn, ctx);
}

/// Consume up to `budget` bytes of the per-wakeup checksum allowance.
/// Returns the number of bytes actually digested.
pub(crate) fn r2_calc_crc_chunk<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    ctx: &mut RxContext<'_, F, R>,
    budget: u32,
) -> u32 {
    let Some(file_size) = txn.fsize_expected else {
        return 0;
    };
    let Some(fd) = txn.fd else {
        return 0;
    };
    let mut buf = [0u8; 1024];
    let mut consumed: u32 = 0;
    while consumed < budget && txn.crc_bytes_consumed < file_size {
        let remaining = (file_size - txn.crc_bytes_consumed).min(buf.len() as u64) as u32;
        let want = (budget - consumed).min(remaining) as usize;
        match ctx.filestore.read_at(fd, txn.crc_bytes_consumed, &mut buf[..want]) {
            Ok(n) if n > 0 => {
                txn.crc.update(&buf[..n]);
                txn.crc_bytes_consumed += n as u64;
                consumed += n as u32;
            }
            _ => {
                ctx.report(EngineEvent::FilestoreError {
                    chan: ctx.chan_num,
                    key: txn.key,
                    operation: "crc read",
                });
                set_fin_status(txn, ConditionCode::FilestoreRejection);
                return consumed;
            }
        }
    }
    if txn.crc_bytes_consumed == file_size {
        finish_crc_check(txn, ctx);
    }
    consumed
}

/// Inactivity event emission, shared between the timer path and tests.
pub(crate) fn send_inactivity_event<F: Filestore, R: Reporter>(
    txn: &Transaction,
    ctx: &mut RxContext<'_, F, R>,
) {
    ctx.report(EngineEvent::InactivityTimerExpired {
        chan: ctx.chan_num,
        key: txn.key,
    });
}

fn response_header(txn: &Transaction) -> PduHeader {
    // The per-kind constructors force the direction flag; widths, peer IDs
    // and flags are echoed from the first inbound PDU.
    PduHeader::new_for_file_directive(txn.pdu_conf, 0)
}

/// Latch a terminal verdict and schedule the FIN carrying it.
fn set_fin_status(txn: &mut Transaction, status: ConditionCode) {
    txn.latch_status(status);
    txn.flags.send_fin = true;
    txn.flags.send_nak = false;
    txn.nak_timer = None;
    if txn.sub_state != RxSubState::WaitFinAck {
        txn.sub_state = RxSubState::SendFin;
    }
}

fn finalize<F: Filestore, R: Reporter>(txn: &mut Transaction, ctx: &mut RxContext<'_, F, R>) {
    if let Some(fd) = txn.fd.take() {
        ctx.filestore.close(fd);
    }
    txn.state = TxnState::Finished;
    txn.sub_state = RxSubState::Complete;
    txn.ack_timer = None;
    txn.nak_timer = None;
    txn.inactivity_timer = None;
    txn.flags.send_ack = false;
    txn.flags.send_nak = false;
    txn.flags.send_fin = false;
    ctx.report(EngineEvent::TransactionFinished {
        chan: ctx.chan_num,
        key: txn.key,
        status: txn.status_or_no_error(),
    });
}

fn r1_recv<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    pdu: &DecodedPdu<'_>,
    ctx: &mut RxContext<'_, F, R>,
) {
    match &pdu.payload {
        PduPayload::Metadata(md) => r1_recv_md(txn, md, ctx),
        PduPayload::FileData(fd) => r1_recv_fd(txn, fd, ctx),
        PduPayload::Eof(eof) => r1_recv_eof(txn, eof, ctx),
        other => {
            ctx.report(EngineEvent::PduDropped {
                chan: ctx.chan_num,
                key: txn.key,
                kind: other.kind(),
            });
        }
    }
}

fn r1_recv_md<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    md: &MetadataPdu<'_>,
    ctx: &mut RxContext<'_, F, R>,
) {
    if txn.flags.md_recv {
        return;
    }
    let Some(dst) = dest_path_from_md(txn, md, ctx) else {
        txn.latch_status(ConditionCode::FilestoreRejection);
        finalize(txn, ctx);
        return;
    };
    match ctx.filestore.open_write(&dst) {
        Ok(handle) => txn.fd = Some(handle),
        Err(_) => {
            ctx.report(EngineEvent::FilestoreError {
                chan: ctx.chan_num,
                key: txn.key,
                operation: "open",
            });
            txn.latch_status(ConditionCode::FilestoreRejection);
            finalize(txn, ctx);
            return;
        }
    }
    txn.fnames.dst = dst;
    txn.fsize_expected = Some(md.file_size());
    txn.flags.md_recv = true;
    txn.state = TxnState::Active;
    txn.sub_state = RxSubState::RecvFileData;
}

fn r1_recv_fd<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    fd_pdu: &FileDataPdu<'_>,
    ctx: &mut RxContext<'_, F, R>,
) {
    if !txn.flags.md_recv {
        // Class 1 can not recover a missed metadata PDU; without it there
        // is no destination to write to.
        ctx.report(EngineEvent::PduDropped {
            chan: ctx.chan_num,
            key: txn.key,
            kind: "FD",
        });
        return;
    }
    if !write_file_data(txn, fd_pdu, ctx) {
        finalize(txn, ctx);
        return;
    }
    // Digest in stream order. Out-of-order data is written but can not be
    // digested; the mismatch surfaces at EOF.
    if fd_pdu.offset() == txn.crc_bytes_consumed {
        txn.crc.update(fd_pdu.file_data());
        txn.crc_bytes_consumed = fd_pdu.end_offset();
    }
}

fn r1_recv_eof<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    eof: &EofPdu,
    ctx: &mut RxContext<'_, F, R>,
) {
    txn.flags.eof_recv = true;
    txn.eof_cc = eof.condition_code();
    if eof.condition_code() != ConditionCode::NoError {
        txn.latch_status(eof.condition_code());
        finalize(txn, ctx);
        return;
    }
    if let Some(expected) = txn.fsize_expected {
        if expected != eof.file_size() {
            ctx.report(EngineEvent::FileSizeMismatch {
                chan: ctx.chan_num,
                key: txn.key,
                expected,
                received: eof.file_size(),
            });
            txn.latch_status(ConditionCode::FileSizeError);
            finalize(txn, ctx);
            return;
        }
    }
    txn.fsize_expected = Some(eof.file_size());
    txn.crc_expected = Some(eof.file_checksum());
    let complete = txn.chunks.is_covered(eof.file_size())
        && txn.crc_bytes_consumed == eof.file_size();
    let computed = txn.crc.finalize();
    if complete && computed == eof.file_checksum() {
        txn.flags.crc_ok = true;
        txn.latch_status(ConditionCode::NoError);
    } else {
        ctx.report(EngineEvent::CrcMismatch {
            chan: ctx.chan_num,
            key: txn.key,
            expected: eof.file_checksum(),
            computed,
        });
        txn.latch_status(ConditionCode::FileChecksumFailure);
    }
    finalize(txn, ctx);
}

fn r2_recv<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    pdu: &DecodedPdu<'_>,
    ctx: &mut RxContext<'_, F, R>,
) {
    if txn.state == TxnState::DropOnError {
        return;
    }
    match &pdu.payload {
        PduPayload::Metadata(md) => r2_recv_md(txn, md, ctx),
        PduPayload::FileData(fd) => r2_recv_fd(txn, fd, ctx),
        PduPayload::Eof(eof) => r2_recv_eof(txn, eof, ctx),
        PduPayload::Ack(ack) => r2_recv_fin_ack(txn, ack, ctx),
        other => {
            // This entity is the receiver; NAK, FIN, keep alive and prompt
            // PDUs travel the other way.
            ctx.report(EngineEvent::PduDropped {
                chan: ctx.chan_num,
                key: txn.key,
                kind: other.kind(),
            });
        }
    }
}

fn dest_path_from_md<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    md: &MetadataPdu<'_>,
    ctx: &mut RxContext<'_, F, R>,
) -> Option<PathBuf> {
    if let Some(Ok(src)) = md.src_file_name().value_as_str() {
        txn.fnames.src = src.to_string();
    }
    match md.dest_file_name().value_as_str() {
        Some(Ok(dst)) if !dst.is_empty() => Some(PathBuf::from(dst)),
        _ => {
            ctx.report(EngineEvent::InvalidFilename {
                chan: ctx.chan_num,
                key: txn.key,
            });
            None
        }
    }
}

fn r2_recv_md<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    md: &MetadataPdu<'_>,
    ctx: &mut RxContext<'_, F, R>,
) {
    if txn.flags.md_recv {
        return;
    }
    if let Some(eof_size) = txn.fsize_expected {
        // EOF got here first; both PDUs announce the file size.
        if txn.flags.eof_recv && eof_size != md.file_size() {
            ctx.report(EngineEvent::FileSizeMismatch {
                chan: ctx.chan_num,
                key: txn.key,
                expected: md.file_size(),
                received: eof_size,
            });
            set_fin_status(txn, ConditionCode::FileSizeError);
            return;
        }
    }
    let Some(dst) = dest_path_from_md(txn, md, ctx) else {
        set_fin_status(txn, ConditionCode::FilestoreRejection);
        return;
    };
    if let Some(temp_path) = txn.fnames.temp.take() {
        // File data arrived first and went to a temporary file; move it
        // into place now that the destination name is known.
        if let Some(fd) = txn.fd.take() {
            ctx.filestore.close(fd);
        }
        let moved = ctx
            .filestore
            .rename(&temp_path, &dst)
            .and_then(|_| ctx.filestore.open_write(&dst));
        match moved {
            Ok(handle) => {
                txn.fd = Some(handle);
                ctx.report(EngineEvent::TempFileMoved {
                    chan: ctx.chan_num,
                    key: txn.key,
                });
            }
            Err(_) => {
                ctx.report(EngineEvent::FilestoreError {
                    chan: ctx.chan_num,
                    key: txn.key,
                    operation: "rename",
                });
                txn.fnames.temp = Some(temp_path);
                set_fin_status(txn, ConditionCode::FilestoreRejection);
                return;
            }
        }
    } else if txn.fd.is_none() {
        match ctx.filestore.open_write(&dst) {
            Ok(handle) => txn.fd = Some(handle),
            Err(_) => {
                ctx.report(EngineEvent::FilestoreError {
                    chan: ctx.chan_num,
                    key: txn.key,
                    operation: "open",
                });
                set_fin_status(txn, ConditionCode::FilestoreRejection);
                return;
            }
        }
    }
    txn.fnames.dst = dst;
    txn.fsize_expected = Some(md.file_size());
    txn.flags.md_recv = true;
    txn.state = TxnState::Active;
    if txn.sub_state == RxSubState::WaitMd {
        txn.sub_state = RxSubState::RecvFileData;
    }
    if txn.flags.eof_recv {
        r2_complete(txn, true, ctx);
    }
}

/// Common file data validation and write path. Returns false if the
/// transaction faulted.
fn write_file_data<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    fd_pdu: &FileDataPdu<'_>,
    ctx: &mut RxContext<'_, F, R>,
) -> bool {
    if let Some(size) = txn.fsize_expected {
        if fd_pdu.end_offset() > size {
            ctx.report(EngineEvent::FileDataBeyondEof {
                chan: ctx.chan_num,
                key: txn.key,
                offset: fd_pdu.offset(),
                length: fd_pdu.file_data().len() as u64,
            });
            txn.latch_status(ConditionCode::FileSizeError);
            return false;
        }
    }
    let Some(fd) = txn.fd else {
        return true;
    };
    if ctx
        .filestore
        .write_at(fd, fd_pdu.offset(), fd_pdu.file_data())
        .is_err()
    {
        ctx.report(EngineEvent::FilestoreError {
            chan: ctx.chan_num,
            key: txn.key,
            operation: "write",
        });
        txn.latch_status(ConditionCode::FilestoreRejection);
        return false;
    }
    let covered_before = txn.chunks.total_bytes();
    txn.chunks
        .add(fd_pdu.offset(), fd_pdu.file_data().len() as u64);
    let covered_after = txn.chunks.total_bytes();
    if covered_after > covered_before {
        txn.bytes_received += covered_after - covered_before;
        // Forward progress re-opens the NAK retry window.
        txn.nak_retries = 0;
    }
    true
}

fn r2_recv_fd<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    fd_pdu: &FileDataPdu<'_>,
    ctx: &mut RxContext<'_, F, R>,
) {
    txn.state = TxnState::Active;
    if !txn.flags.md_recv && txn.fd.is_none() {
        // Metadata was missed. Receive into a temporary file and ask for
        // the metadata PDU with a degenerate NAK.
        match ctx.filestore.open_tempfile(&ctx.config.tmp_dir) {
            Ok((handle, path)) => {
                txn.fd = Some(handle);
                txn.fnames.temp = Some(path);
                txn.sub_state = RxSubState::RecvFileData;
                txn.flags.send_nak = true;
                ctx.arm_nak_timer(txn);
                ctx.report(EngineEvent::TempFileOpened {
                    chan: ctx.chan_num,
                    key: txn.key,
                });
            }
            Err(_) => {
                ctx.report(EngineEvent::FilestoreError {
                    chan: ctx.chan_num,
                    key: txn.key,
                    operation: "open tempfile",
                });
                set_fin_status(txn, ConditionCode::FilestoreRejection);
                return;
            }
        }
    }
    if !write_file_data(txn, fd_pdu, ctx) {
        let status = txn.status_or_no_error();
        set_fin_status(txn, status);
        return;
    }
    ctx.arm_ack_timer(txn);
    if txn.flags.eof_recv {
        r2_complete(txn, true, ctx);
    }
}

fn r2_recv_eof<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    eof: &EofPdu,
    ctx: &mut RxContext<'_, F, R>,
) {
    txn.state = TxnState::Active;
    txn.eof_cc = eof.condition_code();
    txn.flags.send_ack = true;
    if txn.flags.eof_recv {
        // Duplicate EOF: the ACK flag set above answers it again.
        return;
    }
    if eof.condition_code() != ConditionCode::NoError {
        // The sender gave up on the transaction. Acknowledge and wind down.
        txn.latch_status(eof.condition_code());
        txn.flags.eof_recv = true;
        txn.state = TxnState::DropOnError;
        return;
    }
    if let Some(expected) = txn.fsize_expected {
        if txn.flags.md_recv && expected != eof.file_size() {
            ctx.report(EngineEvent::FileSizeMismatch {
                chan: ctx.chan_num,
                key: txn.key,
                expected,
                received: eof.file_size(),
            });
            txn.flags.eof_recv = true;
            set_fin_status(txn, ConditionCode::FileSizeError);
            return;
        }
    }
    txn.flags.eof_recv = true;
    txn.fsize_expected.get_or_insert(eof.file_size());
    txn.crc_expected = Some(eof.file_checksum());
    txn.sub_state = RxSubState::WaitEof;
    r2_complete(txn, true, ctx);
}

/// Completion check: called whenever received state may have advanced
/// towards completion. Either starts the NAK cycle for the missing parts or
/// clears the way for the chunked checksum verification.
fn r2_complete<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    ok_to_send_nak: bool,
    ctx: &mut RxContext<'_, F, R>,
) {
    if txn.status.map(|c| c.is_fault()).unwrap_or(false) {
        return;
    }
    if !txn.flags.eof_recv {
        return;
    }
    // Unwrap is fine: eof_recv implies the expected size is known.
    let file_size = txn.fsize_expected.unwrap();
    if !txn.flags.md_recv || !txn.chunks.is_covered(file_size) {
        if ok_to_send_nak {
            txn.flags.send_nak = true;
            txn.sub_state = RxSubState::SendNak;
            if txn.nak_timer.is_none() {
                ctx.arm_nak_timer(txn);
            }
        }
        return;
    }
    // Everything is on disk; the engine's checksum budget drives the rest.
    txn.flags.send_nak = false;
    txn.nak_timer = None;
    txn.sub_state = RxSubState::WaitEof;
    if txn.crc_bytes_consumed == file_size {
        finish_crc_check(txn, ctx);
    }
}

fn finish_crc_check<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    ctx: &mut RxContext<'_, F, R>,
) {
    // Unwraps are fine: the checksum phase only runs after EOF.
    let expected = txn.crc_expected.unwrap();
    let computed = txn.crc.finalize();
    if computed == expected {
        txn.flags.crc_ok = true;
        txn.latch_status(ConditionCode::NoError);
        txn.flags.send_fin = true;
        txn.sub_state = RxSubState::SendFin;
    } else {
        ctx.report(EngineEvent::CrcMismatch {
            chan: ctx.chan_num,
            key: txn.key,
            expected,
            computed,
        });
        set_fin_status(txn, ConditionCode::FileChecksumFailure);
    }
}

fn r2_recv_fin_ack<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    ack: &AckPdu,
    ctx: &mut RxContext<'_, F, R>,
) {
    use crate::pdu::FileDirectiveType;
    if ack.directive_code_of_acked_pdu() != FileDirectiveType::FinishedPdu
        || txn.sub_state != RxSubState::WaitFinAck
    {
        ctx.report(EngineEvent::PduDropped {
            chan: ctx.chan_num,
            key: txn.key,
            kind: "ACK",
        });
        return;
    }
    finalize(txn, ctx);
}

fn ack_timer_tick<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    ctx: &mut RxContext<'_, F, R>,
) {
    let Some(timer) = txn.ack_timer.as_mut() else {
        return;
    };
    timer.tick();
    if !timer.expired() {
        return;
    }
    txn.ack_timer = None;
    if txn.sub_state != RxSubState::WaitFinAck {
        return;
    }
    if txn.ack_retries < ctx.chan_config.ack_limit {
        txn.ack_retries += 1;
        txn.flags.send_fin = true;
    } else {
        ctx.report(EngineEvent::AckLimitReached {
            chan: ctx.chan_num,
            key: txn.key,
        });
        txn.latch_status(ConditionCode::PositiveAckLimitReached);
        finalize(txn, ctx);
    }
}

fn nak_timer_tick<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    ctx: &mut RxContext<'_, F, R>,
) {
    let Some(timer) = txn.nak_timer.as_mut() else {
        return;
    };
    timer.tick();
    if !timer.expired() {
        return;
    }
    txn.nak_timer = None;
    let still_missing = !txn.flags.md_recv
        || txn
            .fsize_expected
            .map(|size| !txn.chunks.is_covered(size))
            .unwrap_or(false);
    if !still_missing {
        return;
    }
    if txn.nak_retries >= ctx.chan_config.nak_limit {
        ctx.report(EngineEvent::NakLimitReached {
            chan: ctx.chan_num,
            key: txn.key,
        });
        set_fin_status(txn, ConditionCode::NakLimitReached);
        return;
    }
    txn.nak_retries += 1;
    txn.flags.send_nak = true;
}

fn stage_nak<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    ctx: &mut RxContext<'_, F, R>,
) -> bool {
    let header = response_header(txn);
    let nak = if !txn.flags.md_recv {
        // "Send me the metadata": scope (0, 0), no segments.
        NakPdu::new(header, 0, 0, Vec::new())
    } else {
        let Some(file_size) = txn.fsize_expected else {
            // Gaps are only known once EOF announced the size; nothing to
            // request yet.
            return true;
        };
        let mut segments = Vec::new();
        txn.chunks
            .compute_gaps(file_size, 0, MAX_NAK_SEGMENTS, |gap| {
                segments.push((gap.offset, gap.end()));
            });
        if segments.is_empty() {
            return true;
        }
        NakPdu::new(header, 0, file_size, segments)
    };
    match nak {
        Ok(nak) => {
            if !ctx.stage(&nak) {
                return false;
            }
            ctx.arm_nak_timer(txn);
            true
        }
        // A scope which does not fit the negotiated file size flag is a
        // protocol state this receiver can not get into.
        Err(_) => true,
    }
}

fn stage_fin<F: Filestore, R: Reporter>(
    txn: &mut Transaction,
    ctx: &mut RxContext<'_, F, R>,
) -> bool {
    let status = txn.status_or_no_error();
    let (delivery_code, file_status) = if status == ConditionCode::NoError {
        (DeliveryCode::Complete, FileStatus::Retained)
    } else if status == ConditionCode::FilestoreRejection {
        (DeliveryCode::Incomplete, FileStatus::DiscardedFsRejection)
    } else {
        (DeliveryCode::Incomplete, FileStatus::Unreported)
    };
    let fin = FinishedPdu::new_generic(
        response_header(txn),
        status,
        delivery_code,
        file_status,
        None,
    );
    ctx.stage(&fin)
}
