//! Engine orchestration: the per-wakeup scheduler.
//!
//! One [Engine] owns the channels, the shared transaction pool and the
//! ports. The host calls [Engine::wakeup] periodically; everything the
//! engine does happens inside that call, in a fixed order per channel:
//! drain inbound messages, pull pending send requests, tick every active
//! transaction (with the shared checksum budget split round-robin), drain
//! the staged PDUs to the transport, and reap terminal transactions into
//! history.
use crate::channel::Channel;
use crate::cmd::{Command, CommandAck, CommandError, ParamId, ResetScope};
use crate::config::{ConfigError, EngineConfig, MAX_CHUNKS_PER_TRANSACTION, PDU_DATA_BUF_SIZE};
use crate::filestore::Filestore;
use crate::pdu::{decode_pdu, DecodedPdu, Direction, PduPayload};
use crate::pool::{Pool, SlotId};
use crate::recv;
use crate::recv::RxContext;
use crate::report::{EngineEvent, Reporter};
use crate::transaction::{Transaction, TransactionKey, TxnRole};
use crate::transport::{PduTransport, TransactionSource};
use crate::util::UnsignedEnum;

/// Tick-driven CFDP engine.
pub struct Engine<F: Filestore, T: PduTransport, R: Reporter> {
    config: EngineConfig,
    channels: Vec<Channel>,
    pool: Pool,
    filestore: F,
    transport: T,
    reporter: R,
    source: Option<Box<dyn TransactionSource>>,
    /// Sequence number counter for locally-initiated send transactions.
    next_seq_num: u64,
}

impl<F: Filestore, T: PduTransport, R: Reporter> Engine<F, T, R> {
    pub fn new(
        config: EngineConfig,
        filestore: F,
        transport: T,
        reporter: R,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let channels = config.channels.iter().map(Channel::new).collect();
        let pool = Pool::new(config.pool_capacity());
        Ok(Self {
            config,
            channels,
            pool,
            filestore,
            transport,
            reporter,
            source: None,
            next_seq_num: 0,
        })
    }

    /// Attach the producer for the send side.
    pub fn set_transaction_source(&mut self, source: Box<dyn TransactionSource>) {
        self.source = Some(source);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn channel(&self, chan: u8) -> &Channel {
        &self.channels[chan as usize]
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn filestore(&self) -> &F {
        &self.filestore
    }

    pub fn filestore_mut(&mut self) -> &mut F {
        &mut self.filestore
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// One engine cycle. The only clock the engine ever sees.
    pub fn wakeup(&mut self) {
        let mut crc_budget = self.config.rx_crc_calc_bytes_per_wakeup;
        for chan_num in 0..self.channels.len() as u8 {
            if !self.channels[chan_num as usize].is_enabled() {
                continue;
            }
            self.reset_tx_allowance(chan_num);
            self.rx_phase(chan_num);
            self.source_phase(chan_num);
            self.tick_phase(chan_num, &mut crc_budget);
            self.tx_phase(chan_num);
            self.reap_phase(chan_num);
        }
    }

    fn reset_tx_allowance(&mut self, chan_num: u8) {
        let max = self.config.channels[chan_num as usize].max_outgoing_messages_per_wakeup;
        self.channels[chan_num as usize].tx_allowance = if max == 0 { u32::MAX } else { max };
    }

    /// Drain up to the configured number of inbound messages and apply them.
    fn rx_phase(&mut self, chan_num: u8) {
        let ci = chan_num as usize;
        let max = self.config.channels[ci].rx_max_messages_per_wakeup.max(1);
        for _ in 0..max {
            let Some(frame) = self.transport.recv(chan_num) else {
                break;
            };
            self.channels[ci].stats.pdus_received += 1;
            match decode_pdu(&frame) {
                Ok(decoded) => self.dispatch(chan_num, &decoded),
                Err(error) => {
                    self.channels[ci].stats.decode_errors += 1;
                    self.reporter
                        .event(EngineEvent::PduDecodeFailed { chan: chan_num, error });
                }
            }
        }
    }

    /// Route one decoded PDU to its transaction, allocating a receive
    /// transaction on first sight of an unseen key.
    fn dispatch(&mut self, chan_num: u8, decoded: &DecodedPdu<'_>) {
        let ci = chan_num as usize;
        let conf = decoded.header.common_pdu_conf();
        let key = TransactionKey::new(
            conf.source_id().value(),
            conf.transaction_seq_num.value(),
        );
        let slot = self.channels[ci].find_queued(&self.pool, chan_num, key);
        let slot = match slot {
            Some(slot) => slot,
            None => {
                if !self.startable(decoded) {
                    self.channels[ci].stats.pdus_dropped += 1;
                    self.reporter.event(EngineEvent::UnexpectedPdu {
                        chan: chan_num,
                        kind: decoded.payload.kind(),
                    });
                    return;
                }
                let role = TxnRole::rx_role_for_mode(conf.trans_mode);
                let txn = Transaction::new_rx(
                    key,
                    chan_num,
                    role,
                    *conf,
                    MAX_CHUNKS_PER_TRANSACTION,
                );
                match self.pool.alloc(txn) {
                    Some(slot) => {
                        tracing::debug!(chan = chan_num, %key, ?role, "new rx transaction");
                        self.channels[ci].push_rx_active(slot);
                        slot
                    }
                    None => {
                        self.channels[ci].stats.pdus_dropped += 1;
                        self.reporter
                            .event(EngineEvent::PoolExhausted { chan: chan_num });
                        return;
                    }
                }
            }
        };
        let config = &self.config;
        let chan = &mut self.channels[ci];
        let (outbox, tx_allowance) = chan.tx_parts();
        let mut ctx = RxContext {
            config,
            chan_config: &config.channels[ci],
            chan_num,
            filestore: &mut self.filestore,
            reporter: &mut self.reporter,
            outbox,
            tx_allowance,
        };
        recv::recv(self.pool.get_mut(slot), decoded, &mut ctx);
    }

    /// A PDU can start a new receive transaction if it is addressed to this
    /// entity and the receive role can make sense of it: metadata always,
    /// and for acknowledged mode also file data and EOF, where the missed
    /// metadata is recovered through the NAK machinery.
    fn startable(&self, decoded: &DecodedPdu<'_>) -> bool {
        let conf = decoded.header.common_pdu_conf();
        if conf.direction != Direction::TowardsReceiver {
            return false;
        }
        if conf.dest_id().value() != self.config.local_eid {
            return false;
        }
        match &decoded.payload {
            PduPayload::Metadata(_) => true,
            // Without metadata, only class 2 can recover through the NAK
            // machinery; class 1 has no way to learn the file name.
            PduPayload::FileData(_) | PduPayload::Eof(_) => {
                TxnRole::rx_role_for_mode(conf.trans_mode) == TxnRole::R2
            }
            _ => false,
        }
    }

    /// Pull pending send requests from the attached source onto the
    /// priority-ordered pending queue, and keep the active send queue fed.
    fn source_phase(&mut self, chan_num: u8) {
        let ci = chan_num as usize;
        if let Some(source) = self.source.as_mut() {
            while self.pool.free_count() > 0 {
                let Some(request) = source.next_pending(chan_num) else {
                    break;
                };
                let role = match request.class {
                    crate::config::CfdpClass::Class1 => TxnRole::S1,
                    crate::config::CfdpClass::Class2 => TxnRole::S2,
                };
                let key = TransactionKey::new(self.config.local_eid, self.next_seq_num);
                self.next_seq_num = self.next_seq_num.wrapping_add(1);
                let txn = Transaction::new_tx(
                    key,
                    chan_num,
                    role,
                    request.priority,
                    request.src.to_string_lossy().into_owned(),
                    request.dst,
                    MAX_CHUNKS_PER_TRANSACTION,
                );
                let priority = txn.priority;
                // Unwrap is fine, free_count was checked above.
                let slot = self.pool.alloc(txn).unwrap();
                self.channels[ci].push_pending(slot, priority);
            }
        }
        let chan = &mut self.channels[ci];
        if chan.dequeue_enabled && chan.tx_active().is_empty() {
            chan.dequeue_pending();
        }
    }

    /// Tick every active receive transaction, rotating the start position
    /// so late queue entries are not starved of the transmission allowance.
    fn tick_phase(&mut self, chan_num: u8, crc_budget: &mut u32) {
        let ci = chan_num as usize;
        let slots: Vec<SlotId> = {
            let chan = &self.channels[ci];
            let count = chan.rx_active().len();
            if count == 0 {
                return;
            }
            let start = chan.tick_cursor % count;
            chan.rx_active()
                .iter()
                .cycle()
                .skip(start)
                .take(count)
                .copied()
                .collect()
        };
        self.channels[ci].tick_cursor = self.channels[ci].tick_cursor.wrapping_add(1);
        let eligible = slots
            .iter()
            .filter(|slot| self.pool.get(**slot).needs_crc_check())
            .count() as u32;
        // Equal split of the wakeup budget, floored to the read granularity.
        let share = if eligible > 0 {
            ((*crc_budget / eligible) / 1024).max(1) * 1024
        } else {
            0
        };
        for slot in slots {
            let config = &self.config;
            let chan = &mut self.channels[ci];
            let (outbox, tx_allowance) = chan.tx_parts();
            let mut ctx = RxContext {
                config,
                chan_config: &config.channels[ci],
                chan_num,
                filestore: &mut self.filestore,
                reporter: &mut self.reporter,
                outbox,
                tx_allowance,
            };
            let txn = self.pool.get_mut(slot);
            recv::tick(txn, &mut ctx);
            if *crc_budget > 0 && txn.needs_crc_check() {
                let grant = share.min(*crc_budget);
                let consumed = recv::r2_calc_crc_chunk(txn, &mut ctx, grant);
                *crc_budget -= consumed.min(*crc_budget);
            }
        }
    }

    /// Emit staged PDUs, bounded by the per-wakeup cap and the transport
    /// throttle semaphore.
    fn tx_phase(&mut self, chan_num: u8) {
        let ci = chan_num as usize;
        let max = self.config.channels[ci].max_outgoing_messages_per_wakeup;
        let mut sent: u32 = 0;
        while max == 0 || sent < max {
            if self.channels[ci].outbox.is_empty() {
                break;
            }
            if !self.transport.try_reserve(chan_num) {
                // Throttled: leave the rest staged, other work continues.
                break;
            }
            // Unwrap is fine, emptiness was checked above.
            let frame = self.channels[ci].outbox.pop_front().unwrap();
            match self.transport.send(chan_num, &frame) {
                Ok(()) => self.channels[ci].stats.pdus_sent += 1,
                Err(_) => {
                    self.reporter
                        .event(EngineEvent::TransportSendFailed { chan: chan_num });
                }
            }
            sent += 1;
        }
    }

    /// Move terminal transactions into the history ring and return their
    /// pool slots to the freelist.
    fn reap_phase(&mut self, chan_num: u8) {
        let ci = chan_num as usize;
        let terminal: Vec<SlotId> = self.channels[ci]
            .rx_active()
            .iter()
            .copied()
            .filter(|slot| self.pool.get(*slot).is_terminal())
            .collect();
        for slot in terminal {
            self.channels[ci].remove_rx_active(slot);
            let txn = self.pool.free(slot);
            tracing::debug!(chan = chan_num, key = %txn.key, status = ?txn.status, "transaction reaped");
            if txn.status_or_no_error().is_fault() {
                self.channels[ci].stats.files_failed += 1;
            } else {
                self.channels[ci].stats.files_completed += 1;
            }
            self.channels[ci].push_history(txn.history_entry());
        }
    }

    /// Apply a decoded ground command.
    pub fn handle_command(&mut self, command: Command) -> Result<CommandAck, CommandError> {
        match command {
            Command::Noop => Ok(CommandAck::Ok),
            Command::Reset(scope) => {
                for chan in &mut self.channels {
                    if scope != ResetScope::History {
                        chan.stats = Default::default();
                    }
                    if scope != ResetScope::Stats {
                        chan.clear_history();
                    }
                }
                Ok(CommandAck::Ok)
            }
            Command::SetParam { chan, id, value } => {
                self.set_param(chan, id, value)?;
                Ok(CommandAck::Ok)
            }
            Command::GetParam { chan, id } => Ok(CommandAck::Param(self.get_param(chan, id)?)),
            Command::EnableChannel(chan) => {
                self.channel_mut(chan)?.enabled = true;
                Ok(CommandAck::Ok)
            }
            Command::DisableChannel(chan) => {
                self.channel_mut(chan)?.enabled = false;
                Ok(CommandAck::Ok)
            }
            Command::CancelTxn(key) => {
                let (_, slot) = self.find_txn(key)?;
                recv::cancel(self.pool.get_mut(slot));
                Ok(CommandAck::Ok)
            }
            Command::SuspendTxn(key) => {
                let (_, slot) = self.find_txn(key)?;
                let txn = self.pool.get_mut(slot);
                txn.flags.suspended = true;
                Ok(CommandAck::Ok)
            }
            Command::ResumeTxn(key) => {
                let (_, slot) = self.find_txn(key)?;
                let txn = self.pool.get_mut(slot);
                if !txn.flags.suspended {
                    return Err(CommandError::NotSuspended(key));
                }
                txn.flags.suspended = false;
                Ok(CommandAck::Ok)
            }
            Command::AbandonTxn(key) => {
                let (chan_num, slot) = self.find_txn(key)?;
                let ci = chan_num as usize;
                let config = &self.config;
                let chan = &mut self.channels[ci];
                let (outbox, tx_allowance) = chan.tx_parts();
                let mut ctx = RxContext {
                    config,
                    chan_config: &config.channels[ci],
                    chan_num,
                    filestore: &mut self.filestore,
                    reporter: &mut self.reporter,
                    outbox,
                    tx_allowance,
                };
                recv::abandon(self.pool.get_mut(slot), &mut ctx);
                Ok(CommandAck::Ok)
            }
            Command::PlaybackDir(request) => {
                if request.chan as usize >= self.channels.len() {
                    return Err(CommandError::UnknownChannel(request.chan));
                }
                let source = self
                    .source
                    .as_mut()
                    .ok_or(CommandError::NoTransactionSource)?;
                if !source.playback_dir(&request) {
                    return Err(CommandError::PlaybackRejected);
                }
                Ok(CommandAck::Ok)
            }
            Command::PollDirControl { chan, index, enable } => {
                let channel = self.channel_mut(chan)?;
                let flag = channel
                    .polldir_enabled
                    .get_mut(index as usize)
                    .ok_or(CommandError::UnknownPollDir { chan, index })?;
                *flag = enable;
                Ok(CommandAck::Ok)
            }
        }
    }

    fn channel_mut(&mut self, chan: u8) -> Result<&mut Channel, CommandError> {
        self.channels
            .get_mut(chan as usize)
            .ok_or(CommandError::UnknownChannel(chan))
    }

    fn find_txn(&self, key: TransactionKey) -> Result<(u8, SlotId), CommandError> {
        for chan_num in 0..self.channels.len() as u8 {
            if let Some(slot) = self.pool.find_by_key(chan_num, key) {
                return Ok((chan_num, slot));
            }
        }
        Err(CommandError::UnknownTransaction(key))
    }

    fn set_param(&mut self, chan: u8, id: ParamId, value: u32) -> Result<(), CommandError> {
        let invalid = |id, value| CommandError::InvalidParamValue { id, value };
        match id {
            ParamId::RxCrcBytesPerWakeup => {
                if value == 0 || value % 1024 != 0 {
                    return Err(invalid(id, value));
                }
                self.config.rx_crc_calc_bytes_per_wakeup = value;
                return Ok(());
            }
            ParamId::OutgoingFileChunkSize => {
                if value == 0 || value as usize > PDU_DATA_BUF_SIZE {
                    return Err(invalid(id, value));
                }
                self.config.outgoing_file_chunk_size = value as u16;
                return Ok(());
            }
            _ => {}
        }
        if chan as usize >= self.channels.len() {
            return Err(CommandError::UnknownChannel(chan));
        }
        let chan_config = &mut self.config.channels[chan as usize];
        match id {
            ParamId::AckTimerS => chan_config.ack_timer_s = value,
            ParamId::NakTimerS => chan_config.nak_timer_s = value,
            ParamId::InactivityTimerS => chan_config.inactivity_timer_s = value,
            ParamId::AckLimit => {
                chan_config.ack_limit =
                    u8::try_from(value).map_err(|_| invalid(id, value))?;
            }
            ParamId::NakLimit => {
                chan_config.nak_limit =
                    u8::try_from(value).map_err(|_| invalid(id, value))?;
            }
            ParamId::RxCrcBytesPerWakeup | ParamId::OutgoingFileChunkSize => unreachable!(),
        }
        Ok(())
    }

    fn get_param(&self, chan: u8, id: ParamId) -> Result<u32, CommandError> {
        match id {
            ParamId::RxCrcBytesPerWakeup => return Ok(self.config.rx_crc_calc_bytes_per_wakeup),
            ParamId::OutgoingFileChunkSize => {
                return Ok(self.config.outgoing_file_chunk_size.into())
            }
            _ => {}
        }
        let chan_config = self
            .config
            .channels
            .get(chan as usize)
            .ok_or(CommandError::UnknownChannel(chan))?;
        Ok(match id {
            ParamId::AckTimerS => chan_config.ack_timer_s,
            ParamId::NakTimerS => chan_config.nak_timer_s,
            ParamId::InactivityTimerS => chan_config.inactivity_timer_s,
            ParamId::AckLimit => chan_config.ack_limit.into(),
            ParamId::NakLimit => chan_config.nak_limit.into(),
            ParamId::RxCrcBytesPerWakeup | ParamId::OutgoingFileChunkSize => unreachable!(),
        })
    }
}
