//! Per-channel queue set, history ring and outbound staging.
use crate::config::ChannelConfig;
use crate::pool::{Pool, SlotId};
use crate::transaction::HistoryEntry;
use std::collections::VecDeque;

/// Per-channel message counters. Summary data only; packing these into
/// telemetry is the housekeeping collaborator's job.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub pdus_received: u32,
    pub pdus_sent: u32,
    pub pdus_dropped: u32,
    pub decode_errors: u32,
    pub files_completed: u32,
    pub files_failed: u32,
}

/// Runtime state of one CFDP channel.
///
/// The queue set partitions the channel's share of the pool: a transaction
/// is referenced by exactly one of the pending, active-send, active-receive
/// queues, or by no queue while it sits on the pool freelist.
#[derive(Debug)]
pub struct Channel {
    /// Pending send transactions, priority-ordered (lowest value first).
    /// Entries carry the priority so ordering needs no pool access.
    pend: VecDeque<(SlotId, u8)>,
    /// Active send transactions, driven by the external send collaborator.
    txa: VecDeque<SlotId>,
    /// Active receive transactions.
    rxa: VecDeque<SlotId>,
    history: VecDeque<HistoryEntry>,
    history_depth: usize,
    /// Encoded PDUs staged for transmission, in emission order.
    pub(crate) outbox: VecDeque<Vec<u8>>,
    /// Remaining PDU generation allowance for the current wakeup.
    pub(crate) tx_allowance: u32,
    /// Rotating start index for tick processing, so no transaction starves.
    pub(crate) tick_cursor: usize,
    pub(crate) enabled: bool,
    pub(crate) dequeue_enabled: bool,
    /// Runtime enable toggles mirroring the polldir config entries.
    pub(crate) polldir_enabled: Vec<bool>,
    pub stats: ChannelStats,
}

impl Channel {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            pend: VecDeque::new(),
            txa: VecDeque::new(),
            rxa: VecDeque::new(),
            history: VecDeque::with_capacity(config.history_depth as usize),
            history_depth: config.history_depth.max(1) as usize,
            outbox: VecDeque::new(),
            tx_allowance: 0,
            tick_cursor: 0,
            enabled: true,
            dequeue_enabled: config.dequeue_enabled,
            polldir_enabled: config.polldirs.iter().map(|p| p.enabled).collect(),
            stats: ChannelStats::default(),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn rx_active(&self) -> &VecDeque<SlotId> {
        &self.rxa
    }

    pub fn tx_active(&self) -> &VecDeque<SlotId> {
        &self.txa
    }

    pub fn pending(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.pend.iter().map(|(slot, _)| *slot)
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    /// Total number of pool slots referenced by this channel's queues.
    pub fn queued_count(&self) -> usize {
        self.pend.len() + self.txa.len() + self.rxa.len()
    }

    pub fn push_rx_active(&mut self, slot: SlotId) {
        self.rxa.push_back(slot);
    }

    pub fn remove_rx_active(&mut self, slot: SlotId) {
        self.rxa.retain(|s| *s != slot);
    }

    /// Priority insert behind all entries of the same or a more urgent
    /// priority, which keeps arrival order stable within one priority.
    pub fn push_pending(&mut self, slot: SlotId, priority: u8) {
        let position = self
            .pend
            .iter()
            .position(|(_, p)| *p > priority)
            .unwrap_or(self.pend.len());
        self.pend.insert(position, (slot, priority));
    }

    /// Move the most urgent pending transaction to the active send queue.
    pub fn dequeue_pending(&mut self) -> Option<SlotId> {
        let (slot, _) = self.pend.pop_front()?;
        self.txa.push_back(slot);
        Some(slot)
    }

    /// Find a slot in any queue of this channel, receive queue first since
    /// most traffic is inbound file data.
    pub fn find_queued(&self, pool: &Pool, chan_num: u8, key: crate::transaction::TransactionKey) -> Option<SlotId> {
        self.rxa
            .iter()
            .chain(self.txa.iter())
            .chain(self.pend.iter().map(|(slot, _)| slot))
            .copied()
            .find(|slot| {
                let txn = pool.get(*slot);
                txn.chan_num == chan_num && txn.key == key
            })
    }

    /// Append to the bounded history ring, evicting the oldest entry.
    pub fn push_history(&mut self, entry: HistoryEntry) {
        if self.history.len() == self.history_depth {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Outbox and generation allowance, borrowed together for the receive
    /// and tick contexts.
    pub(crate) fn tx_parts(&mut self) -> (&mut VecDeque<Vec<u8>>, &mut u32) {
        (&mut self.outbox, &mut self.tx_allowance)
    }
}
