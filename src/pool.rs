//! Fixed-capacity transaction pool, shared by all channels of an engine.
use crate::transaction::{Transaction, TransactionKey};

/// Index of a pool slot. Queues hold these instead of references, which
/// keeps the allocation-free intrusive-list behaviour of the original
/// design without self-referential data structures.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SlotId(u16);

impl SlotId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Global freelist-backed store of transaction records.
///
/// `free_count() + Σ channel queue lengths == capacity()` holds at every
/// wakeup boundary; the pool itself only tracks vacancy.
#[derive(Debug)]
pub struct Pool {
    slots: Vec<Option<Transaction>>,
    free: Vec<u16>,
}

impl Pool {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0 && capacity <= u16::MAX as usize);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            // Popping from the back hands out low indices first.
            free: (0..capacity as u16).rev().collect(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Take a slot for the given transaction. Returns `None` when the pool
    /// is exhausted; the caller drops the inbound PDU and reports the
    /// exhaustion.
    pub fn alloc(&mut self, txn: Transaction) -> Option<SlotId> {
        let index = self.free.pop()?;
        debug_assert!(self.slots[index as usize].is_none());
        self.slots[index as usize] = Some(txn);
        Some(SlotId(index))
    }

    /// Scrub a slot back onto the freelist, returning the record so the
    /// caller can close files and record history before it drops.
    pub fn free(&mut self, slot: SlotId) -> Transaction {
        let txn = self.slots[slot.index()]
            .take()
            .expect("double free of pool slot");
        self.free.push(slot.0);
        txn
    }

    pub fn get(&self, slot: SlotId) -> &Transaction {
        self.slots[slot.index()]
            .as_ref()
            .expect("access to vacant pool slot")
    }

    pub fn get_mut(&mut self, slot: SlotId) -> &mut Transaction {
        self.slots[slot.index()]
            .as_mut()
            .expect("access to vacant pool slot")
    }

    /// Linear key search over the occupied slots of one channel.
    pub fn find_by_key(&self, chan_num: u8, key: TransactionKey) -> Option<SlotId> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            slot.as_ref().and_then(|txn| {
                (txn.chan_num == chan_num && txn.key == key).then_some(SlotId(index as u16))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::CommonPduConfig;
    use crate::transaction::TxnRole;

    fn test_txn(chan: u8, key: TransactionKey) -> Transaction {
        Transaction::new_rx(key, chan, TxnRole::R2, CommonPduConfig::default(), 4)
    }

    #[test]
    fn test_alloc_until_exhaustion() {
        let mut pool = Pool::new(2);
        assert_eq!(pool.free_count(), 2);
        let a = pool.alloc(test_txn(0, TransactionKey::new(1, 1))).unwrap();
        let b = pool.alloc(test_txn(0, TransactionKey::new(1, 2))).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.free_count(), 0);
        assert!(pool
            .alloc(test_txn(0, TransactionKey::new(1, 3)))
            .is_none());
        pool.free(a);
        assert_eq!(pool.free_count(), 1);
        assert!(pool.alloc(test_txn(0, TransactionKey::new(1, 4))).is_some());
    }

    #[test]
    fn test_freed_slot_is_scrubbed() {
        let mut pool = Pool::new(1);
        let slot = pool.alloc(test_txn(0, TransactionKey::new(7, 8))).unwrap();
        let txn = pool.free(slot);
        assert_eq!(txn.key, TransactionKey::new(7, 8));
        // Slot is vacant now, a fresh allocation starts from a clean record.
        let slot = pool.alloc(test_txn(1, TransactionKey::new(9, 9))).unwrap();
        assert_eq!(pool.get(slot).key, TransactionKey::new(9, 9));
        assert_eq!(pool.get(slot).chan_num, 1);
    }

    #[test]
    fn test_find_by_key_scoped_to_channel() {
        let mut pool = Pool::new(4);
        let key = TransactionKey::new(5, 6);
        let slot = pool.alloc(test_txn(1, key)).unwrap();
        assert_eq!(pool.find_by_key(1, key), Some(slot));
        assert_eq!(pool.find_by_key(0, key), None);
        assert_eq!(pool.find_by_key(1, TransactionKey::new(5, 7)), None);
    }

    #[test]
    #[should_panic]
    fn test_double_free_panics() {
        let mut pool = Pool::new(1);
        let slot = pool.alloc(test_txn(0, TransactionKey::new(1, 1))).unwrap();
        pool.free(slot);
        pool.free(slot);
    }
}
