//! Message bus and transaction producer ports.
//!
//! The engine neither frames nor addresses messages: each inbound message is
//! exactly one PDU, each outbound PDU becomes exactly one message. Outbound
//! rate is limited by a counting semaphore owned by the downlink side;
//! [PduTransport::try_reserve] consumes one unit per transmission and the
//! engine simply stops transmitting when no units are available.
use crate::config::CfdpClass;
use std::collections::VecDeque;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no message buffer available")]
    NoBufferAvailable,
    #[error("send failed: {0}")]
    SendFailed(&'static str),
}

/// Bus port: one inbound and one outbound message stream per channel.
pub trait PduTransport {
    /// Pull the next inbound message of a channel, if any.
    fn recv(&mut self, chan: u8) -> Option<Vec<u8>>;
    /// Transmit one PDU on a channel.
    fn send(&mut self, chan: u8, pdu: &[u8]) -> Result<(), TransportError>;
    /// Take one unit of the channel's throttle semaphore. Transmission
    /// halts while this returns false; other engine work continues.
    fn try_reserve(&mut self, chan: u8) -> bool;
}

/// Request for a new outbound file transfer, produced by the
/// [TransactionSource] collaborator (directory polling, ground commands).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub class: CfdpClass,
    pub dest_eid: u64,
    pub priority: u8,
    /// Keep the local file after completion instead of deleting it.
    pub keep: bool,
}

/// Request to play back a whole directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    pub chan: u8,
    pub src_dir: PathBuf,
    pub dst_dir: PathBuf,
    pub class: CfdpClass,
    pub dest_eid: u64,
    pub priority: u8,
}

/// Producer port for the send side.
///
/// The engine pulls pending requests once per wakeup and queues them onto
/// the priority-ordered pending queue, where an external send driver picks
/// them up. Directory scanning and playback sequencing happen behind this
/// port, not in the engine.
pub trait TransactionSource {
    fn next_pending(&mut self, chan: u8) -> Option<SendRequest>;
    /// Returns false if the playback request can not be accepted.
    fn playback_dir(&mut self, request: &PlaybackRequest) -> bool;
}

/// Queue-backed transport for host-side testing and loopback setups.
///
/// Inbound frames are pushed with [QueueTransport::push_inbound]; sent
/// frames accumulate per channel and can be drained by the peer or by test
/// assertions. The throttle semaphore is modelled as a simple credit count,
/// `u32::MAX` meaning unlimited.
#[derive(Debug)]
pub struct QueueTransport {
    inbound: Vec<VecDeque<Vec<u8>>>,
    outbound: Vec<VecDeque<Vec<u8>>>,
    credits: Vec<u32>,
}

impl QueueTransport {
    pub fn new(channels: usize) -> Self {
        Self {
            inbound: (0..channels).map(|_| VecDeque::new()).collect(),
            outbound: (0..channels).map(|_| VecDeque::new()).collect(),
            credits: vec![u32::MAX; channels],
        }
    }

    pub fn push_inbound(&mut self, chan: u8, frame: Vec<u8>) {
        self.inbound[chan as usize].push_back(frame);
    }

    pub fn pop_outbound(&mut self, chan: u8) -> Option<Vec<u8>> {
        self.outbound[chan as usize].pop_front()
    }

    pub fn outbound_count(&self, chan: u8) -> usize {
        self.outbound[chan as usize].len()
    }

    pub fn set_credits(&mut self, chan: u8, credits: u32) {
        self.credits[chan as usize] = credits;
    }
}

impl PduTransport for QueueTransport {
    fn recv(&mut self, chan: u8) -> Option<Vec<u8>> {
        self.inbound[chan as usize].pop_front()
    }

    fn send(&mut self, chan: u8, pdu: &[u8]) -> Result<(), TransportError> {
        self.outbound[chan as usize].push_back(pdu.to_vec());
        Ok(())
    }

    fn try_reserve(&mut self, chan: u8) -> bool {
        let credits = &mut self.credits[chan as usize];
        if *credits == 0 {
            return false;
        }
        if *credits != u32::MAX {
            *credits -= 1;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_transport_roundtrip() {
        let mut transport = QueueTransport::new(2);
        transport.push_inbound(1, vec![1, 2, 3]);
        assert_eq!(transport.recv(0), None);
        assert_eq!(transport.recv(1), Some(vec![1, 2, 3]));
        assert_eq!(transport.recv(1), None);
        transport.send(0, &[4, 5]).unwrap();
        assert_eq!(transport.outbound_count(0), 1);
        assert_eq!(transport.pop_outbound(0), Some(vec![4, 5]));
    }

    #[test]
    fn test_throttle_credits() {
        let mut transport = QueueTransport::new(1);
        transport.set_credits(0, 2);
        assert!(transport.try_reserve(0));
        assert!(transport.try_reserve(0));
        assert!(!transport.try_reserve(0));
        transport.set_credits(0, u32::MAX);
        assert!(transport.try_reserve(0));
        assert!(transport.try_reserve(0));
    }
}
