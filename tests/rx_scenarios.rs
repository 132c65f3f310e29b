//! End-to-end receive scenarios, driven through the public engine API with
//! an in-memory filestore and a queue-backed transport.
use cfdp_engine::cmd::Command;
use cfdp_engine::config::EngineConfig;
use cfdp_engine::crc::CRC_32_CFDP;
use cfdp_engine::engine::Engine;
use cfdp_engine::filestore::InMemoryFilestore;
use cfdp_engine::pdu::lv::Lv;
use cfdp_engine::pdu::{
    decode_pdu, ChecksumType, CommonPduConfig, ConditionCode, CrcFlag, EofPdu, FileDataPdu,
    LargeFileFlag, MetadataPdu, PduHeader, PduPayload, TransmissionMode, WritablePdu,
};
use cfdp_engine::report::{EngineEvent, RecordingReporter};
use cfdp_engine::transaction::TransactionKey;
use cfdp_engine::transport::QueueTransport;
use cfdp_engine::util::{UnsignedByteField, UnsignedEnum};
use std::path::Path;

type TestEngine = Engine<InMemoryFilestore, QueueTransport, RecordingReporter>;

const LOCAL_EID: u64 = 10;
const PEER_EID: u64 = 1;

struct Peer {
    conf: CommonPduConfig,
}

impl Peer {
    fn new(seq: u64, mode: TransmissionMode) -> Self {
        Self::with_widths(seq, mode, 1)
    }

    fn with_widths(seq: u64, mode: TransmissionMode, width: usize) -> Self {
        let mut conf = CommonPduConfig::new_with_byte_fields(
            UnsignedByteField::new(width, PEER_EID),
            UnsignedByteField::new(width, LOCAL_EID),
            UnsignedByteField::new(width, seq),
        )
        .unwrap();
        conf.trans_mode = mode;
        Self { conf }
    }

    fn md(&self, file_size: u64, dst: &str) -> Vec<u8> {
        let header = PduHeader::new_for_file_directive(self.conf, 0);
        MetadataPdu::new(
            header,
            ChecksumType::Crc32,
            file_size,
            Lv::new_from_str("source.bin").unwrap(),
            Lv::new_from_str(dst).unwrap(),
        )
        .to_vec()
        .unwrap()
    }

    fn fd(&self, offset: u64, data: &[u8]) -> Vec<u8> {
        let header = PduHeader::new_for_file_data_default(self.conf, 0);
        FileDataPdu::new(header, offset, data).to_vec().unwrap()
    }

    fn eof(&self, file_size: u64, checksum: u32) -> Vec<u8> {
        let header = PduHeader::new_for_file_directive(self.conf, 0);
        EofPdu::new_no_error(header, checksum, file_size)
            .to_vec()
            .unwrap()
    }

    fn fin_ack(&self) -> Vec<u8> {
        use cfdp_engine::pdu::{AckPdu, TransactionStatus};
        let header = PduHeader::new_for_file_directive(self.conf, 0);
        AckPdu::new_for_finished_pdu(header, ConditionCode::NoError, TransactionStatus::Active)
            .to_vec()
            .unwrap()
    }
}

fn test_engine() -> TestEngine {
    Engine::new(
        EngineConfig::single_channel_for_test(),
        InMemoryFilestore::new(),
        QueueTransport::new(1),
        RecordingReporter::new(),
    )
    .unwrap()
}

fn drain_outbound(engine: &mut TestEngine) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    while let Some(frame) = engine.transport_mut().pop_outbound(0) {
        frames.push(frame);
    }
    frames
}

fn wakeups(engine: &mut TestEngine, count: u32) {
    for _ in 0..count {
        engine.wakeup();
        assert_invariants(engine);
    }
}

/// Structural invariants which must hold after every wakeup: the pool
/// partition, the chunk list ordering, the received-byte accounting and the
/// send-flag exclusivity.
fn assert_invariants(engine: &TestEngine) {
    assert_eq!(
        engine.pool().free_count() + engine.channel(0).queued_count(),
        engine.pool().capacity(),
        "pool partition invariant violated"
    );
    for slot in engine.channel(0).rx_active().iter() {
        let txn = engine.pool().get(*slot);
        assert!(
            !(txn.flags.send_fin && txn.flags.send_nak),
            "send_fin and send_nak raised together"
        );
        assert_eq!(txn.bytes_received, txn.chunks.total_bytes());
        let chunks = txn.chunks.chunks();
        for chunk in chunks {
            assert!(chunk.size > 0, "zero-size chunk tracked");
        }
        for pair in chunks.windows(2) {
            assert!(
                pair[0].offset + pair[0].size < pair[1].offset,
                "chunk list not sorted and disjoint"
            );
        }
    }
}

/// Run until the transaction shows up in history, with a generous bound.
fn run_to_history(engine: &mut TestEngine, key: TransactionKey, max_wakeups: u32) {
    for _ in 0..max_wakeups {
        engine.wakeup();
        assert_invariants(engine);
        if engine.channel(0).history().any(|h| h.key == key) {
            return;
        }
    }
    panic!("transaction {key} never reached history");
}

fn history_status(engine: &TestEngine, key: TransactionKey) -> Option<ConditionCode> {
    engine
        .channel(0)
        .history()
        .find(|h| h.key == key)
        .map(|h| h.status)
}

#[test]
fn s1_clean_class1_transfer() {
    let mut engine = test_engine();
    let peer = Peer::new(1, TransmissionMode::Unacknowledged);
    engine.transport_mut().push_inbound(0, peer.md(3, "/dst/a"));
    engine.transport_mut().push_inbound(0, peer.fd(0, b"xyz"));
    engine
        .transport_mut()
        .push_inbound(0, peer.eof(3, CRC_32_CFDP.checksum(b"xyz")));
    run_to_history(&mut engine, TransactionKey::new(PEER_EID, 1), 4);
    assert_eq!(
        engine.filestore().contents(Path::new("/dst/a")).unwrap(),
        b"xyz"
    );
    assert_eq!(
        history_status(&engine, TransactionKey::new(PEER_EID, 1)),
        Some(ConditionCode::NoError)
    );
    // Class 1 receives silently: no NAK, no ACK, no FIN.
    assert!(drain_outbound(&mut engine).is_empty());
}

#[test]
fn s2_class2_with_one_gap() {
    let mut engine = test_engine();
    let peer = Peer::new(2, TransmissionMode::Acknowledged);
    let full = b"0123456789";
    engine.transport_mut().push_inbound(0, peer.md(10, "/dst/b"));
    engine.transport_mut().push_inbound(0, peer.fd(0, b"01234"));
    engine
        .transport_mut()
        .push_inbound(0, peer.eof(10, CRC_32_CFDP.checksum(full)));
    wakeups(&mut engine, 1);
    let frames = drain_outbound(&mut engine);
    // EOF-ACK followed by the NAK for the missing tail.
    assert_eq!(frames.len(), 2);
    assert!(matches!(
        decode_pdu(&frames[0]).unwrap().payload,
        PduPayload::Ack(_)
    ));
    match decode_pdu(&frames[1]).unwrap().payload {
        PduPayload::Nak(nak) => {
            assert_eq!(nak.segment_requests(), &[(5, 10)]);
            assert_eq!(nak.start_of_scope(), 0);
            assert_eq!(nak.end_of_scope(), 10);
        }
        other => panic!("expected NAK, got {other:?}"),
    }
    // Retransmission closes the gap; the engine digests and finishes.
    engine.transport_mut().push_inbound(0, peer.fd(5, b"56789"));
    wakeups(&mut engine, 2);
    let frames = drain_outbound(&mut engine);
    let fin = frames
        .iter()
        .find_map(|f| match decode_pdu(f).unwrap().payload {
            PduPayload::Finished(fin) => Some(fin),
            _ => None,
        })
        .expect("no FIN emitted");
    assert_eq!(fin.condition_code(), ConditionCode::NoError);
    assert_eq!(
        engine.filestore().contents(Path::new("/dst/b")).unwrap(),
        full
    );
    // The closing FIN-ACK retires the transaction.
    engine.transport_mut().push_inbound(0, peer.fin_ack());
    run_to_history(&mut engine, TransactionKey::new(PEER_EID, 2), 4);
    assert_eq!(
        history_status(&engine, TransactionKey::new(PEER_EID, 2)),
        Some(ConditionCode::NoError)
    );
}

#[test]
fn s2a_missing_metadata_requested_by_degenerate_nak() {
    let mut engine = test_engine();
    let peer = Peer::new(3, TransmissionMode::Acknowledged);
    engine.transport_mut().push_inbound(0, peer.fd(0, b"01234"));
    wakeups(&mut engine, 1);
    let frames = drain_outbound(&mut engine);
    assert_eq!(frames.len(), 1);
    match decode_pdu(&frames[0]).unwrap().payload {
        PduPayload::Nak(nak) => {
            assert!(nak.is_metadata_request());
            assert_eq!(nak.start_of_scope(), 0);
            assert_eq!(nak.end_of_scope(), 0);
        }
        other => panic!("expected metadata-request NAK, got {other:?}"),
    }
    assert!(engine
        .reporter()
        .contains(|e| matches!(e, EngineEvent::TempFileOpened { .. })));
    // Late metadata: the temporary file moves to its destination.
    engine
        .transport_mut()
        .push_inbound(0, peer.md(10, "/dst/late"));
    wakeups(&mut engine, 1);
    assert!(engine
        .reporter()
        .contains(|e| matches!(e, EngineEvent::TempFileMoved { .. })));
    engine.transport_mut().push_inbound(0, peer.fd(5, b"56789"));
    wakeups(&mut engine, 1);
    assert_eq!(
        engine.filestore().contents(Path::new("/dst/late")).unwrap(),
        b"0123456789"
    );
}

#[test]
fn s3_checksum_mismatch_latches_failure() {
    let mut engine = test_engine();
    let peer = Peer::new(4, TransmissionMode::Acknowledged);
    engine.transport_mut().push_inbound(0, peer.md(4, "/dst/c"));
    engine.transport_mut().push_inbound(0, peer.fd(0, b"abcd"));
    engine
        .transport_mut()
        .push_inbound(0, peer.eof(4, 0xDEADBEEF));
    wakeups(&mut engine, 2);
    let frames = drain_outbound(&mut engine);
    let fin = frames
        .iter()
        .find_map(|f| match decode_pdu(f).unwrap().payload {
            PduPayload::Finished(fin) => Some(fin),
            _ => None,
        })
        .expect("no FIN emitted");
    assert_eq!(fin.condition_code(), ConditionCode::FileChecksumFailure);
    assert!(engine
        .reporter()
        .contains(|e| matches!(e, EngineEvent::CrcMismatch { .. })));
}

#[test]
fn s4_inactivity_timeout() {
    let mut engine = test_engine();
    let peer = Peer::new(5, TransmissionMode::Acknowledged);
    engine.transport_mut().push_inbound(0, peer.md(100, "/dst/d"));
    let ticks = engine.config().channels[0].inactivity_timer_s
        * engine.config().ticks_per_second;
    run_to_history(&mut engine, TransactionKey::new(PEER_EID, 5), ticks + 2);
    assert_eq!(
        history_status(&engine, TransactionKey::new(PEER_EID, 5)),
        Some(ConditionCode::InactivityDetected)
    );
    assert!(engine
        .reporter()
        .contains(|e| matches!(e, EngineEvent::InactivityTimerExpired { .. })));
}

#[test]
fn s5_nak_retry_exhaustion() {
    let mut engine = test_engine();
    let peer = Peer::new(6, TransmissionMode::Acknowledged);
    engine.transport_mut().push_inbound(0, peer.md(10, "/dst/e"));
    engine.transport_mut().push_inbound(0, peer.fd(0, b"01234"));
    engine
        .transport_mut()
        .push_inbound(0, peer.eof(10, 0x12345678));
    // No retransmissions ever arrive: the NAK cycle runs dry, the verdict
    // FIN goes unanswered, and the ACK limit finally retires the
    // transaction.
    run_to_history(&mut engine, TransactionKey::new(PEER_EID, 6), 2000);
    assert_eq!(
        history_status(&engine, TransactionKey::new(PEER_EID, 6)),
        Some(ConditionCode::NakLimitReached)
    );
    assert!(engine
        .reporter()
        .contains(|e| matches!(e, EngineEvent::NakLimitReached { .. })));
    let naks = drain_outbound(&mut engine)
        .iter()
        .filter(|f| matches!(decode_pdu(f).unwrap().payload, PduPayload::Nak(_)))
        .count();
    assert_eq!(
        naks,
        1 + engine.config().channels[0].nak_limit as usize
    );
}

#[test]
fn s6_ground_cancel() {
    let mut engine = test_engine();
    let peer = Peer::new(7, TransmissionMode::Acknowledged);
    engine.transport_mut().push_inbound(0, peer.md(10, "/dst/f"));
    engine.transport_mut().push_inbound(0, peer.fd(0, b"01234"));
    wakeups(&mut engine, 1);
    engine
        .handle_command(Command::CancelTxn(TransactionKey::new(PEER_EID, 7)))
        .unwrap();
    run_to_history(&mut engine, TransactionKey::new(PEER_EID, 7), 2);
    assert_eq!(
        history_status(&engine, TransactionKey::new(PEER_EID, 7)),
        Some(ConditionCode::CancelRequestReceived)
    );
}

#[test]
fn l2_duplicate_file_data_is_idempotent() {
    let mut engine = test_engine();
    let peer = Peer::new(8, TransmissionMode::Acknowledged);
    let full = b"0123456789";
    engine.transport_mut().push_inbound(0, peer.md(10, "/dst/g"));
    engine.transport_mut().push_inbound(0, peer.fd(0, b"01234"));
    engine.transport_mut().push_inbound(0, peer.fd(0, b"01234"));
    engine.transport_mut().push_inbound(0, peer.fd(5, b"56789"));
    engine.transport_mut().push_inbound(0, peer.fd(5, b"56789"));
    engine
        .transport_mut()
        .push_inbound(0, peer.eof(10, CRC_32_CFDP.checksum(full)));
    wakeups(&mut engine, 3);
    engine.transport_mut().push_inbound(0, peer.fin_ack());
    run_to_history(&mut engine, TransactionKey::new(PEER_EID, 8), 4);
    assert_eq!(
        history_status(&engine, TransactionKey::new(PEER_EID, 8)),
        Some(ConditionCode::NoError)
    );
    assert_eq!(
        engine.filestore().contents(Path::new("/dst/g")).unwrap(),
        full
    );
}

#[test]
fn l3_metadata_order_does_not_change_file_content() {
    let full = b"0123456789";
    let run = |md_first: bool| -> Vec<u8> {
        let mut engine = test_engine();
        let peer = Peer::new(9, TransmissionMode::Acknowledged);
        if md_first {
            engine.transport_mut().push_inbound(0, peer.md(10, "/dst/h"));
            engine.transport_mut().push_inbound(0, peer.fd(0, b"01234"));
        } else {
            engine.transport_mut().push_inbound(0, peer.fd(0, b"01234"));
            engine.transport_mut().push_inbound(0, peer.md(10, "/dst/h"));
        }
        engine.transport_mut().push_inbound(0, peer.fd(5, b"56789"));
        engine
            .transport_mut()
            .push_inbound(0, peer.eof(10, CRC_32_CFDP.checksum(full)));
        wakeups(&mut engine, 3);
        engine
            .filestore()
            .contents(Path::new("/dst/h"))
            .expect("destination file missing")
            .to_vec()
    };
    assert_eq!(run(true), run(false));
}

#[test]
fn responses_preserve_wire_field_widths() {
    for width in [1usize, 2, 4, 8] {
        let mut engine = test_engine();
        let peer = Peer::with_widths(20, TransmissionMode::Acknowledged, width);
        let data = b"abc";
        engine.transport_mut().push_inbound(0, peer.md(3, "/dst/w"));
        engine.transport_mut().push_inbound(0, peer.fd(0, data));
        engine
            .transport_mut()
            .push_inbound(0, peer.eof(3, CRC_32_CFDP.checksum(data)));
        wakeups(&mut engine, 2);
        let frames = drain_outbound(&mut engine);
        assert!(!frames.is_empty());
        for frame in frames {
            let decoded = decode_pdu(&frame).unwrap();
            let conf = decoded.header.common_pdu_conf();
            assert_eq!(conf.source_id().size(), width);
            assert_eq!(conf.dest_id().size(), width);
            assert_eq!(conf.transaction_seq_num.size(), width);
            assert_eq!(conf.source_id().value(), PEER_EID);
        }
    }
}

#[test]
fn codec_roundtrip_matrix() {
    use cfdp_engine::pdu::finished::{DeliveryCode, FileStatus};
    use cfdp_engine::pdu::prompt::PromptResponseRequired;
    use cfdp_engine::pdu::{
        AckPdu, FinishedPdu, KeepAlivePdu, NakPdu, PromptPdu, TransactionStatus,
    };
    for width in [1usize, 2, 4, 8] {
        for file_flag in [LargeFileFlag::Normal, LargeFileFlag::Large] {
            for crc_flag in [CrcFlag::NoCrc, CrcFlag::WithCrc] {
                let mut conf = CommonPduConfig::new_with_byte_fields(
                    UnsignedByteField::new(width, 0xab),
                    UnsignedByteField::new(width, 0xcd),
                    UnsignedByteField::new(width, 0x42),
                )
                .unwrap();
                conf.file_flag = file_flag;
                conf.crc_flag = crc_flag;
                let offset: u64 = if file_flag == LargeFileFlag::Large {
                    u32::MAX as u64 + 7
                } else {
                    700
                };
                let directive = PduHeader::new_for_file_directive(conf, 0);
                let file_data = PduHeader::new_for_file_data_default(conf, 0);
                let frames: Vec<Vec<u8>> = vec![
                    MetadataPdu::new(
                        directive,
                        ChecksumType::Crc32,
                        offset + 10,
                        Lv::new_from_str("in.bin").unwrap(),
                        Lv::new_from_str("out.bin").unwrap(),
                    )
                    .to_vec()
                    .unwrap(),
                    FileDataPdu::new(file_data, offset, b"payload")
                        .to_vec()
                        .unwrap(),
                    EofPdu::new_no_error(directive, 0x1234_5678, offset + 10)
                        .to_vec()
                        .unwrap(),
                    FinishedPdu::new_default(
                        directive,
                        DeliveryCode::Complete,
                        FileStatus::Retained,
                    )
                    .to_vec()
                    .unwrap(),
                    AckPdu::new_for_eof_pdu(
                        directive,
                        ConditionCode::NoError,
                        TransactionStatus::Active,
                    )
                    .to_vec()
                    .unwrap(),
                    NakPdu::new(directive, 0, offset + 10, vec![(0, 64), (128, offset)])
                        .unwrap()
                        .to_vec()
                        .unwrap(),
                    KeepAlivePdu::new(directive, offset).to_vec().unwrap(),
                    PromptPdu::new(directive, PromptResponseRequired::Nak)
                        .to_vec()
                        .unwrap(),
                ];
                for frame in frames {
                    let decoded = decode_pdu(&frame).unwrap();
                    // Re-encode the logical value; the bytes must match.
                    let reencoded = match &decoded.payload {
                        PduPayload::Metadata(p) => p.to_vec().unwrap(),
                        PduPayload::FileData(p) => p.to_vec().unwrap(),
                        PduPayload::Eof(p) => p.to_vec().unwrap(),
                        PduPayload::Finished(p) => p.to_vec().unwrap(),
                        PduPayload::Ack(p) => p.to_vec().unwrap(),
                        PduPayload::Nak(p) => p.to_vec().unwrap(),
                        PduPayload::KeepAlive(p) => p.to_vec().unwrap(),
                        PduPayload::Prompt(p) => p.to_vec().unwrap(),
                    };
                    assert_eq!(frame, reencoded);
                    assert_eq!(
                        decoded.header.common_pdu_conf().source_id().size(),
                        width
                    );
                }
            }
        }
    }
}
