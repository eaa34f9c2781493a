use super::*;
use crate::error::ProgressError;
use crate::record::TimestampedLine;
use crate::ring_buffer::RingBuffer;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

const CYCLE: &str = "frame=100\nfps=25.00\nstream_0_0_q=28.0\nbitrate=1200.1kbits/s\ntotal_size=262192\nout_time_us=4000000\nout_time=00:00:04.000000\ndup_frames=0\ndrop_frames=0\nspeed=1.01x\nprogress=continue\n";

fn create_test_reassembler() -> (
    ProgressReassembler,
    Arc<RingBuffer<TimestampedLine>>,
    Arc<SnapshotSlot>,
    CancellationToken,
) {
    let buffer = Arc::new(RingBuffer::new(16));
    let slot = Arc::new(SnapshotSlot::new());
    let token = CancellationToken::new();
    let reassembler = ProgressReassembler::new(Arc::clone(&buffer), Arc::clone(&slot), token.clone());
    (reassembler, buffer, slot, token)
}

#[test]
fn test_cycle_joins_fields_into_one_record() {
    let mut cycle = CycleAssembler::new();

    let mut result = None;
    for line in CYCLE.lines() {
        result = cycle.push_line(line);
    }

    let snapshot = result.expect("sentinel closes the cycle").unwrap();
    assert!(snapshot.raw().starts_with("frame=100 fps=25.00 "));
    assert!(snapshot.raw().ends_with(" speed=1.01x progress=continue"));
    assert_eq!(snapshot.fps(), Some(25.0));
    assert_eq!(snapshot.speed(), Some(1.01));
}

#[test]
fn test_non_sentinel_lines_produce_nothing() {
    let mut cycle = CycleAssembler::new();
    assert!(cycle.push_line("frame=1").is_none());
    assert!(cycle.push_line("fps=30.0").is_none());
}

#[test]
fn test_internal_spaces_and_newlines_are_stripped() {
    let mut cycle = CycleAssembler::new();
    cycle.push_line("bitrate=  512.0kbits/s\r\n");
    cycle.push_line("speed= 2.5x");
    let snapshot = cycle.push_line("progress=end\n").unwrap().unwrap();

    assert_eq!(snapshot.raw(), "bitrate=512.0kbits/s speed=2.5x progress=end");
    assert!(snapshot.is_final());
}

#[test]
fn test_blank_lines_are_skipped_in_composite() {
    let mut cycle = CycleAssembler::new();
    cycle.push_line("frame=5");
    cycle.push_line("");
    let snapshot = cycle.push_line("progress=continue").unwrap().unwrap();
    assert_eq!(snapshot.raw(), "frame=5 progress=continue");
}

#[test]
fn test_sentinel_is_matched_on_key_only() {
    let mut cycle = CycleAssembler::new();
    // A value mentioning the word is an ordinary field
    assert!(cycle.push_line("note=progress").is_none());
    let snapshot = cycle.push_line("progress=continue").unwrap().unwrap();
    assert_eq!(snapshot.get("note"), Some("progress"));
}

#[test]
fn test_malformed_cycle_is_reported_and_next_cycle_recovers() {
    let mut cycle = CycleAssembler::new();
    cycle.push_line("frame=1");
    cycle.push_line("garbage");
    let err = cycle.push_line("progress=continue").unwrap().unwrap_err();
    assert_eq!(
        err,
        ProgressError::MalformedField {
            field: "garbage".to_string()
        }
    );

    cycle.push_line("frame=2");
    let snapshot = cycle.push_line("progress=continue").unwrap().unwrap();
    assert_eq!(snapshot.raw(), "frame=2 progress=continue");
}

#[test]
fn test_scratch_overflow_drops_the_cycle() {
    let mut cycle = CycleAssembler::new();
    for i in 0..SCRATCH_SLOTS {
        assert!(cycle.push_line(&format!("field{i}=1")).is_none());
    }

    let err = cycle.push_line("extra=1").unwrap().unwrap_err();
    assert_eq!(
        err,
        ProgressError::CycleOverflow {
            capacity: SCRATCH_SLOTS
        }
    );

    // Remainder of the oversized cycle is discarded silently
    assert!(cycle.push_line("more=1").is_none());
    assert!(cycle.push_line("progress=continue").is_none());

    cycle.push_line("frame=3");
    let snapshot = cycle.push_line("progress=continue").unwrap().unwrap();
    assert_eq!(snapshot.frame(), Some(3));
}

#[test]
fn test_cycle_filling_scratch_exactly_is_accepted() {
    let mut cycle = CycleAssembler::new();
    for i in 0..SCRATCH_SLOTS - 1 {
        cycle.push_line(&format!("field{i}={i}"));
    }
    let snapshot = cycle.push_line("progress=continue").unwrap().unwrap();
    assert_eq!(snapshot.fields().len(), SCRATCH_SLOTS);
}

#[tokio::test]
async fn test_reassembler_appends_and_publishes() {
    let (reassembler, buffer, slot, _token) = create_test_reassembler();
    let stats = reassembler.stats();

    let input = format!("{CYCLE}{}", CYCLE.replace("frame=100", "frame=101"));
    reassembler.run(BufReader::new(input.as_bytes())).await;

    let (records, position) = buffer.get_all();
    assert_eq!(position, 2);
    assert!(records[0].line.starts_with("frame=100 "));
    assert!(records[1].line.starts_with("frame=101 "));
    assert_eq!(slot.latest().unwrap().frame(), Some(101));
    assert_eq!(stats.completed(), 2);
    assert_eq!(stats.dropped(), 0);
}

#[tokio::test]
async fn test_reassembler_keeps_reading_after_malformed_cycle() {
    let (reassembler, buffer, slot, _token) = create_test_reassembler();
    let stats = reassembler.stats();

    let input = format!("frame=1\nbroken\nprogress=continue\n{CYCLE}");
    reassembler.run(BufReader::new(input.as_bytes())).await;

    assert_eq!(buffer.get_current_position(), 1);
    assert_eq!(slot.latest().unwrap().frame(), Some(100));
    assert_eq!(stats.dropped(), 1);
    assert_eq!(stats.completed(), 1);
}

#[tokio::test]
async fn test_incomplete_cycle_at_eof_is_not_published() {
    let (reassembler, buffer, slot, _token) = create_test_reassembler();

    reassembler
        .run(BufReader::new(&b"frame=1\nfps=30.0\n"[..]))
        .await;

    assert!(buffer.is_empty());
    assert!(slot.latest().is_none());
}

#[tokio::test]
async fn test_reassembler_stops_on_cancellation() {
    let (reassembler, buffer, _slot, token) = create_test_reassembler();

    // The writer half stays open so the reader would otherwise wait forever
    let (reader, _writer) = tokio::io::duplex(64);
    let task = tokio::spawn(reassembler.run(BufReader::new(reader)));

    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("reader should observe cancellation")
        .unwrap();

    assert!(buffer.is_empty());
}
