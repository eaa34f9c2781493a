use crate::{
    error::ProgressError,
    record::TimestampedLine,
    ring_buffer::RingBuffer,
};
use chrono::Local;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::snapshot::{ProgressSnapshot, SnapshotSlot};

/// Scratch lines per cycle; ffmpeg emits about a dozen fields per report
pub const SCRATCH_SLOTS: usize = 30;

/// Key of the line that terminates every progress cycle
const SENTINEL_KEY: &str = "progress";

/// Rebuilds one composite record per progress cycle
pub struct ProgressReassembler {
    buffer: Arc<RingBuffer<TimestampedLine>>,
    snapshot: Arc<SnapshotSlot>,
    cancellation_token: CancellationToken,
    stats: Arc<ReassemblerStats>,
}

/// Counters shared with whoever spawned the reader
#[derive(Debug, Default)]
pub struct ReassemblerStats {
    pub cycles_completed: AtomicU64,
    pub cycles_dropped: AtomicU64,
}

impl ReassemblerStats {
    pub fn completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.cycles_dropped.load(Ordering::Relaxed)
    }
}

impl ProgressReassembler {
    pub fn new(
        buffer: Arc<RingBuffer<TimestampedLine>>,
        snapshot: Arc<SnapshotSlot>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            buffer,
            snapshot,
            cancellation_token,
            stats: Arc::new(ReassemblerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ReassemblerStats> {
        Arc::clone(&self.stats)
    }

    /// Read the progress channel until cancellation or end of input
    pub async fn run<R>(self, reader: R)
    where
        R: AsyncBufRead + Unpin,
    {
        info!("Progress reader started");

        let mut lines = reader.lines();
        let mut cycle = CycleAssembler::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    info!("Progress reader stopped");
                    break;
                }
                next = lines.next_line() => next,
            };

            match next {
                Ok(Some(line)) => self.handle_line(&mut cycle, &line),
                Ok(None) => {
                    info!("Progress channel closed");
                    break;
                }
                Err(e) => {
                    warn!("Progress channel read failed: {}", e);
                    break;
                }
            }
        }

        debug!(
            "Progress reader exiting ({} cycles, {} dropped)",
            self.stats.completed(),
            self.stats.dropped()
        );
    }

    fn handle_line(&self, cycle: &mut CycleAssembler, line: &str) {
        match cycle.push_line(line) {
            None => {}
            Some(Ok(snapshot)) => {
                trace!("Progress record: {}", snapshot.raw());
                if snapshot.is_final() {
                    debug!("Encoder reported final progress record");
                }
                self.buffer.append(TimestampedLine::at(
                    snapshot.captured_at(),
                    snapshot.raw().to_string(),
                ));
                self.snapshot.publish(snapshot);
                self.stats.cycles_completed.fetch_add(1, Ordering::Relaxed);
            }
            Some(Err(e)) => {
                warn!("Dropping progress cycle: {}", e);
                self.stats.cycles_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Per-cycle scratch state, owned by the read loop
pub struct CycleAssembler {
    scratch: Vec<String>,
    filled: usize,
    discarding: bool,
}

impl CycleAssembler {
    pub fn new() -> Self {
        Self {
            scratch: vec![String::new(); SCRATCH_SLOTS],
            filled: 0,
            discarding: false,
        }
    }

    /// Feed one raw line; returns a result when the line closed a cycle
    ///
    /// An overflowing cycle is reported once and the rest of it is skipped up
    /// to the next terminator.
    pub fn push_line(&mut self, raw: &str) -> Option<Result<ProgressSnapshot, ProgressError>> {
        let cleaned: String = raw
            .trim_end_matches(['\n', '\r'])
            .chars()
            .filter(|c| *c != ' ')
            .collect();
        let is_sentinel = cleaned.split('=').next() == Some(SENTINEL_KEY);

        if self.discarding {
            if is_sentinel {
                self.reset();
            }
            return None;
        }

        if self.filled >= SCRATCH_SLOTS {
            self.reset();
            self.discarding = !is_sentinel;
            return Some(Err(ProgressError::CycleOverflow {
                capacity: SCRATCH_SLOTS,
            }));
        }

        self.scratch[self.filled] = cleaned;
        self.filled += 1;

        if !is_sentinel {
            return None;
        }

        let composite = self.scratch[..self.filled]
            .iter()
            .filter(|line| !line.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        self.reset();

        Some(ProgressSnapshot::parse(&composite, Local::now()))
    }

    fn reset(&mut self) {
        for slot in &mut self.scratch[..self.filled] {
            slot.clear();
        }
        self.filled = 0;
        self.discarding = false;
    }
}

impl Default for CycleAssembler {
    fn default() -> Self {
        Self::new()
    }
}
