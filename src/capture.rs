use crate::{record::TimestampedLine, ring_buffer::RingBuffer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 4096;

/// Captures the encoder's combined stdout/stderr into the stdout buffer
///
/// Both pipes are multiplexed by one task so the buffer keeps a single
/// writer. Carriage returns end a line too, since encoders redraw their
/// status line with `\r`.
pub struct StreamCapture {
    buffer: Arc<RingBuffer<TimestampedLine>>,
    cancellation_token: CancellationToken,
    lines_captured: Arc<AtomicU64>,
}

impl StreamCapture {
    pub fn new(
        buffer: Arc<RingBuffer<TimestampedLine>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            buffer,
            cancellation_token,
            lines_captured: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of captured lines
    pub fn lines_captured(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.lines_captured)
    }

    /// Read both pipes until cancellation or until both are closed
    pub async fn run<O, E>(self, mut stdout: O, mut stderr: E)
    where
        O: AsyncRead + Unpin,
        E: AsyncRead + Unpin,
    {
        info!("Output capture started");

        let mut out_chunk = [0u8; READ_CHUNK];
        let mut err_chunk = [0u8; READ_CHUNK];
        let mut out_lines = LineSplitter::default();
        let mut err_lines = LineSplitter::default();
        let mut out_open = true;
        let mut err_open = true;

        while out_open || err_open {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    info!("Output capture stopped");
                    break;
                }
                read = stdout.read(&mut out_chunk), if out_open => {
                    out_open = self.consume("stdout", read, &out_chunk, &mut out_lines);
                }
                read = stderr.read(&mut err_chunk), if err_open => {
                    err_open = self.consume("stderr", read, &err_chunk, &mut err_lines);
                }
            }
        }

        debug!(
            "Output capture exiting after {} lines",
            self.lines_captured.load(Ordering::Relaxed)
        );
    }

    /// Returns whether the pipe is still open
    fn consume(
        &self,
        stream: &str,
        read: std::io::Result<usize>,
        chunk: &[u8],
        splitter: &mut LineSplitter,
    ) -> bool {
        match read {
            Ok(0) => {
                if let Some(line) = splitter.finish() {
                    self.record(&line);
                }
                debug!("Encoder {} closed", stream);
                false
            }
            Ok(n) => {
                for line in splitter.feed(&chunk[..n]) {
                    self.record(&line);
                }
                true
            }
            Err(e) => {
                warn!("Failed to read encoder {}: {}", stream, e);
                false
            }
        }
    }

    fn record(&self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() {
            return;
        }
        self.buffer.append(TimestampedLine::new(line));
        self.lines_captured.fetch_add(1, Ordering::Relaxed);
    }
}

/// Splits a byte stream on `\n`, `\r` and `\r\n`
#[derive(Debug, Default)]
struct LineSplitter {
    pending: Vec<u8>,
    last_was_cr: bool,
}

impl LineSplitter {
    fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();

        for &byte in chunk {
            match byte {
                b'\n' if self.last_was_cr => {
                    self.last_was_cr = false;
                }
                b'\n' | b'\r' => {
                    lines.push(std::mem::take(&mut self.pending));
                    self.last_was_cr = byte == b'\r';
                }
                _ => {
                    self.pending.push(byte);
                    self.last_was_cr = false;
                }
            }
        }

        lines
    }

    fn finish(&mut self) -> Option<Vec<u8>> {
        self.last_was_cr = false;
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn lines_of(buffer: &RingBuffer<TimestampedLine>) -> Vec<String> {
        buffer.get_all().0.into_iter().map(|r| r.line).collect()
    }

    #[test]
    fn test_splitter_handles_all_terminators() {
        let mut splitter = LineSplitter::default();
        let lines = splitter.feed(b"one\ntwo\r\nthree\rfour");
        assert_eq!(lines, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
        assert_eq!(splitter.finish(), Some(b"four".to_vec()));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_splitter_crlf_across_chunks() {
        let mut splitter = LineSplitter::default();
        assert_eq!(splitter.feed(b"a\r"), vec![b"a".to_vec()]);
        assert!(splitter.feed(b"\nb\n") == vec![b"b".to_vec()]);
    }

    #[tokio::test]
    async fn test_capture_trims_and_skips_blank_lines() {
        let buffer = Arc::new(RingBuffer::new(10));
        let capture = StreamCapture::new(Arc::clone(&buffer), CancellationToken::new());
        let counter = capture.lines_captured();

        capture
            .run(&b"  first line  \n\n\nsecond\n"[..], &b""[..])
            .await;

        assert_eq!(lines_of(&buffer), vec!["first line", "second"]);
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_capture_merges_both_pipes() {
        let buffer = Arc::new(RingBuffer::new(10));
        let capture = StreamCapture::new(Arc::clone(&buffer), CancellationToken::new());

        capture
            .run(&b"from stdout\n"[..], &b"frame=1\rframe=2\r"[..])
            .await;

        let mut lines = lines_of(&buffer);
        lines.sort();
        assert_eq!(lines, vec!["frame=1", "frame=2", "from stdout"]);
    }

    #[tokio::test]
    async fn test_capture_replaces_invalid_utf8() {
        let buffer = Arc::new(RingBuffer::new(10));
        let capture = StreamCapture::new(Arc::clone(&buffer), CancellationToken::new());

        capture.run(&b"bad \xff byte\n"[..], &b""[..]).await;

        assert_eq!(lines_of(&buffer), vec!["bad \u{fffd} byte"]);
    }

    #[tokio::test]
    async fn test_capture_stops_on_cancellation() {
        let buffer = Arc::new(RingBuffer::new(10));
        let token = CancellationToken::new();
        let capture = StreamCapture::new(Arc::clone(&buffer), token.clone());

        let (out_reader, mut out_writer) = tokio::io::duplex(64);
        let (err_reader, _err_writer) = tokio::io::duplex(64);
        let task = tokio::spawn(capture.run(out_reader, err_reader));

        out_writer.write_all(b"hello\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("capture should observe cancellation")
            .unwrap();
        assert_eq!(lines_of(&buffer), vec!["hello"]);
    }
}
