use crate::{
    config::{LogConfig, LogRotation},
    error::{FfwardenError, Result},
    record::TimestampedLine,
    ring_buffer::RingBuffer,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Durable destination for drained telemetry lines
pub trait LineSink: Send {
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Move the current file to a numbered backup and start a fresh one, used on SIGHUP
    fn reopen(&mut self) -> io::Result<()>;
}

/// Rotating log file backed by `tracing-appender`
///
/// Time based modes let the appender switch files on period boundaries.
/// A rollover, on SIGHUP or when a size limit is crossed, renames the
/// current file to `<file>.1`, shifting older backups up to `max_files`.
pub struct RollingFileSink {
    dir: PathBuf,
    prefix: String,
    rotation: LogRotation,
    max_files: usize,
    max_bytes: u64,
    written: u64,
    appender: RollingFileAppender,
}

impl RollingFileSink {
    pub fn new(config: &LogConfig, dir: &Path, prefix: &str) -> Result<Self> {
        let rotation = config.rotation()?;
        std::fs::create_dir_all(dir)?;
        let appender = build_appender(dir, prefix, rotation, config.max_files)?;

        let mut sink = Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            rotation,
            max_files: config.max_files,
            max_bytes: config.max_bytes,
            written: 0,
            appender,
        };
        // Appending to a file left by an earlier run counts toward the limit
        if rotation == LogRotation::Size {
            if let Some(current) = sink.active_file()? {
                sink.written = std::fs::metadata(current).map(|m| m.len()).unwrap_or(0);
            }
        }

        info!("Encoder logs written to {}", dir.display());
        Ok(sink)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File the appender is currently writing to
    fn active_file(&self) -> io::Result<Option<PathBuf>> {
        match self.rotation {
            LogRotation::Never | LogRotation::Size => {
                Ok(Some(self.dir.join(format!("{}.log", self.prefix))))
            }
            LogRotation::Minutely | LogRotation::Hourly | LogRotation::Daily => {
                newest_dated_file(&self.dir, &self.prefix)
            }
        }
    }

    fn roll_over(&mut self) -> io::Result<()> {
        self.appender.flush()?;
        std::fs::create_dir_all(&self.dir)?;
        if let Some(current) = self.active_file()? {
            shift_backups(&current, self.max_files)?;
            debug!("Rolled over {}", current.display());
        }

        self.appender = build_appender(&self.dir, &self.prefix, self.rotation, self.max_files)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        self.written = 0;
        Ok(())
    }
}

/// Most recently modified `<prefix>.<date>.log` in `dir`
fn newest_dated_file(dir: &Path, prefix: &str) -> io::Result<Option<PathBuf>> {
    let stem = format!("{}.", prefix);
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(&stem) || !name.ends_with(".log") {
            continue;
        }

        let modified = entry.metadata()?.modified()?;
        if newest.as_ref().map_or(true, |(latest, _)| modified >= *latest) {
            newest = Some((modified, entry.path()));
        }
    }

    Ok(newest.map(|(_, path)| path))
}

/// Rename `current` to `current.1`, `current.1` to `current.2` and so on,
/// dropping whatever would land past `keep`
fn shift_backups(current: &Path, keep: usize) -> io::Result<()> {
    if !current.exists() {
        return Ok(());
    }
    if keep == 0 {
        return std::fs::remove_file(current);
    }

    let backup = |n: usize| {
        let mut name = current.as_os_str().to_owned();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    };

    match std::fs::remove_file(backup(keep)) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }
    for n in (1..keep).rev() {
        let from = backup(n);
        if from.exists() {
            std::fs::rename(&from, backup(n + 1))?;
        }
    }
    std::fs::rename(current, backup(1))
}

fn build_appender(
    dir: &Path,
    prefix: &str,
    rotation: LogRotation,
    max_files: usize,
) -> Result<RollingFileAppender> {
    let rotation = match rotation {
        LogRotation::Minutely => Rotation::MINUTELY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Size | LogRotation::Never => Rotation::NEVER,
    };

    RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(max_files)
        .build(dir)
        .map_err(|e| FfwardenError::component("sink".to_string(), e.to_string()))
}

impl LineSink for RollingFileSink {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let len = line.len() as u64 + 1;
        if self.rotation == LogRotation::Size
            && self.written > 0
            && self.written + len > self.max_bytes
        {
            self.roll_over()?;
        }

        self.appender.write_all(line.as_bytes())?;
        self.appender.write_all(b"\n")?;
        self.written += len;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.appender.flush()
    }

    fn reopen(&mut self) -> io::Result<()> {
        self.roll_over()
    }
}

/// Incrementally drains a telemetry buffer into a [`LineSink`]
pub struct TelemetrySink<S: LineSink> {
    buffer: Arc<RingBuffer<TimestampedLine>>,
    sink: S,
    drain_interval: Duration,
    position: u64,
    reopen: Arc<Notify>,
    cancellation_token: CancellationToken,
}

impl<S: LineSink> TelemetrySink<S> {
    pub fn new(
        buffer: Arc<RingBuffer<TimestampedLine>>,
        sink: S,
        drain_interval: Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            buffer,
            sink,
            drain_interval,
            position: 0,
            reopen: Arc::new(Notify::new()),
            cancellation_token,
        }
    }

    /// Notified to make the sink roll its file over
    pub fn reopen_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.reopen)
    }

    /// Write every line appended since the previous drain
    pub fn drain(&mut self) -> usize {
        let (records, position) = self.buffer.items_since(self.position);

        let mut written = 0;
        for record in &records {
            if let Err(e) = self.sink.write_line(&record.to_string()) {
                error!(
                    "Failed to write encoder log line, {} lines deferred: {}",
                    records.len() - written,
                    e
                );
                break;
            }
            written += 1;
        }
        // Unwritten lines are retried on the next drain unless overwritten first
        self.position = position - (records.len() - written) as u64;

        if written > 0 {
            if let Err(e) = self.sink.flush() {
                warn!("Failed to flush encoder log: {}", e);
            }
        }
        written
    }

    pub async fn run(mut self) {
        info!("Encoder log writer started");
        let reopen = Arc::clone(&self.reopen);

        loop {
            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    let written = self.drain();
                    debug!("Final drain wrote {} lines", written);
                    info!("Encoder log writer stopped");
                    break;
                }
                _ = reopen.notified() => {
                    self.drain();
                    match self.sink.reopen() {
                        Ok(()) => info!("Encoder log rolled over"),
                        Err(e) => error!("Failed to roll over encoder log: {}", e),
                    }
                }
                _ = sleep(self.drain_interval) => {
                    self.drain();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct MemorySink {
        lines: Arc<Mutex<Vec<String>>>,
        reopened: Arc<Mutex<usize>>,
    }

    impl LineSink for MemorySink {
        fn write_line(&mut self, line: &str) -> io::Result<()> {
            self.lines.lock().push(line.to_string());
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn reopen(&mut self) -> io::Result<()> {
            *self.reopened.lock() += 1;
            Ok(())
        }
    }

    /// Refuses every write once `fail_after` lines were accepted
    struct FlakySink {
        lines: Vec<String>,
        fail_after: Option<usize>,
    }

    impl LineSink for FlakySink {
        fn write_line(&mut self, line: &str) -> io::Result<()> {
            if self.fail_after.is_some_and(|limit| self.lines.len() >= limit) {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.lines.push(line.to_string());
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn reopen(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn create_test_log_config() -> LogConfig {
        LogConfig {
            file_log: true,
            path: String::new(),
            rotation: "never".to_string(),
            max_files: 2,
            max_bytes: 1024,
            drain_interval_ms: 10,
            wrapper_log: false,
        }
    }

    #[test]
    fn test_drain_is_incremental() {
        let buffer = Arc::new(RingBuffer::new(8));
        let memory = MemorySink::default();
        let mut sink = TelemetrySink::new(
            Arc::clone(&buffer),
            memory.clone(),
            Duration::from_millis(10),
            CancellationToken::new(),
        );

        buffer.append(TimestampedLine::new("one"));
        buffer.append(TimestampedLine::new("two"));
        assert_eq!(sink.drain(), 2);
        assert_eq!(sink.drain(), 0);

        buffer.append(TimestampedLine::new("three"));
        assert_eq!(sink.drain(), 1);

        let lines = memory.lines.lock().clone();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with('<'));
        assert!(lines[0].ends_with("> one"));
        assert!(lines[2].ends_with("> three"));
    }

    #[test]
    fn test_drain_skips_overwritten_lines() {
        let buffer = Arc::new(RingBuffer::new(2));
        let memory = MemorySink::default();
        let mut sink = TelemetrySink::new(
            Arc::clone(&buffer),
            memory.clone(),
            Duration::from_millis(10),
            CancellationToken::new(),
        );

        for i in 0..5 {
            buffer.append(TimestampedLine::new(format!("line {i}")));
        }
        assert_eq!(sink.drain(), 2);

        let lines = memory.lines.lock().clone();
        assert!(lines[0].ends_with("line 3"));
        assert!(lines[1].ends_with("line 4"));
    }

    #[test]
    fn test_drain_retries_lines_after_write_failure() {
        let buffer = Arc::new(RingBuffer::new(8));
        let mut sink = TelemetrySink::new(
            Arc::clone(&buffer),
            FlakySink {
                lines: Vec::new(),
                fail_after: Some(1),
            },
            Duration::from_millis(10),
            CancellationToken::new(),
        );

        for name in ["one", "two", "three"] {
            buffer.append(TimestampedLine::new(name));
        }
        assert_eq!(sink.drain(), 1);

        sink.sink.fail_after = None;
        assert_eq!(sink.drain(), 2);
        assert_eq!(sink.drain(), 0);

        let lines = &sink.sink.lines;
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("> one"));
        assert!(lines[1].ends_with("> two"));
        assert!(lines[2].ends_with("> three"));
    }

    #[tokio::test]
    async fn test_run_drains_reopens_and_flushes_on_stop() {
        let buffer = Arc::new(RingBuffer::new(8));
        let memory = MemorySink::default();
        let token = CancellationToken::new();
        let sink = TelemetrySink::new(
            Arc::clone(&buffer),
            memory.clone(),
            Duration::from_millis(10),
            token.clone(),
        );
        let reopen = sink.reopen_handle();
        let task = tokio::spawn(sink.run());

        buffer.append(TimestampedLine::new("first"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(memory.lines.lock().len(), 1);

        reopen.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*memory.reopened.lock(), 1);

        buffer.append(TimestampedLine::new("last"));
        token.cancel();
        task.await.unwrap();

        let lines = memory.lines.lock().clone();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("> last"));
    }

    fn read(path: PathBuf) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_rolling_file_sink_rolls_over_on_reopen() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        let mut sink = RollingFileSink::new(&create_test_log_config(), &logs, "ffmpeg_test").unwrap();

        sink.write_line("<2024-01-01 00:00:00> hello").unwrap();
        sink.flush().unwrap();
        assert_eq!(
            read(logs.join("ffmpeg_test.log")),
            "<2024-01-01 00:00:00> hello\n"
        );

        sink.reopen().unwrap();
        sink.write_line("second").unwrap();
        sink.reopen().unwrap();
        sink.write_line("third").unwrap();
        sink.flush().unwrap();

        assert_eq!(read(logs.join("ffmpeg_test.log")), "third\n");
        assert_eq!(read(logs.join("ffmpeg_test.log.1")), "second\n");
        assert_eq!(
            read(logs.join("ffmpeg_test.log.2")),
            "<2024-01-01 00:00:00> hello\n"
        );

        // max_files = 2, the oldest backup is dropped
        sink.reopen().unwrap();
        sink.flush().unwrap();
        assert_eq!(read(logs.join("ffmpeg_test.log")), "");
        assert_eq!(read(logs.join("ffmpeg_test.log.1")), "third\n");
        assert_eq!(read(logs.join("ffmpeg_test.log.2")), "second\n");
        assert!(!logs.join("ffmpeg_test.log.3").exists());
        assert_eq!(sink.dir(), logs.as_path());
    }

    #[test]
    fn test_rolling_file_sink_rolls_over_by_size() {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_log_config();
        config.rotation = "size".to_string();
        config.max_bytes = 16;

        let mut sink = RollingFileSink::new(&config, dir.path(), "ffmpeg_size").unwrap();
        for i in 1..=4 {
            sink.write_line(&format!("line-{:04}", i)).unwrap();
        }
        sink.flush().unwrap();

        assert_eq!(read(dir.path().join("ffmpeg_size.log")), "line-0004\n");
        assert_eq!(read(dir.path().join("ffmpeg_size.log.1")), "line-0003\n");
        assert_eq!(read(dir.path().join("ffmpeg_size.log.2")), "line-0002\n");
        assert!(!dir.path().join("ffmpeg_size.log.3").exists());

        // A new sink picks up the size of the file it appends to
        drop(sink);
        let mut sink = RollingFileSink::new(&config, dir.path(), "ffmpeg_size").unwrap();
        sink.write_line("line-0005").unwrap();
        sink.flush().unwrap();

        assert_eq!(read(dir.path().join("ffmpeg_size.log")), "line-0005\n");
        assert_eq!(read(dir.path().join("ffmpeg_size.log.1")), "line-0004\n");
    }

    #[test]
    fn test_rolling_file_sink_rolls_over_dated_file() {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_log_config();
        config.rotation = "daily".to_string();

        let mut sink = RollingFileSink::new(&config, dir.path(), "ffmpeg_day").unwrap();
        sink.write_line("before").unwrap();
        sink.reopen().unwrap();
        sink.write_line("after").unwrap();
        sink.flush().unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        assert_eq!(names.len(), 2);
        assert!(names[0].starts_with("ffmpeg_day.") && names[0].ends_with(".log"));
        assert_eq!(names[1], format!("{}.1", names[0]));
        assert_eq!(read(dir.path().join(&names[0])), "after\n");
        assert_eq!(read(dir.path().join(&names[1])), "before\n");
    }

    #[test]
    fn test_rolling_file_sink_rejects_bad_rotation() {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_log_config();
        config.rotation = "weekly".to_string();

        assert!(RollingFileSink::new(&config, dir.path(), "ffmpeg_x").is_err());
    }
}
