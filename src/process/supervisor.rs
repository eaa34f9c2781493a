use super::command::{resolve_binary, EncoderCommand};
use super::fifo::ProgressChannel;
use super::handle::{ProcessHandle, ProcessStatus};
use crate::{
    capture::StreamCapture,
    config::FfwardenConfig,
    error::{ProcessError, Result},
    progress::{ProgressReassembler, ProgressSnapshot, SnapshotSlot},
    record::TimestampedLine,
    ring_buffer::RingBuffer,
};
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Owns the encoder process and every task reading from it
pub struct ProcessSupervisor {
    binary: String,
    progress_flag: String,
    pipes_dir: PathBuf,
    shutdown_timeout: Duration,
    args: String,
    progress_buffer: Arc<RingBuffer<TimestampedLine>>,
    stdout_buffer: Arc<RingBuffer<TimestampedLine>>,
    snapshot: Arc<SnapshotSlot>,
    handle: Arc<RwLock<Option<ProcessHandle>>>,
    cancellation_token: CancellationToken,
    channel: Mutex<Option<ProgressChannel>>,
    kill_sender: Mutex<Option<oneshot::Sender<()>>>,
    waiter: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    stopped: AtomicBool,
}

impl ProcessSupervisor {
    /// Create a supervisor for `args`; nothing is launched until [`start`](Self::start)
    pub fn new(config: &FfwardenConfig, args: impl Into<String>) -> Self {
        Self {
            binary: config.process.binary.clone(),
            progress_flag: config.process.progress_flag.clone(),
            pipes_dir: config.pipes_dir(),
            shutdown_timeout: Duration::from_secs(config.process.shutdown_timeout_secs),
            args: args.into(),
            progress_buffer: Arc::new(RingBuffer::new(config.buffers.progress_capacity)),
            stdout_buffer: Arc::new(RingBuffer::new(config.buffers.stdout_capacity)),
            snapshot: Arc::new(SnapshotSlot::new()),
            handle: Arc::new(RwLock::new(None)),
            cancellation_token: CancellationToken::new(),
            channel: Mutex::new(None),
            kill_sender: Mutex::new(None),
            waiter: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Provision the progress channel, launch the encoder and its readers
    ///
    /// A second call returns the existing handle.
    pub fn start(&self) -> Result<ProcessHandle> {
        if let Some(existing) = self.handle() {
            warn!("Encoder already running (pid {:?})", existing.pid);
            return Ok(existing);
        }

        let program = resolve_binary(&self.binary)?;
        let channel = ProgressChannel::provision(&self.pipes_dir, std::process::id())?;
        let command = EncoderCommand::with_progress(
            program,
            &self.progress_flag,
            channel.path(),
            &self.args,
        );
        let command_line = command.display();

        // Opened before spawning so the encoder never blocks on a reader-less pipe
        let receiver = match channel.open_receiver() {
            Ok(receiver) => receiver,
            Err(e) => {
                channel.remove();
                return Err(e.into());
            }
        };

        info!("Starting encoder: {}", command_line);

        let mut child = match Command::new(command.program())
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                channel.remove();
                return Err(ProcessError::SpawnFailed {
                    command: command_line,
                    source,
                }
                .into());
            }
        };

        let started_at = Local::now();
        let pid = child.id();

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            (stdout, _) => {
                channel.remove();
                let stream = if stdout.is_none() { "stdout" } else { "stderr" };
                return Err(ProcessError::MissingPipe { stream }.into());
            }
        };

        let handle = ProcessHandle::running(pid, command_line, started_at);
        *self.handle.write() = Some(handle.clone());
        *self.channel.lock() = Some(channel);

        let reassembler = ProgressReassembler::new(
            Arc::clone(&self.progress_buffer),
            Arc::clone(&self.snapshot),
            self.cancellation_token.child_token(),
        );
        let capture = StreamCapture::new(
            Arc::clone(&self.stdout_buffer),
            self.cancellation_token.child_token(),
        );

        let progress_task = tokio::spawn(reassembler.run(BufReader::new(receiver)));
        info!("Progress reader task started");
        let capture_task = tokio::spawn(capture.run(stdout, stderr));
        info!("Output capture task started");

        {
            let mut tasks = self.tasks.lock();
            tasks.push(("progress reader", progress_task));
            tasks.push(("output capture", capture_task));
        }

        let (kill_sender, kill_receiver) = oneshot::channel();
        *self.kill_sender.lock() = Some(kill_sender);
        *self.waiter.lock() = Some(tokio::spawn(wait_for_exit(
            child,
            kill_receiver,
            Arc::clone(&self.handle),
        )));

        info!("Encoder started with pid {:?}", pid);
        Ok(handle)
    }

    /// Stop readers and the encoder; later calls are no-ops
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Supervisor already stopped");
            return;
        }

        info!("Stopping encoder supervisor");
        self.cancellation_token.cancel();

        if let Some(handle) = self.handle.write().as_mut() {
            handle.terminated = true;
        }

        if let Some(kill_sender) = self.kill_sender.lock().take() {
            let _ = kill_sender.send(());
        }

        let waiter = self.waiter.lock().take();
        if let Some(waiter) = waiter {
            self.join_task("encoder waiter", waiter).await;
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for (name, task) in tasks {
            self.join_task(name, task).await;
        }

        if let Some(channel) = self.channel.lock().take() {
            channel.remove();
        }

        info!("Encoder supervisor stopped ({})", self.process_status());
    }

    async fn join_task(&self, name: &str, mut task: JoinHandle<()>) {
        match timeout(self.shutdown_timeout, &mut task).await {
            Ok(Ok(())) => debug!("{} task finished", name),
            Ok(Err(e)) => error!("{} task failed: {}", name, e),
            Err(_) => {
                warn!(
                    "{} task did not finish within {:?}, aborting",
                    name, self.shutdown_timeout
                );
                task.abort();
            }
        }
    }

    /// Track an extra task so that [`stop`](Self::stop) joins it too
    pub fn track_task(&self, name: &'static str, task: JoinHandle<()>) {
        self.tasks.lock().push((name, task));
    }

    /// Token cancelled when the supervisor stops
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancellation_token.child_token()
    }

    pub fn progress_buffer(&self) -> Arc<RingBuffer<TimestampedLine>> {
        Arc::clone(&self.progress_buffer)
    }

    pub fn stdout_buffer(&self) -> Arc<RingBuffer<TimestampedLine>> {
        Arc::clone(&self.stdout_buffer)
    }

    /// Latest reassembled progress record
    pub fn progress_snapshot(&self) -> Option<Arc<ProgressSnapshot>> {
        self.snapshot.latest()
    }

    pub fn handle(&self) -> Option<ProcessHandle> {
        self.handle.read().clone()
    }

    pub fn process_status(&self) -> ProcessStatus {
        self.handle
            .read()
            .as_ref()
            .map(|handle| handle.status)
            .unwrap_or(ProcessStatus::NotStarted)
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.read().as_ref().and_then(|handle| handle.pid)
    }

    pub fn start_time(&self) -> Option<DateTime<Local>> {
        self.handle.read().as_ref().map(|handle| handle.started_at)
    }

    /// Arguments as given to the wrapper, before the progress flag is added
    pub fn args(&self) -> &str {
        &self.args
    }

    pub fn is_finished(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Sole owner of the child; records its exit status
async fn wait_for_exit(
    mut child: Child,
    kill_receiver: oneshot::Receiver<()>,
    handle: Arc<RwLock<Option<ProcessHandle>>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_receiver => {
            debug!("Killing encoder");
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill encoder: {}", e);
            }
            child.wait().await
        }
    };

    let status = match status {
        Ok(status) => ProcessStatus::Exited {
            code: status.code(),
        },
        Err(e) => {
            error!("Failed to wait for encoder: {}", e);
            ProcessStatus::Exited { code: None }
        }
    };

    info!("Encoder {}", status);
    if let Some(handle) = handle.write().as_mut() {
        handle.status = status;
    }
}

/// Run the encoder without arguments or supervision and return its output
pub async fn run_passthrough(binary: &str) -> Result<String> {
    let program = resolve_binary(binary)?;
    info!("Running {} without arguments", program.display());

    let output = Command::new(&program)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| ProcessError::SpawnFailed {
            command: program.display().to_string(),
            source,
        })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(combined)
}
