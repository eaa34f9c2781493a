use crate::error::{ProcessError, Result};
use crate::record::TIMESTAMP_FORMAT;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CPUSET_PATH: &str = "/proc/1/cpuset";

/// Runtime facts published for external liveness probes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusFields {
    pub container_name: Option<String>,
    pub container_id: String,
    pub pid: u32,
    pub ffmpeg_pid: Option<u32>,
    pub workdir: String,
    pub logs_path: String,
    pub http_host: String,
    pub http_port: Option<u16>,
    pub start_time: Option<DateTime<Local>>,
    pub args: String,
}

impl StatusFields {
    /// File name and content of every field, in a stable order
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("CONTAINER_NAME", self.container_name.clone().unwrap_or_default()),
            ("CONTAINER_ID", self.container_id.clone()),
            ("PID", self.pid.to_string()),
            ("FFMPEG_PID", optional(self.ffmpeg_pid)),
            ("WORKDIR", self.workdir.clone()),
            ("LOGS_PATH", self.logs_path.clone()),
            ("HTTP_HOST", self.http_host.clone()),
            ("HTTP_PORT", optional(self.http_port)),
            (
                "START_TIME",
                self.start_time
                    .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
                    .unwrap_or_default(),
            ),
            ("ARGS", self.args.clone()),
        ]
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Directory with one small file per status field
pub struct StatusFiles {
    dir: PathBuf,
    fields: Mutex<StatusFields>,
}

impl StatusFiles {
    pub fn new(dir: impl Into<PathBuf>, fields: StatusFields) -> Self {
        Self {
            dir: dir.into(),
            fields: Mutex::new(fields),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn fields(&self) -> StatusFields {
        self.fields.lock().clone()
    }

    /// Refuse to share the workdir with another live wrapper
    ///
    /// Skipped when running as pid 1, since a container restart reuses it.
    pub fn ensure_not_running(&self) -> std::result::Result<(), ProcessError> {
        let own_pid = self.fields.lock().pid;
        if own_pid == 1 {
            return Ok(());
        }

        let pid_path = self.dir.join("PID");
        let recorded = match std::fs::read_to_string(&pid_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                warn!("PID check: can't read {}: {}", pid_path.display(), e);
                return Ok(());
            }
        };

        let Ok(pid) = recorded.trim().parse::<i32>() else {
            debug!("PID check: ignoring unparseable {}", pid_path.display());
            return Ok(());
        };

        if pid > 0 && pid as u32 != own_pid && process_alive(pid) {
            return Err(ProcessError::WorkdirBusy {
                workdir: self.fields.lock().workdir.clone(),
                pid,
            });
        }
        Ok(())
    }

    /// Write every field to disk
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let entries = self.fields.lock().entries();
        for (name, value) in entries {
            std::fs::write(self.dir.join(name), value)?;
        }
        debug!("Status saved to {}", self.dir.display());
        Ok(())
    }

    /// Change fields and persist the result
    pub fn update(&self, change: impl FnOnce(&mut StatusFields)) -> Result<()> {
        change(&mut *self.fields.lock());
        self.save()
    }
}

fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 performs only the existence and permission check
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Docker container id of the current process, empty outside Docker
pub fn detect_container_id() -> String {
    match std::fs::read_to_string(CPUSET_PATH) {
        Ok(cpuset) => {
            let id = parse_container_id(&cpuset);
            if !id.is_empty() {
                info!("Running in container {}", id);
            }
            id
        }
        Err(e) => {
            debug!("Can't read {}: {}", CPUSET_PATH, e);
            String::new()
        }
    }
}

pub fn parse_container_id(cpuset: &str) -> String {
    let cpuset = cpuset.trim();
    if cpuset.starts_with("/docker") {
        cpuset.rsplit('/').next().unwrap_or_default().to_string()
    } else {
        String::new()
    }
}
