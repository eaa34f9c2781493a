use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

/// Lifecycle state of the supervised encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessStatus {
    NotStarted,
    Running,
    /// `code` is `None` when the process was ended by a signal
    Exited { code: Option<i32> },
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }

    /// Exited on its own with status 0
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessStatus::Exited { code: Some(0) })
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::NotStarted => write!(f, "not started"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Exited { code: Some(code) } => write!(f, "exited with code {}", code),
            ProcessStatus::Exited { code: None } => write!(f, "terminated by signal"),
        }
    }
}

/// Snapshot of the running encoder, written only by the supervisor
#[derive(Debug, Clone, Serialize)]
pub struct ProcessHandle {
    pub pid: Option<u32>,
    pub command: String,
    pub started_at: DateTime<Local>,
    /// Set once a stop was requested
    pub terminated: bool,
    pub status: ProcessStatus,
}

impl ProcessHandle {
    pub(crate) fn running(pid: Option<u32>, command: String, started_at: DateTime<Local>) -> Self {
        Self {
            pid,
            command,
            started_at,
            terminated: false,
            status: ProcessStatus::Running,
        }
    }

    pub fn has_exited(&self) -> bool {
        matches!(self.status, ProcessStatus::Exited { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(ProcessStatus::Running.is_running());
        assert!(ProcessStatus::Exited { code: Some(0) }.is_success());
        assert!(!ProcessStatus::Exited { code: Some(1) }.is_success());
        assert!(!ProcessStatus::Exited { code: None }.is_success());
        assert!(!ProcessStatus::NotStarted.is_running());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ProcessStatus::Exited { code: Some(3) }.to_string(), "exited with code 3");
        assert_eq!(ProcessStatus::Exited { code: None }.to_string(), "terminated by signal");
    }

    #[test]
    fn test_new_handle_is_running() {
        let handle = ProcessHandle::running(Some(42), "ffmpeg -i in".to_string(), Local::now());
        assert!(handle.status.is_running());
        assert!(!handle.terminated);
        assert!(!handle.has_exited());
    }
}
