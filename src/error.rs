use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FfwardenError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Progress error: {0}")]
    Progress(#[from] ProgressError),

    #[error("Query server error: {message}")]
    Query { message: String },

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl FfwardenError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Errors that mean the encoder never got off the ground
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            FfwardenError::Provisioning(_)
                | FfwardenError::Process(ProcessError::BinaryNotFound { .. })
                | FfwardenError::Process(ProcessError::SpawnFailed { .. })
                | FfwardenError::Process(ProcessError::WorkdirBusy { .. })
        )
    }
}

/// Failures while preparing the progress channel
#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("Failed to create pipes directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove stale progress channel {path}: {source}")]
    StaleChannel {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create progress channel {path}: {source}")]
    Fifo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid progress channel path: {path}")]
    InvalidPath { path: PathBuf },

    #[error("Failed to open progress channel {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Subprocess lifecycle failures
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Encoder binary '{binary}' not found: {details}")]
    BinaryNotFound { binary: String, details: String },

    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Workdir {workdir} is busy by process with pid {pid}")]
    WorkdirBusy { workdir: String, pid: i32 },

    #[error("Encoder process has no {stream} pipe")]
    MissingPipe { stream: &'static str },
}

/// Reassembly failures, local to one progress cycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgressError {
    #[error("Malformed progress field '{field}'")]
    MalformedField { field: String },

    #[error("Progress cycle exceeded {capacity} lines without a terminator")]
    CycleOverflow { capacity: usize },
}

pub type Result<T> = std::result::Result<T, FfwardenError>;
