pub mod app;
pub mod capture;
pub mod config;
pub mod error;
pub mod health;
pub mod process;
pub mod progress;
pub mod record;
pub mod ring_buffer;
pub mod sink;
pub mod status;

#[cfg(feature = "query")]
pub mod query;

pub use app::{exit_code, ComponentState, FfwardenOrchestrator};
pub use capture::StreamCapture;
pub use config::FfwardenConfig;
pub use error::{FfwardenError, Result};
pub use health::{HealthMonitor, HealthState, MonitorPhase, ShutdownReason};
pub use process::{run_passthrough, ProcessHandle, ProcessStatus, ProcessSupervisor};
pub use progress::{ProgressReassembler, ProgressSnapshot};
pub use record::TimestampedLine;
pub use ring_buffer::{RingBuffer, RingBufferBuilder};
pub use sink::{LineSink, RollingFileSink, TelemetrySink};
pub use status::{detect_container_id, StatusFields, StatusFiles};

#[cfg(feature = "query")]
pub use query::{QueryServer, QueryServerBuilder};
