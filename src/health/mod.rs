mod checks;
mod monitor;
mod state;
mod types;

pub use checks::{ErrorWindow, FpsCheck, SpeedCheck, StuckDetector, StuckVerdict, WindowState};
pub use monitor::HealthMonitor;
pub use state::{HealthState, Observation};
pub use types::{MonitorPhase, ShutdownReason};
