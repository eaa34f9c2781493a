/// Component lifecycle states
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Exit code when the encoder could not be launched at all
pub const EXIT_LAUNCH_FAILURE: i32 = 2;

/// Exit code for every other terminal path, a clean finish included
pub const EXIT_TERMINATED: i32 = 1;
