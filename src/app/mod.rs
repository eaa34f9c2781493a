mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::FfwardenOrchestrator;
pub use shutdown::exit_code;
pub use types::{ComponentState, EXIT_LAUNCH_FAILURE, EXIT_TERMINATED};
