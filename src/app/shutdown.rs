use super::{ComponentState, FfwardenOrchestrator, EXIT_LAUNCH_FAILURE, EXIT_TERMINATED};
use crate::error::Result;
use crate::health::ShutdownReason;
use tracing::{error, info};

impl FfwardenOrchestrator {
    /// Stop everything, print the output tail and compute the exit code
    ///
    /// Runs on every terminal path, including failed startups.
    pub async fn shutdown(&mut self, outcome: &Result<ShutdownReason>) -> i32 {
        info!("Beginning graceful shutdown");

        self.cancellation_token.cancel();

        self.set_component_state("encoder", ComponentState::Stopping)
            .await;
        self.supervisor.stop().await;
        self.set_component_state("encoder", ComponentState::Stopped)
            .await;

        for line in self.stdout_tail() {
            println!("{}", line);
        }

        let exit_code = exit_code(outcome);
        match outcome {
            Ok(reason) => info!("Graceful shutdown completed ({}), exit code {}", reason, exit_code),
            Err(e) => error!("Shutdown after error: {} (exit code {})", e, exit_code),
        }
        exit_code
    }

    /// Last `tail_lines` output lines rendered as `<ts> line`
    pub fn stdout_tail(&self) -> Vec<String> {
        let tail_lines = self.config.system.tail_lines;
        if tail_lines == 0 {
            return Vec::new();
        }

        let (records, _) = self.supervisor.stdout_buffer().get_last_items(tail_lines);
        records.iter().map(ToString::to_string).collect()
    }
}

/// 2 when the encoder never launched, 1 on every other path
pub fn exit_code(outcome: &Result<ShutdownReason>) -> i32 {
    match outcome {
        Err(e) if e.is_launch_failure() => EXIT_LAUNCH_FAILURE,
        _ => EXIT_TERMINATED,
    }
}
