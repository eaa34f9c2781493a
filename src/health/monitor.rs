use super::state::{HealthState, Observation};
use super::types::{MonitorPhase, ShutdownReason};
use crate::config::MonitorConfig;
use crate::process::{ProcessStatus, ProcessSupervisor};
use chrono::Local;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Polling loop that stops the supervisor once a verdict is reached
pub struct HealthMonitor {
    supervisor: Arc<ProcessSupervisor>,
    config: MonitorConfig,
    cancellation_token: CancellationToken,
    phase: Arc<RwLock<MonitorPhase>>,
}

impl HealthMonitor {
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        config: MonitorConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            supervisor,
            config,
            cancellation_token,
            phase: Arc::new(RwLock::new(MonitorPhase::WarmingUp)),
        }
    }

    /// Shared view of the current phase, for status reporting
    pub fn phase_handle(&self) -> Arc<RwLock<MonitorPhase>> {
        Arc::clone(&self.phase)
    }

    /// Run until a verdict (returned) or until cancelled (`None`)
    pub async fn run(self) -> Option<ShutdownReason> {
        let start_delay = self.config.start_delay();

        tokio::select! {
            _ = self.cancellation_token.cancelled() => {
                info!("Health monitor cancelled during start delay");
                return None;
            }
            _ = sleep(start_delay) => {}
        }

        info!("Health monitor started (with delay {:?})", start_delay);
        if self.config.encoding_check {
            info!(
                "Encoding checker will start {:?} after the encoder",
                self.config.encoding_check_delay()
            );
        }

        let mut state = HealthState::new(&self.config);
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    info!("Health monitor stopped");
                    return None;
                }
                _ = ticker.tick() => {}
            }

            let observation = self.observe();
            let verdict = state.tick(&observation, Instant::now());
            *self.phase.write() = state.phase();

            if let Some(reason) = verdict {
                warn!("Shutting down encoder: {}", reason);
                self.supervisor.stop().await;
                return Some(reason);
            }
        }
    }

    fn observe(&self) -> Observation {
        let handle = self.supervisor.handle();
        let status = handle
            .as_ref()
            .map(|handle| handle.status)
            .unwrap_or(ProcessStatus::NotStarted);
        let process_elapsed = handle
            .as_ref()
            .and_then(|handle| (Local::now() - handle.started_at).to_std().ok());
        let latest_stdout = self
            .supervisor
            .stdout_buffer()
            .latest()
            .map(|record| record.captured_at);
        let snapshot = self.supervisor.progress_snapshot();

        debug!("Health tick: status={}, elapsed={:?}", status, process_elapsed);

        Observation {
            status,
            process_elapsed,
            latest_stdout,
            snapshot,
        }
    }
}
