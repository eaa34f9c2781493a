use super::checks::{ErrorWindow, FpsCheck, SpeedCheck, StuckDetector, StuckVerdict, WindowState};
use super::types::{MonitorPhase, ShutdownReason};
use crate::config::MonitorConfig;
use crate::process::ProcessStatus;
use crate::progress::ProgressSnapshot;
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const STUCK_WARNING_AFTER: Duration = Duration::from_secs(2);

/// Everything one tick looks at, sampled from the supervisor
#[derive(Debug, Clone)]
pub struct Observation {
    pub status: ProcessStatus,
    /// Time since the encoder was started
    pub process_elapsed: Option<Duration>,
    /// Capture time of the newest output line
    pub latest_stdout: Option<DateTime<Local>>,
    pub snapshot: Option<Arc<ProgressSnapshot>>,
}

/// Last progress record the monitor evaluated
#[derive(Debug, Clone, Copy)]
struct ProgressMark {
    captured_at: DateTime<Local>,
    first_seen: Instant,
}

/// Degradation state machine, owned by the monitor task
#[derive(Debug)]
pub struct HealthState {
    phase: MonitorPhase,
    encoding_check: bool,
    encoding_check_delay: Duration,
    progress_stale: Duration,
    direct_exit_check: bool,
    fps: FpsCheck,
    speed: SpeedCheck,
    stuck: StuckDetector,
    errors: ErrorWindow,
    last_progress: Option<ProgressMark>,
}

impl HealthState {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            phase: MonitorPhase::WarmingUp,
            encoding_check: config.encoding_check,
            encoding_check_delay: config.encoding_check_delay(),
            progress_stale: config.progress_stale(),
            direct_exit_check: config.direct_exit_check,
            fps: FpsCheck::new(config.min_base_fps, config.delta_fps),
            speed: SpeedCheck::new(config.min_speed, config.delta_speed),
            stuck: StuckDetector::new(config.max_stdout_stuck()),
            errors: ErrorWindow::new(config.max_error()),
            last_progress: None,
        }
    }

    pub fn phase(&self) -> MonitorPhase {
        self.phase
    }

    pub fn fps_check(&self) -> &FpsCheck {
        &self.fps
    }

    pub fn speed_check(&self) -> &SpeedCheck {
        &self.speed
    }

    pub fn error_window_open(&self) -> bool {
        self.errors.is_open()
    }

    /// Run one evaluation; `Some` is terminal
    pub fn tick(&mut self, observation: &Observation, now: Instant) -> Option<ShutdownReason> {
        if self.phase == MonitorPhase::Terminal {
            return None;
        }
        if self.phase == MonitorPhase::WarmingUp {
            self.phase = MonitorPhase::ObservingProcess;
        }

        let verdict = self
            .check_running_state(observation.status)
            .or_else(|| self.check_stdout_stuck(observation.latest_stdout, now))
            .or_else(|| self.check_encoding(observation, now));

        if verdict.is_some() {
            self.phase = MonitorPhase::Terminal;
        }
        verdict
    }

    fn check_running_state(&self, status: ProcessStatus) -> Option<ShutdownReason> {
        match status {
            ProcessStatus::NotStarted => {
                info!("Encoder is not running");
                Some(ShutdownReason::Finished)
            }
            ProcessStatus::Exited { code: Some(0) } => {
                info!("Encoder exited cleanly");
                Some(ShutdownReason::Finished)
            }
            ProcessStatus::Exited { code } if self.direct_exit_check => {
                warn!("Encoder exited abnormally ({})", status);
                Some(ShutdownReason::Crashed { code })
            }
            ProcessStatus::Exited { .. } | ProcessStatus::Running => None,
        }
    }

    fn check_stdout_stuck(
        &mut self,
        latest: Option<DateTime<Local>>,
        now: Instant,
    ) -> Option<ShutdownReason> {
        match self.stuck.observe(latest, now) {
            StuckVerdict::Waiting | StuckVerdict::Flowing => None,
            StuckVerdict::Silent(silent_for) => {
                if silent_for > STUCK_WARNING_AFTER {
                    warn!("Stdout is stuck ({:.1}s)", silent_for.as_secs_f64());
                }
                None
            }
            StuckVerdict::Stuck(silent_for) => {
                error!("Stdout is completely stuck ({:.1}s)", silent_for.as_secs_f64());
                Some(ShutdownReason::StdoutStuck { silent_for })
            }
        }
    }

    fn check_encoding(&mut self, observation: &Observation, now: Instant) -> Option<ShutdownReason> {
        if !self.encoding_check {
            return None;
        }
        match observation.process_elapsed {
            Some(elapsed) if elapsed >= self.encoding_check_delay => {}
            _ => return None,
        }
        if self.phase == MonitorPhase::ObservingProcess {
            info!("Encoding checker started");
            self.phase = MonitorPhase::ObservingEncoding;
        }

        let snapshot = observation.snapshot.as_ref()?;

        let (fps, speed, stale) = match self.last_progress {
            Some(mark) if mark.captured_at == snapshot.captured_at() => {
                let unchanged_for = now.saturating_duration_since(mark.first_seen);
                if unchanged_for < self.progress_stale {
                    debug!("Skip encoding check, same progress record");
                    return None;
                }
                (None, None, true)
            }
            _ => {
                self.last_progress = Some(ProgressMark {
                    captured_at: snapshot.captured_at(),
                    first_seen: now,
                });
                (snapshot.fps(), snapshot.speed(), false)
            }
        };

        let healthy = if stale {
            false
        } else {
            // Both checks run so each baseline is taken on the same record
            let fps_valid = self.fps.evaluate(fps);
            let speed_valid = self.speed.evaluate(speed);
            fps_valid || speed_valid
        };

        match self.errors.record(healthy, now) {
            WindowState::Closed => None,
            WindowState::Opened => {
                info!(
                    "Error in encoding. fps={:?}, speed={:?}, stale={}",
                    fps, speed, stale
                );
                None
            }
            WindowState::Open(_) => None,
            WindowState::Expired(open_for) => {
                error!(
                    "Encoding check failed after {:.1}s. fps={:?}, speed={:?}",
                    open_for.as_secs_f64(),
                    fps,
                    speed
                );
                Some(ShutdownReason::EncodingDegraded { fps, speed, stale })
            }
        }
    }
}
