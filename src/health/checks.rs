use chrono::{DateTime, Local};
use std::time::{Duration, Instant};
use tracing::info;

/// Fps validity with a floor calibrated once from the first valid reading
#[derive(Debug, Clone)]
pub struct FpsCheck {
    min_base_fps: f64,
    delta_fps: f64,
    baseline: Option<f64>,
    floor: Option<f64>,
}

impl FpsCheck {
    pub fn new(min_base_fps: f64, delta_fps: f64) -> Self {
        Self {
            min_base_fps,
            delta_fps,
            baseline: None,
            floor: None,
        }
    }

    /// Missing, zero or negative readings are invalid and never become the baseline
    pub fn evaluate(&mut self, fps: Option<f64>) -> bool {
        let fps = match fps {
            Some(fps) if fps > 0.0 => fps,
            _ => return false,
        };

        match self.floor {
            Some(floor) => fps >= floor,
            None => {
                let floor = if fps < self.min_base_fps {
                    self.min_base_fps
                } else {
                    fps - self.delta_fps
                };
                self.baseline = Some(fps);
                self.floor = Some(floor);
                info!("Encoding checker: base fps={}, exit if fps < {}", fps, floor);
                true
            }
        }
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    pub fn floor(&self) -> Option<f64> {
        self.floor
    }
}

/// Speed validity; a slow first reading gets a lenient floor just under it
#[derive(Debug, Clone)]
pub struct SpeedCheck {
    min_speed: f64,
    delta_speed: f64,
    floor: Option<f64>,
}

impl SpeedCheck {
    pub fn new(min_speed: f64, delta_speed: f64) -> Self {
        Self {
            min_speed,
            delta_speed,
            floor: None,
        }
    }

    pub fn evaluate(&mut self, speed: Option<f64>) -> bool {
        let speed = match speed {
            Some(speed) if speed > 0.0 => speed,
            _ => return false,
        };

        match self.floor {
            Some(floor) => speed >= floor,
            None => {
                let floor = if speed < self.min_speed {
                    speed - self.delta_speed
                } else {
                    self.min_speed
                };
                self.floor = Some(floor);
                info!(
                    "Encoding checker: base speed={}, exit if speed < {}",
                    speed, floor
                );
                true
            }
        }
    }

    pub fn floor(&self) -> Option<f64> {
        self.floor
    }
}

/// Result of one stuck-output observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StuckVerdict {
    /// No output line seen yet
    Waiting,
    Flowing,
    Silent(Duration),
    Stuck(Duration),
}

/// Flags output that stopped advancing
#[derive(Debug, Clone)]
pub struct StuckDetector {
    threshold: Duration,
    last_seen: Option<DateTime<Local>>,
    stuck_since: Option<Instant>,
}

impl StuckDetector {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_seen: None,
            stuck_since: None,
        }
    }

    /// Feed the capture time of the newest output line
    pub fn observe(&mut self, latest: Option<DateTime<Local>>, now: Instant) -> StuckVerdict {
        let Some(latest) = latest else {
            return StuckVerdict::Waiting;
        };

        if self.last_seen != Some(latest) {
            if self.last_seen.is_none() {
                info!(
                    "Stdout stuck check started, exit if stuck > {:?}",
                    self.threshold
                );
            }
            self.last_seen = Some(latest);
            self.stuck_since = None;
            return StuckVerdict::Flowing;
        }

        let since = *self.stuck_since.get_or_insert(now);
        let silent_for = now.saturating_duration_since(since);
        if silent_for > self.threshold {
            StuckVerdict::Stuck(silent_for)
        } else {
            StuckVerdict::Silent(silent_for)
        }
    }
}

/// State of the error window after an observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowState {
    Closed,
    /// Just opened by this observation
    Opened,
    Open(Duration),
    Expired(Duration),
}

/// Tracks how long the encoding has been continuously unhealthy
#[derive(Debug, Clone)]
pub struct ErrorWindow {
    max_error: Duration,
    opened_at: Option<Instant>,
}

impl ErrorWindow {
    pub fn new(max_error: Duration) -> Self {
        Self {
            max_error,
            opened_at: None,
        }
    }

    pub fn record(&mut self, healthy: bool, now: Instant) -> WindowState {
        if healthy {
            self.opened_at = None;
            return WindowState::Closed;
        }

        match self.opened_at {
            None => {
                self.opened_at = Some(now);
                WindowState::Opened
            }
            Some(opened_at) => {
                let open_for = now.saturating_duration_since(opened_at);
                if open_for > self.max_error {
                    WindowState::Expired(open_for)
                } else {
                    WindowState::Open(open_for)
                }
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }
}
