use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Monitor lifecycle; there is no way back from `Terminal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    WarmingUp,
    ObservingProcess,
    ObservingEncoding,
    Terminal,
}

impl fmt::Display for MonitorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorPhase::WarmingUp => "warming up",
            MonitorPhase::ObservingProcess => "observing process",
            MonitorPhase::ObservingEncoding => "observing encoding",
            MonitorPhase::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// Why the wrapper is shutting down
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    /// Encoder is gone or exited with status 0
    Finished,
    /// Encoder exited with a non-zero status or was killed by a signal
    Crashed { code: Option<i32> },
    /// No new output line for longer than the stuck threshold
    StdoutStuck { silent_for: Duration },
    /// Both fps and speed stayed invalid for longer than the error threshold
    EncodingDegraded {
        fps: Option<f64>,
        speed: Option<f64>,
        stale: bool,
    },
    /// Termination signal received by the wrapper
    Signal(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Finished => write!(f, "encoder finished"),
            ShutdownReason::Crashed { code: Some(code) } => {
                write!(f, "encoder crashed with exit code {}", code)
            }
            ShutdownReason::Crashed { code: None } => write!(f, "encoder killed by signal"),
            ShutdownReason::StdoutStuck { silent_for } => {
                write!(f, "encoder output stuck for {:.1}s", silent_for.as_secs_f64())
            }
            ShutdownReason::EncodingDegraded { fps, speed, stale } => write!(
                f,
                "encoding degraded (fps={}, speed={}{})",
                fmt_metric(*fps),
                fmt_metric(*speed),
                if *stale { ", progress stale" } else { "" }
            ),
            ShutdownReason::Signal(name) => write!(f, "received {}", name),
        }
    }
}

fn fmt_metric(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{:.2}", v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_display() {
        let reason = ShutdownReason::EncodingDegraded {
            fps: Some(3.5),
            speed: None,
            stale: true,
        };
        assert_eq!(
            reason.to_string(),
            "encoding degraded (fps=3.50, speed=N/A, progress stale)"
        );
        assert_eq!(
            ShutdownReason::Crashed { code: Some(139) }.to_string(),
            "encoder crashed with exit code 139"
        );
    }
}
