use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

/// Timestamp layout used by log files and the query interface
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One captured line of telemetry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimestampedLine {
    /// Wall-clock capture time
    pub captured_at: DateTime<Local>,
    /// Raw payload, already trimmed
    pub line: String,
}

impl TimestampedLine {
    pub fn new(line: impl Into<String>) -> Self {
        Self::at(Local::now(), line)
    }

    pub fn at(captured_at: DateTime<Local>, line: impl Into<String>) -> Self {
        Self {
            captured_at,
            line: line.into(),
        }
    }

    /// Capture time rendered with [`TIMESTAMP_FORMAT`]
    pub fn formatted_time(&self) -> String {
        self.captured_at.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Age of the record in milliseconds
    pub fn age_ms(&self) -> i64 {
        (Local::now() - self.captured_at).num_milliseconds()
    }
}

impl fmt::Display for TimestampedLine {
    /// `<2024-01-01 12:00:00> line`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> {}", self.formatted_time(), self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_display_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 1, 8, 5, 9).unwrap();
        let record = TimestampedLine::at(at, "frame=10 fps=25.0");
        assert_eq!(record.to_string(), "<2024-03-01 08:05:09> frame=10 fps=25.0");
        assert_eq!(record.formatted_time(), "2024-03-01 08:05:09");
    }

    #[test]
    fn test_new_uses_current_time() {
        let record = TimestampedLine::new("hello");
        assert!(record.age_ms() >= 0);
        assert!(record.age_ms() < 5_000);
    }
}
