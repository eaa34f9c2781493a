use crate::error::ProgressError;
use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Parsed key/value view of the latest reassembled progress record
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    captured_at: DateTime<Local>,
    raw: String,
    fields: BTreeMap<String, String>,
}

impl ProgressSnapshot {
    /// Parse a composite record such as `frame=10 fps=25.0 speed=1.0x progress=continue`
    ///
    /// Tokens are split on single spaces, then at the first `=`. A token with
    /// no `=` fails the whole record.
    pub fn parse(raw: &str, captured_at: DateTime<Local>) -> Result<Self, ProgressError> {
        let mut fields = BTreeMap::new();

        for token in raw.split(' ').filter(|token| !token.is_empty()) {
            let (key, value) =
                token
                    .split_once('=')
                    .ok_or_else(|| ProgressError::MalformedField {
                        field: token.to_string(),
                    })?;
            fields.insert(key.to_string(), value.to_string());
        }

        Ok(Self {
            captured_at,
            raw: raw.to_string(),
            fields,
        })
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    /// The composite line this snapshot was parsed from
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Frames per second, `None` when missing or not a number
    pub fn fps(&self) -> Option<f64> {
        self.get("fps").and_then(|value| value.parse::<f64>().ok())
    }

    /// Speed multiplier, `None` when missing or `N/A`
    pub fn speed(&self) -> Option<f64> {
        self.get("speed").and_then(parse_speed)
    }

    pub fn frame(&self) -> Option<u64> {
        self.get("frame").and_then(|value| value.parse().ok())
    }

    pub fn bitrate(&self) -> Option<&str> {
        self.get("bitrate")
    }

    /// `progress=end` marks the last record of a run
    pub fn is_final(&self) -> bool {
        self.get("progress") == Some("end")
    }
}

/// Parse a speed multiplier like `1.02x`
pub fn parse_speed(value: &str) -> Option<f64> {
    let value = value.trim();
    let number = value.strip_suffix('x').unwrap_or(value);
    number.parse::<f64>().ok().filter(|speed| speed.is_finite())
}

/// Single-writer register holding only the latest snapshot
#[derive(Debug, Default)]
pub struct SnapshotSlot {
    current: RwLock<Option<Arc<ProgressSnapshot>>>,
}

impl SnapshotSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published snapshot wholesale
    pub fn publish(&self, snapshot: ProgressSnapshot) {
        *self.current.write() = Some(Arc::new(snapshot));
    }

    pub fn latest(&self) -> Option<Arc<ProgressSnapshot>> {
        self.current.read().clone()
    }
}
