//! wire.rs
//! Line encoding and decoding for the telemetry stream and the host interval command.

use serde::{Deserialize, Serialize};

use crate::drive::encoder::Position;
use crate::error::TelemetryError;

pub const DELIMITER: char = ',';
pub const SENTINEL: &str = "End";

/// One timestamped position sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the start of the sampling run.
    pub timestamp_ms: u64,
    /// Encoder position in ticks.
    pub position: Position,
}

impl Sample {
    pub fn new(timestamp_ms: u64, position: Position) -> Self {
        Self {
            timestamp_ms,
            position,
        }
    }

    /// Wire form without the trailing newline.
    pub fn to_line(&self) -> String {
        format!("{}{}{}", self.timestamp_ms, DELIMITER, self.position)
    }
}

/// Classification of one received line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Sample(Sample),
    End,
    /// Has the delimiter but fields did not parse.
    Malformed,
    /// Neither a sample nor the sentinel.
    Noise,
}

/// Classifies a received line. Surrounding whitespace and `\r` are ignored.
pub fn parse_line(raw: &str) -> Line {
    let line = raw.trim();
    if line == SENTINEL {
        return Line::End;
    }

    let Some((ts, pos)) = line.split_once(DELIMITER) else {
        return Line::Noise;
    };

    match (parse_timestamp(ts.trim()), pos.trim().parse::<Position>()) {
        (Some(timestamp_ms), Ok(position)) => Line::Sample(Sample::new(timestamp_ms, position)),
        _ => Line::Malformed,
    }
}

/// Whole milliseconds; fractional values (`"10.0"`) are rounded.
fn parse_timestamp(field: &str) -> Option<u64> {
    if let Ok(ms) = field.parse::<u64>() {
        return Some(ms);
    }
    let ms = field.parse::<f64>().ok()?;
    (ms.is_finite() && ms >= 0.0).then(|| ms.round() as u64)
}

/// Host → device command selecting the sampling interval.
pub fn format_interval_command(interval_ms: u64) -> String {
    format!("{}\r\n", interval_ms)
}

/// Parses the interval command; zero and non-numeric input are rejected.
pub fn parse_interval_command(line: &str) -> Result<u64, TelemetryError> {
    let trimmed = line.trim();
    match trimmed.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(ms),
        _ => Err(TelemetryError::InvalidInterval(trimmed.to_string())),
    }
}
