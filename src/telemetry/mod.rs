//! Telemetry: device → host position stream.
//!
//! Wire format (ASCII, newline-delimited):
//! - one sample per line: `<timestamp_ms>,<position_ticks>`
//! - end of run: a line containing exactly `End`
//! - host → device before a run: `<interval_ms>` on its own line
//!
//! No checksum or framing beyond newlines; anything else on the line is noise.

pub mod collector;
pub mod stream;
pub mod wire;
