//! collector.rs
//! Collection-mode telemetry (host side).
//!
//! Reads wire lines until the `End` sentinel and returns the samples in arrival
//! order. Lines that are not samples are dropped and counted; only I/O failures
//! abort collection.

use std::io::BufRead;

use log::{debug, warn};

use crate::error::TelemetryError;
use crate::telemetry::wire::{Line, Sample, parse_line};

/// Outcome of one collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collection {
    pub samples: Vec<Sample>,
    /// Lines without the delimiter (noise).
    pub noise_lines: usize,
    /// Lines with the delimiter whose fields did not parse.
    pub malformed_lines: usize,
    /// `true` if the sentinel was seen, `false` if the input ended first.
    pub terminated: bool,
}

impl Collection {
    pub fn skipped(&self) -> usize {
        self.noise_lines + self.malformed_lines
    }
}

/// Reads `reader` until the sentinel or end of input.
pub fn collect<R: BufRead>(mut reader: R) -> Result<Collection, TelemetryError> {
    let mut out = Collection::default();
    let mut buf = Vec::with_capacity(64);

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            warn!(
                "[Collector] input closed before '{}' ({} samples kept)",
                crate::telemetry::wire::SENTINEL,
                out.samples.len()
            );
            return Ok(out);
        }

        // Serial noise is not always valid UTF-8
        let Ok(text) = std::str::from_utf8(&buf) else {
            out.noise_lines += 1;
            continue;
        };

        match parse_line(text) {
            Line::Sample(sample) => out.samples.push(sample),
            Line::End => {
                out.terminated = true;
                debug!(
                    "[Collector] sentinel after {} samples, {} lines skipped",
                    out.samples.len(),
                    out.skipped()
                );
                return Ok(out);
            }
            Line::Malformed => {
                out.malformed_lines += 1;
                debug!("[Collector] malformed line skipped: {:?}", text.trim());
            }
            Line::Noise => out.noise_lines += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn garbage_lines_are_dropped() {
        let input = "0,0\n10,5\ngarbage\n20,9\nEnd\n";
        let got = collect(Cursor::new(input)).unwrap();

        let pairs: Vec<(u64, i64)> = got.samples.iter().map(|s| (s.timestamp_ms, s.position)).collect();
        assert_eq!(pairs, vec![(0, 0), (10, 5), (20, 9)]);
        assert_eq!(got.noise_lines, 1);
        assert!(got.terminated);
    }

    #[test]
    fn stops_reading_at_sentinel() {
        let input = "0,1\nEnd\n10,2\n";
        let mut cursor = Cursor::new(input);
        let got = collect(&mut cursor).unwrap();
        assert_eq!(got.samples, vec![Sample::new(0, 1)]);

        let mut rest = String::new();
        std::io::Read::read_to_string(&mut cursor, &mut rest).unwrap();
        assert_eq!(rest, "10,2\n");
    }

    #[test]
    fn malformed_samples_do_not_abort() {
        let input: &[u8] = b"0,0\r\n5,abc\r\n\xff\xfe,1\r\n10,4\r\nEnd\r\n";
        let got = collect(Cursor::new(input)).unwrap();
        assert_eq!(got.samples, vec![Sample::new(0, 0), Sample::new(10, 4)]);
        assert_eq!(got.malformed_lines, 1);
        assert_eq!(got.noise_lines, 1);
    }

    #[test]
    fn unterminated_input_returns_partial_collection() {
        let got = collect(Cursor::new("0,0\n10,3\n")).unwrap();
        assert_eq!(got.samples.len(), 2);
        assert!(!got.terminated);
    }
}
