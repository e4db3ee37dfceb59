//! Event recording and response statistics.
//!
//! - **EventRecorder:** lock-free queue (16K capacity) → background CSV export.
//!   The scheduler records one event per dispatch, completion and fault.
//! - **ResponseStats:** min / max / mean / overshoot of a collected step response.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_queue::ArrayQueue;
use log::{error, info};

use crate::drive::encoder::Position;
use crate::telemetry::wire::Sample;

/// Scheduler lifecycle events. Timestamps are scheduler milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A task was resumed.
    TaskDispatch { task: u32, ts_ms: u64, run: u64 },
    /// A task returned `Step::Complete`.
    TaskComplete { task: u32, ts_ms: u64 },
    /// A task returned an error and was taken out of the schedule.
    TaskFault { task: u32, ts_ms: u64, reason: String },
}

impl Event {
    /// CSV row: task,event,ts_ms,detail
    pub fn to_csv_row(&self) -> String {
        match self {
            Event::TaskDispatch { task, ts_ms, run } => {
                format!("{},TaskDispatch,{},{}", task, ts_ms, run)
            }
            Event::TaskComplete { task, ts_ms } => {
                format!("{},TaskComplete,{},", task, ts_ms)
            }
            Event::TaskFault { task, ts_ms, reason } => {
                format!("{},TaskFault,{},\"{}\"", task, ts_ms, reason.replace('"', "'"))
            }
        }
    }
}

const EVENT_QUEUE_CAPACITY: usize = 16_384;

/// Non-blocking event recorder.
///
/// `record()` never blocks the dispatch loop; events beyond capacity are dropped
/// and counted.
#[derive(Clone)]
pub struct EventRecorder {
    queue: Arc<ArrayQueue<Event>>,
    dropped: Arc<AtomicU64>,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    #[inline]
    pub fn record(&self, event: Event) {
        if self.queue.push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Takes every queued event.
    pub fn drain(&self) -> Vec<Event> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    /// Spawns a thread draining the queue into `output_csv` until the queue
    /// stays empty and every other recorder handle has been dropped.
    pub fn start_exporter(&self, output_csv: PathBuf) -> thread::JoinHandle<usize> {
        let queue = self.queue.clone();

        thread::spawn(move || {
            let file = match File::create(&output_csv) {
                Ok(file) => file,
                Err(e) => {
                    error!("Failed to create event CSV {}: {}", output_csv.display(), e);
                    return 0;
                }
            };
            let mut writer = BufWriter::new(file);
            let _ = writeln!(writer, "task,event,ts_ms,detail");

            let mut written = 0;
            loop {
                match queue.pop() {
                    Some(event) => {
                        let _ = writeln!(writer, "{}", event.to_csv_row());
                        written += 1;
                    }
                    None => {
                        if Arc::strong_count(&queue) == 1 && queue.is_empty() {
                            break;
                        }
                        thread::sleep(Duration::from_millis(10));
                    }
                }
            }

            let _ = writer.flush();
            info!("[EventRecorder] {} events written to {}", written, output_csv.display());
            written
        })
    }
}

/// Summary of one step response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseStats {
    pub min: Position,
    pub max: Position,
    pub mean: f64,
    pub count: usize,
    pub final_position: Position,
    /// Travel past the setpoint in the direction of motion, in ticks (0 if none).
    pub overshoot: Position,
    /// `setpoint - final_position`.
    pub final_error: i64,
}

impl ResponseStats {
    pub fn from_samples(samples: &[Sample], setpoint: Position) -> Option<Self> {
        let last = samples.last()?;
        let count = samples.len();
        let min = samples.iter().map(|s| s.position).min()?;
        let max = samples.iter().map(|s| s.position).max()?;
        let mean = samples.iter().map(|s| s.position as f64).sum::<f64>() / count as f64;

        let overshoot = if setpoint >= 0 {
            (max - setpoint).max(0)
        } else {
            (setpoint - min).max(0)
        };

        Some(Self {
            min,
            max,
            mean,
            count,
            final_position: last.position,
            overshoot,
            final_error: setpoint - last.position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_counts_overflow() {
        let rec = EventRecorder::with_capacity(2);
        for run in 0..3 {
            rec.record(Event::TaskDispatch { task: 0, ts_ms: run * 10, run });
        }
        assert_eq!(rec.dropped(), 1);
        assert_eq!(rec.drain().len(), 2);
    }

    #[test]
    fn exporter_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        let rec = EventRecorder::new();
        rec.record(Event::TaskDispatch { task: 1, ts_ms: 0, run: 1 });
        rec.record(Event::TaskFault {
            task: 1,
            ts_ms: 10,
            reason: "actuator write failed".into(),
        });

        let handle = rec.start_exporter(path.clone());
        drop(rec);
        assert_eq!(handle.join().unwrap(), 2);

        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "task,event,ts_ms,detail");
        assert_eq!(lines[1], "1,TaskDispatch,0,1");
        assert_eq!(lines[2], "1,TaskFault,10,\"actuator write failed\"");
    }

    #[test]
    fn response_stats_for_positive_step() {
        let samples = vec![
            Sample::new(0, 0),
            Sample::new(10, 800),
            Sample::new(20, 1_050),
            Sample::new(30, 990),
        ];
        let stats = ResponseStats::from_samples(&samples, 1_000).unwrap();
        assert_eq!(stats.overshoot, 50);
        assert_eq!(stats.final_error, 10);
        assert_eq!(stats.max, 1_050);
        assert_eq!(stats.count, 4);
    }

    #[test]
    fn response_stats_for_negative_step() {
        let samples = vec![Sample::new(0, 0), Sample::new(10, -1_020), Sample::new(20, -1_000)];
        let stats = ResponseStats::from_samples(&samples, -1_000).unwrap();
        assert_eq!(stats.overshoot, 20);
        assert_eq!(stats.final_error, 0);
        assert!(ResponseStats::from_samples(&[], 5).is_none());
    }
}
