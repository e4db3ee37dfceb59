//! stream.rs
//! Streaming-mode telemetry sinks (device side).
//!
//! - `LineStream`: writes each sample as a wire line and flushes immediately.
//! - `TaskQueue<Frame>`: hands samples to another task through a shared queue.
//! - `NullSink`: control task without telemetry.
//!
//! Samples leave in the order they are emitted; nothing is batched or deduplicated.

use std::io::Write;

use log::{debug, warn};

use crate::error::TelemetryError;
use crate::scheduling::share::TaskQueue;
use crate::telemetry::wire::{SENTINEL, Sample};

pub trait SampleSink {
    /// Called before the first sample of a run.
    fn begin_run(&mut self) {}

    fn emit(&mut self, sample: Sample) -> Result<(), TelemetryError>;

    /// Marks the end of a run (the `End` sentinel on a line stream).
    fn end_run(&mut self) -> Result<(), TelemetryError>;
}

impl<S: SampleSink + ?Sized> SampleSink for Box<S> {
    fn begin_run(&mut self) {
        (**self).begin_run()
    }

    fn emit(&mut self, sample: Sample) -> Result<(), TelemetryError> {
        (**self).emit(sample)
    }

    fn end_run(&mut self) -> Result<(), TelemetryError> {
        (**self).end_run()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl SampleSink for NullSink {
    fn emit(&mut self, _: Sample) -> Result<(), TelemetryError> {
        Ok(())
    }

    fn end_run(&mut self) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Line-protocol writer that also keeps the current run's samples.
pub struct LineStream<W: Write> {
    writer: W,
    samples: Vec<Sample>,
    runs_completed: u64,
}

impl<W: Write> LineStream<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            samples: Vec::new(),
            runs_completed: 0,
        }
    }

    /// Samples emitted since the current (or last) run began.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> SampleSink for LineStream<W> {
    fn begin_run(&mut self) {
        self.samples.clear();
    }

    fn emit(&mut self, sample: Sample) -> Result<(), TelemetryError> {
        writeln!(self.writer, "{}", sample.to_line())?;
        self.writer.flush()?;
        self.samples.push(sample);
        Ok(())
    }

    fn end_run(&mut self) -> Result<(), TelemetryError> {
        writeln!(self.writer, "{}", SENTINEL)?;
        self.writer.flush()?;
        self.runs_completed += 1;
        debug!("[LineStream] run {} ended after {} samples", self.runs_completed, self.samples.len());
        Ok(())
    }
}

/// Unit passed through a telemetry queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Sample(Sample),
    End,
}

impl SampleSink for TaskQueue<Frame> {
    fn emit(&mut self, sample: Sample) -> Result<(), TelemetryError> {
        if !self.put(Frame::Sample(sample)) {
            warn!("[{}] telemetry queue full, sample at {} ms lost", self.name(), sample.timestamp_ms);
        }
        Ok(())
    }

    /// A lost sample is only a gap, but a lost `End` would merge this run into
    /// the next one on the reader's side, so a rejecting queue fails the task.
    /// An overwriting queue always admits the marker.
    fn end_run(&mut self) -> Result<(), TelemetryError> {
        if !self.put(Frame::End) && !self.overwrites() {
            return Err(TelemetryError::QueueFull(self.name().to_string()));
        }
        Ok(())
    }
}

/// Writes queued frames to `writer` as wire lines. Returns how many frames were written.
pub fn forward_frames<W: Write>(queue: &TaskQueue<Frame>, writer: &mut W) -> Result<usize, TelemetryError> {
    let mut written = 0;
    while let Some(frame) = queue.get() {
        match frame {
            Frame::Sample(sample) => writeln!(writer, "{}", sample.to_line())?,
            Frame::End => writeln!(writer, "{}", SENTINEL)?,
        }
        written += 1;
    }
    if written > 0 {
        writer.flush()?;
    }
    Ok(written)
}
