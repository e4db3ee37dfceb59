//! task.rs
//! Resumable cooperative tasks.
//!
//! A task is an explicit state machine: every `resume()` runs from the current
//! suspend point to the next one and returns. The scheduler never interrupts a
//! `resume()`, so one control cycle (encoder read → control law → actuator write
//! → telemetry sample) is atomic with respect to every other task.
//!
//! `ServoTask` lifecycle:
//! Configure ──► Regulate{0} ─yield─► Regulate{1} ─yield─► … ─► Shutdown ─yield─► Configure …
//!                                                                   └─(last run)─► Idle

use log::{debug, info};

use crate::drive::{
    actuator::PwmOutput,
    encoder::{Position, TickCounter},
    servo::{Servo, ServoSnapshot},
};
use crate::error::TaskError;
use crate::scheduling::share::Share;
use crate::telemetry::{
    stream::{NullSink, SampleSink},
    wire::Sample,
};

/// What a task wants after a `resume()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Suspended; resume at the next scheduled invocation.
    Yield,
    /// Finished; never resume again.
    Complete,
}

pub trait CooperativeTask: Send {
    fn name(&self) -> &str;

    /// Runs until the next suspend point. `now_ms` is the dispatch time.
    fn resume(&mut self, now_ms: u64) -> Result<Step, TaskError>;
}

/// Closure-backed task, for small housekeeping loops.
pub struct FnTask<F> {
    name: String,
    body: F,
}

impl<F> FnTask<F>
where
    F: FnMut(u64) -> Result<Step, TaskError> + Send,
{
    pub fn new(name: &str, body: F) -> Self {
        Self {
            name: name.to_string(),
            body,
        }
    }
}

impl<F> CooperativeTask for FnTask<F>
where
    F: FnMut(u64) -> Result<Step, TaskError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn resume(&mut self, now_ms: u64) -> Result<Step, TaskError> {
        (self.body)(now_ms)
    }
}

/// Gain and target applied at the start of every run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoTaskConfig {
    pub kp: f64,
    pub setpoint: Position,
    /// Control cycles per run; `None` regulates forever.
    pub samples_per_run: Option<u64>,
    /// Runs before the task completes; `None` repeats forever.
    pub max_runs: Option<u64>,
}

impl ServoTaskConfig {
    /// Regulates toward `setpoint` indefinitely.
    pub fn hold(kp: f64, setpoint: Position) -> Self {
        Self {
            kp,
            setpoint,
            samples_per_run: None,
            max_runs: None,
        }
    }

    /// One finite test run of `samples` cycles.
    pub fn single_run(kp: f64, setpoint: Position, samples: u64) -> Self {
        Self {
            kp,
            setpoint,
            samples_per_run: Some(samples.max(1)),
            max_runs: Some(1),
        }
    }
}

/// Suspend points of a `ServoTask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoTaskState {
    Configure,
    Regulate { cycle: u64 },
    Shutdown,
    Idle,
}

/// Drives one servo (one encoder + actuator pair) at its scheduled period.
pub struct ServoTask<C: TickCounter, P: PwmOutput, S: SampleSink = NullSink> {
    name: String,
    servo: Servo<C, P>,
    config: ServoTaskConfig,
    sink: S,
    state: ServoTaskState,
    run_start_ms: u64,
    runs_done: u64,
    monitor: Option<Share<ServoSnapshot>>,
}

impl<C: TickCounter, P: PwmOutput> ServoTask<C, P, NullSink> {
    pub fn new(name: &str, servo: Servo<C, P>, config: ServoTaskConfig) -> Self {
        Self {
            name: name.to_string(),
            servo,
            config,
            sink: NullSink,
            state: ServoTaskState::Configure,
            run_start_ms: 0,
            runs_done: 0,
            monitor: None,
        }
    }
}

impl<C: TickCounter, P: PwmOutput, S: SampleSink> ServoTask<C, P, S> {
    /// Streams one sample per control cycle into `sink`.
    pub fn with_sink<S2: SampleSink>(self, sink: S2) -> ServoTask<C, P, S2> {
        ServoTask {
            name: self.name,
            servo: self.servo,
            config: self.config,
            sink,
            state: self.state,
            run_start_ms: self.run_start_ms,
            runs_done: self.runs_done,
            monitor: self.monitor,
        }
    }

    /// Publishes the controller snapshot to `share` after every cycle.
    pub fn with_monitor(mut self, share: Share<ServoSnapshot>) -> Self {
        self.monitor = Some(share);
        self
    }

    pub fn state(&self) -> ServoTaskState {
        self.state
    }

    pub fn runs_done(&self) -> u64 {
        self.runs_done
    }

    pub fn config(&self) -> &ServoTaskConfig {
        &self.config
    }

    pub fn snapshot(&self) -> ServoSnapshot {
        self.servo.snapshot()
    }

    pub fn servo(&self) -> &Servo<C, P> {
        &self.servo
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_parts(self) -> (Servo<C, P>, S) {
        (self.servo, self.sink)
    }

    /// Ends a finite run: sentinel, zero output, re-zero the encoder.
    fn finish_run(&mut self) -> Result<(), TaskError> {
        self.sink.end_run()?;
        self.servo.run(0.0)?;
        self.servo.encoder_mut().zero()?;
        self.runs_done += 1;
        info!("[{}] run {} complete", self.name, self.runs_done);
        Ok(())
    }
}

impl<C, P, S> CooperativeTask for ServoTask<C, P, S>
where
    C: TickCounter + Send,
    P: PwmOutput + Send,
    S: SampleSink + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn resume(&mut self, now_ms: u64) -> Result<Step, TaskError> {
        loop {
            match self.state {
                ServoTaskState::Configure => {
                    self.servo.set_kp(self.config.kp);
                    self.sink.begin_run();
                    self.run_start_ms = now_ms;
                    debug!(
                        "[{}] configured kp={} setpoint={}",
                        self.name, self.config.kp, self.config.setpoint
                    );
                    self.state = ServoTaskState::Regulate { cycle: 0 };
                }
                ServoTaskState::Regulate { cycle } => {
                    self.servo.set_setpoint(self.config.setpoint)?;
                    if let Some(share) = &self.monitor {
                        share.put(self.servo.snapshot());
                    }
                    self.sink.emit(Sample::new(
                        now_ms.saturating_sub(self.run_start_ms),
                        self.servo.position(),
                    ))?;

                    let next = cycle + 1;
                    match self.config.samples_per_run {
                        Some(limit) if next >= limit => self.state = ServoTaskState::Shutdown,
                        _ => {
                            self.state = ServoTaskState::Regulate { cycle: next };
                            return Ok(Step::Yield);
                        }
                    }
                }
                ServoTaskState::Shutdown => {
                    self.finish_run()?;
                    let done = self
                        .config
                        .max_runs
                        .is_some_and(|max| self.runs_done >= max);
                    if done {
                        self.state = ServoTaskState::Idle;
                        return Ok(Step::Complete);
                    }
                    self.state = ServoTaskState::Configure;
                    return Ok(Step::Yield);
                }
                ServoTaskState::Idle => return Ok(Step::Complete),
            }
        }
    }
}
