//! scheduler.rs
//! Priority-ordered, period-gated dispatch of cooperative tasks.
//!
//! - The scheduler object owns the task table (`TaskId` → task + bookkeeping).
//! - One pass (`run_pass`) visits tasks by priority (higher value first, ties in
//!   registration order) and resumes each due task exactly once.
//! - A task that returns `Err` is marked `Faulted` and never resumed; the pass goes on.
//! - `RealTimeRunner` drives passes against wall time on a max-priority thread.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::error::SchedulerError;
use crate::scheduling::{
    clock::{Clock, SimClock},
    task::{CooperativeTask, Step},
};
use crate::utils::metrics::{Event, EventRecorder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u32);

impl TaskId {
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    /// Returned `Step::Complete`.
    Finished,
    /// Returned an error; holds its message.
    Faulted(String),
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Ready => f.write_str("ready"),
            TaskState::Finished => f.write_str("finished"),
            TaskState::Faulted(_) => f.write_str("FAULTED"),
        }
    }
}

/// Bookkeeping for one registered task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStats {
    pub name: String,
    pub priority: u8,
    pub period_ms: u64,
    pub next_due_ms: u64,
    pub state: TaskState,
    pub runs: u64,
    /// Dispatches that happened one full period or more after they were due.
    pub late: u64,
    pub last_run_ms: Option<u64>,
}

struct Registered {
    task: Box<dyn CooperativeTask>,
    stats: TaskStats,
}

/// What one pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Tasks resumed, in dispatch order.
    pub ran: Vec<TaskId>,
    pub completed: Vec<TaskId>,
    pub faulted: Vec<(TaskId, String)>,
}

impl PassReport {
    pub fn is_empty(&self) -> bool {
        self.ran.is_empty()
    }
}

pub struct Scheduler {
    tasks: BTreeMap<TaskId, Registered>,
    next_id: u32,
    recorder: Option<EventRecorder>,
    running: Arc<AtomicBool>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            next_id: 0,
            recorder: None,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Records one event per dispatch, fault and completion.
    pub fn with_recorder(mut self, recorder: EventRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Makes `task` eligible every `period_ms`, first at `now_ms`.
    pub fn register(
        &mut self,
        task: Box<dyn CooperativeTask>,
        priority: u8,
        period_ms: u64,
        now_ms: u64,
    ) -> Result<TaskId, SchedulerError> {
        let name = task.name().to_string();
        if period_ms == 0 {
            return Err(SchedulerError::ZeroPeriod(name));
        }

        let id = TaskId(self.next_id);
        self.next_id += 1;
        info!("[Scheduler] registered {} '{}' priority={} period={}ms", id, name, priority, period_ms);

        self.tasks.insert(
            id,
            Registered {
                task,
                stats: TaskStats {
                    name,
                    priority,
                    period_ms,
                    next_due_ms: now_ms,
                    state: TaskState::Ready,
                    runs: 0,
                    late: 0,
                    last_run_ms: None,
                },
            },
        );
        Ok(id)
    }

    /// Takes a task out of the schedule. It is between resumes, so it stops at its yield point.
    pub fn remove(&mut self, id: TaskId) -> Result<Box<dyn CooperativeTask>, SchedulerError> {
        let entry = self.tasks.remove(&id).ok_or(SchedulerError::UnknownTask(id))?;
        info!("[Scheduler] removed {} '{}'", id, entry.stats.name);
        Ok(entry.task)
    }

    /// Ready task ids in dispatch order.
    fn dispatch_order(&self) -> Vec<TaskId> {
        let mut order: Vec<(u8, TaskId)> = self
            .tasks
            .iter()
            .filter(|(_, r)| r.stats.state == TaskState::Ready)
            .map(|(id, r)| (r.stats.priority, *id))
            .collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        order.into_iter().map(|(_, id)| id).collect()
    }

    /// Resumes every task due at `now_ms` once, highest priority first.
    pub fn run_pass(&mut self, now_ms: u64) -> PassReport {
        let mut report = PassReport::default();

        for id in self.dispatch_order() {
            let Some(entry) = self.tasks.get_mut(&id) else {
                continue;
            };
            let stats = &mut entry.stats;
            if now_ms < stats.next_due_ms {
                continue;
            }

            let outcome = entry.task.resume(now_ms);
            stats.runs += 1;
            stats.last_run_ms = Some(now_ms);
            report.ran.push(id);

            stats.next_due_ms += stats.period_ms;
            if stats.next_due_ms <= now_ms {
                stats.late += 1;
                warn!(
                    "[Scheduler] '{}' dispatched late at {} ms, re-based",
                    stats.name, now_ms
                );
                stats.next_due_ms = now_ms + stats.period_ms;
            }

            if let Some(rec) = &self.recorder {
                rec.record(Event::TaskDispatch {
                    task: id.index(),
                    ts_ms: now_ms,
                    run: stats.runs,
                });
            }

            match outcome {
                Ok(Step::Yield) => {}
                Ok(Step::Complete) => {
                    stats.state = TaskState::Finished;
                    info!("[Scheduler] '{}' finished after {} runs", stats.name, stats.runs);
                    report.completed.push(id);
                    if let Some(rec) = &self.recorder {
                        rec.record(Event::TaskComplete {
                            task: id.index(),
                            ts_ms: now_ms,
                        });
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    error!("[Scheduler] '{}' faulted: {}", stats.name, message);
                    stats.state = TaskState::Faulted(message.clone());
                    if let Some(rec) = &self.recorder {
                        rec.record(Event::TaskFault {
                            task: id.index(),
                            ts_ms: now_ms,
                            reason: message.clone(),
                        });
                    }
                    report.faulted.push((id, message));
                }
            }
        }

        if !report.is_empty() {
            debug!("[Scheduler] pass at {} ms ran {} task(s)", now_ms, report.ran.len());
        }
        report
    }

    /// Earliest due time among ready tasks.
    pub fn next_due(&self) -> Option<u64> {
        self.tasks
            .values()
            .filter(|r| r.stats.state == TaskState::Ready)
            .map(|r| r.stats.next_due_ms)
            .min()
    }

    /// No ready task left.
    pub fn is_idle(&self) -> bool {
        self.next_due().is_none()
    }

    pub fn stats(&self, id: TaskId) -> Result<&TaskStats, SchedulerError> {
        self.tasks
            .get(&id)
            .map(|r| &r.stats)
            .ok_or(SchedulerError::UnknownTask(id))
    }

    pub fn state(&self, id: TaskId) -> Result<&TaskState, SchedulerError> {
        self.stats(id).map(|s| &s.state)
    }

    /// Faulted tasks with their error messages.
    pub fn faults(&self) -> Vec<(TaskId, String)> {
        self.tasks
            .iter()
            .filter_map(|(id, r)| match &r.stats.state {
                TaskState::Faulted(msg) => Some((*id, msg.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Flag that keeps `run_until_stopped` / `RealTimeRunner` looping.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Drives passes on a simulated clock for `duration_ms`, jumping straight to
    /// each next due time. Returns the number of passes that ran something.
    pub fn run_for(&mut self, clock: &SimClock, duration_ms: u64) -> u64 {
        let end = clock.now_ms() + duration_ms;
        let mut passes = 0;
        while let Some(due) = self.next_due() {
            let now = clock.now_ms().max(due);
            if now >= end {
                break;
            }
            clock.set(now);
            if !self.run_pass(now).is_empty() {
                passes += 1;
            }
        }
        clock.set(end.max(clock.now_ms()));
        passes
    }

    /// Drives passes on a simulated clock until no ready task is left.
    /// Never returns if some task yields forever.
    pub fn run_until_idle(&mut self, clock: &SimClock) -> u64 {
        let mut passes = 0;
        while let Some(due) = self.next_due() {
            let now = clock.now_ms().max(due);
            clock.set(now);
            if !self.run_pass(now).is_empty() {
                passes += 1;
            }
        }
        passes
    }

    /// Blocks, dispatching against `clock` until stopped or idle.
    pub fn run_until_stopped<C: Clock>(&mut self, clock: &C) {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);

        while self.running.load(Ordering::Acquire) {
            let Some(due) = self.next_due() else {
                info!("[Scheduler] no ready tasks left");
                break;
            };
            let now = clock.now_ms();
            if now < due {
                sleeper.sleep(Duration::from_millis(due - now));
                continue;
            }
            self.run_pass(now);
        }
    }
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<8} {:<16} {:>4} {:>8} {:>8} {:>6}  {}",
            "id", "task", "pri", "period", "runs", "late", "state"
        )?;
        for (id, r) in &self.tasks {
            let s = &r.stats;
            writeln!(
                f,
                "{:<8} {:<16} {:>4} {:>6}ms {:>8} {:>6}  {}",
                id.to_string(),
                s.name,
                s.priority,
                s.period_ms,
                s.runs,
                s.late,
                s.state
            )?;
        }
        Ok(())
    }
}

/// Runs a `Scheduler` on its own thread against wall time.
pub struct RealTimeRunner {
    handle: JoinHandle<Scheduler>,
    running: Arc<AtomicBool>,
}

impl RealTimeRunner {
    /// Spawns the dispatch thread at max OS priority (best effort), optionally
    /// pinned to `core`.
    pub fn spawn<C>(scheduler: Scheduler, clock: C, core: Option<usize>) -> std::io::Result<Self>
    where
        C: Clock + 'static,
    {
        let running = scheduler.stop_handle();
        let handle = thread::Builder::new()
            .name("scheduler".to_string())
            .spawn_with_priority(ThreadPriority::Max, move |prio| {
                if let Err(e) = prio {
                    warn!("[Scheduler] could not raise thread priority: {:?}", e);
                }
                if let Some(index) = core {
                    pin_to_core(index);
                }
                let mut scheduler = scheduler;
                scheduler.run_until_stopped(&clock);
                scheduler
            })?;
        Ok(Self { handle, running })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the dispatch thread and hands the scheduler back.
    pub fn join(self) -> thread::Result<Scheduler> {
        self.handle.join()
    }
}

fn pin_to_core(index: usize) {
    let cores = core_affinity::get_core_ids().unwrap_or_default();
    match cores.get(index).or_else(|| cores.first()) {
        Some(core) if core_affinity::set_for_current(*core) => {
            info!("[Scheduler] pinned to core {:?}", core);
        }
        _ => warn!("[Scheduler] failed to set affinity to core {}", index),
    }
}
