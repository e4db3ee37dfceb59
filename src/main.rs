//! # Servo Controller Entry Point
//!
//! Device side of the step-response test bench. Position control loops run as
//! cooperative tasks on a single scheduler; each loop drives one simulated
//! motor axis (quadrature counter + H-bridge).
//!
//! ## Modes
//! - **Step test:** reads the sampling interval (ms) from the host, runs one
//!   5 s step toward the setpoint and streams `<ms>,<ticks>` lines to stdout,
//!   then `End`. The axis is stopped and re-zeroed between runs. Kp and the
//!   setpoint come from the config unless overridden (`--kp` / `--setpoint`
//!   on `stream`, or the prompts in the menu).
//! - **Two-axis demo:** two loops (+100000 / -150000 ticks) share the
//!   scheduler for a fixed number of cycles; prints a per-axis summary.
//!
//! `servo_rts stream` runs step tests back-to-back for every interval line on
//! stdin (what `host_plot` drives). Without a subcommand an interactive menu is
//! shown.
//!
//! ## Output
//! - stdout: telemetry lines only (step test) or the summary (demo).
//! - stderr: logs (`RUST_LOG=info` / `debug`), prompts, scheduler table.

use std::{
    fmt,
    io::{BufRead, Write, stdin, stdout},
    path::PathBuf,
    str::FromStr,
    sync::Arc,
};

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use servo_rts::{
    Actuator, Clock, Encoder, MonotonicClock, Position, RunConfig, Servo, SimClock,
    config::parse_override,
    scheduling::{
        scheduler::{RealTimeRunner, Scheduler},
        share::{Share, TaskQueue},
        task::{ServoTask, ServoTaskConfig},
    },
    sim::motor::{MotorParams, SimCounter, SimMotor, SimPwm},
    telemetry::{
        stream::{Frame, LineStream},
        wire::{Sample, parse_interval_command},
    },
    utils::{
        export::{Series, plot_responses_svg, write_samples_csv},
        metrics::{EventRecorder, ResponseStats},
    },
};

const DEMO_SETPOINTS: [Position; 2] = [100_000, -150_000];
const DEFAULT_DEMO_CYCLES: u64 = 500;

#[derive(Parser)]
#[command(name = "servo_rts", about = "Cooperative proportional servo control bench")]
struct Cli {
    /// TOML run configuration (defaults apply when omitted).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pace the scheduler against wall time instead of a simulated clock.
    #[arg(long)]
    realtime: bool,

    /// Core to pin the scheduler thread to (real-time mode only).
    #[arg(long)]
    core: Option<usize>,

    /// Write scheduler events to this CSV file.
    #[arg(long)]
    events: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Subcommand)]
enum Mode {
    /// Run one step test per interval line read from stdin.
    Stream {
        /// Proportional gain for every run (config value when omitted).
        #[arg(long)]
        kp: Option<f64>,
        /// Target position in ticks for every run (config value when omitted).
        #[arg(long, allow_hyphen_values = true)]
        setpoint: Option<Position>,
    },
    /// Run the two-axis demo.
    Demo {
        #[arg(long, default_value_t = DEFAULT_DEMO_CYCLES)]
        cycles: u64,
        /// Directory for per-axis CSV files and the response plot.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// Simulated hardware plus the clock everything runs on.
struct Bench {
    config: RunConfig,
    clock: Arc<dyn Clock>,
    sim_clock: Option<SimClock>,
    core: Option<usize>,
    recorder: Option<EventRecorder>,
    axes: Vec<SimMotor>,
}

impl Bench {
    fn new(config: RunConfig, realtime: bool, core: Option<usize>) -> Self {
        let (clock, sim_clock): (Arc<dyn Clock>, Option<SimClock>) = if realtime {
            (Arc::new(MonotonicClock::new()), None)
        } else {
            let sim = SimClock::new();
            (Arc::new(sim.clone()), Some(sim))
        };

        let params = MotorParams {
            counter_bits: config.counter_bits,
            ..MotorParams::default()
        };
        let axes = (0..DEMO_SETPOINTS.len())
            .map(|_| SimMotor::new(params, clock.clone()))
            .collect();

        Self {
            config,
            clock,
            sim_clock,
            core,
            recorder: None,
            axes,
        }
    }

    fn servo(&self, axis: usize) -> anyhow::Result<Servo<SimCounter, SimPwm>> {
        let motor = self
            .axes
            .get(axis)
            .ok_or_else(|| anyhow!("no axis {}", axis))?;
        let (counter, pwm) = motor
            .take_hardware()
            .ok_or_else(|| anyhow!("axis {} hardware is already in use", axis))?;
        let encoder = Encoder::new(counter)?;
        let actuator = Actuator::with_limit(pwm, self.config.duty_limit);
        Ok(Servo::new(actuator, encoder))
    }

    fn scheduler(&self) -> Scheduler {
        match &self.recorder {
            Some(rec) => Scheduler::new().with_recorder(rec.clone()),
            None => Scheduler::new(),
        }
    }

    /// Runs `scheduler` until every task has finished or faulted.
    fn drive(&self, scheduler: Scheduler) -> anyhow::Result<Scheduler> {
        match &self.sim_clock {
            Some(sim) => {
                let mut scheduler = scheduler;
                scheduler.run_until_idle(sim);
                Ok(scheduler)
            }
            None => RealTimeRunner::spawn(scheduler, self.clock.clone(), self.core)
                .context("failed to spawn scheduler thread")?
                .join()
                .map_err(|_| anyhow!("scheduler thread panicked")),
        }
    }

    /// One step test on axis 0 with `run`'s gain and setpoint, streamed to stdout.
    fn step_test(&self, run: &RunConfig, interval_ms: u64) -> anyhow::Result<()> {
        let task_config = run.test_run(interval_ms);
        info!(
            "[Bench] step test: kp={} setpoint={} interval={}ms samples={:?}",
            task_config.kp, task_config.setpoint, interval_ms, task_config.samples_per_run
        );

        let task = ServoTask::new("axis_1", self.servo(0)?, task_config).with_sink(LineStream::new(stdout()));
        let mut scheduler = self.scheduler();
        scheduler.register(Box::new(task), self.config.priority, interval_ms, self.clock.now_ms())?;

        let scheduler = self.drive(scheduler)?;
        eprint!("{}", scheduler);
        report_faults(&scheduler)
    }

    /// Two axes regulating toward opposite setpoints on one scheduler.
    fn demo(&self, cycles: u64, out: Option<&PathBuf>) -> anyhow::Result<()> {
        let interval_ms = self.config.interval_ms;
        let mut scheduler = self.scheduler();
        let mut queues = Vec::new();
        let mut monitors = Vec::new();

        for (axis, setpoint) in DEMO_SETPOINTS.iter().enumerate() {
            let name = format!("axis_{}", axis + 1);
            let queue: TaskQueue<Frame> = TaskQueue::new(&name, cycles as usize + 1, false);
            let config = ServoTaskConfig {
                kp: self.config.kp,
                setpoint: *setpoint,
                samples_per_run: Some(cycles.max(1)),
                max_runs: Some(1),
            };
            let servo = self.servo(axis)?;
            let monitor = Share::new(&format!("{}.snapshot", name), servo.snapshot());
            let task = ServoTask::new(&name, servo, config)
                .with_sink(queue.clone())
                .with_monitor(monitor.clone());
            scheduler.register(Box::new(task), self.config.priority, interval_ms, self.clock.now_ms())?;
            monitors.push(monitor);
            queues.push((name, *setpoint, queue));
        }

        let scheduler = self.drive(scheduler)?;
        eprint!("{}", scheduler);
        for monitor in &monitors {
            eprintln!("{}", monitor);
        }

        let collected: Vec<(String, Position, Vec<Sample>)> = queues
            .into_iter()
            .map(|(name, setpoint, queue)| {
                let samples = queue
                    .drain()
                    .into_iter()
                    .filter_map(|f| match f {
                        Frame::Sample(s) => Some(s),
                        Frame::End => None,
                    })
                    .collect();
                (name, setpoint, samples)
            })
            .collect();

        println!("{:<8} {:>10} {:>8} {:>10} {:>10} {:>10}", "axis", "setpoint", "samples", "final", "error", "overshoot");
        for (name, setpoint, samples) in &collected {
            match ResponseStats::from_samples(samples, *setpoint) {
                Some(stats) => println!(
                    "{:<8} {:>10} {:>8} {:>10} {:>10} {:>10}",
                    name, setpoint, stats.count, stats.final_position, stats.final_error, stats.overshoot
                ),
                None => println!("{:<8} {:>10} {:>8}", name, setpoint, 0),
            }
        }

        if let Some(dir) = out {
            std::fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
            for (name, _, samples) in &collected {
                write_samples_csv(&dir.join(format!("{}.csv", name)), samples)?;
            }
            let series: Vec<Series<'_>> = collected
                .iter()
                .map(|(name, setpoint, samples)| Series {
                    label: name,
                    samples,
                    setpoint: Some(*setpoint),
                })
                .collect();
            if let Err(e) = plot_responses_svg(&dir.join("demo.svg"), "Two-axis step response", &series) {
                error!("[Bench] plot failed: {}", e);
            }
        }

        report_faults(&scheduler)
    }
}

fn report_faults(scheduler: &Scheduler) -> anyhow::Result<()> {
    let faults = scheduler.faults();
    if faults.is_empty() {
        return Ok(());
    }
    for (id, reason) in &faults {
        error!("[Bench] {} faulted: {}", id, reason);
    }
    Err(anyhow!("{} task(s) faulted", faults.len()))
}

/// Step test per interval command on stdin, until EOF.
fn serve_stream(bench: &Bench, run: &RunConfig) -> anyhow::Result<()> {
    for line in stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_interval_command(&line) {
            Ok(interval_ms) => bench.step_test(run, interval_ms)?,
            Err(e) => warn!("[Bench] {}", e),
        }
    }
    info!("[Bench] input closed");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RunConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => RunConfig::default(),
    };
    config.validate()?;

    let mut bench = Bench::new(config, cli.realtime, cli.core);
    let exporter = cli.events.clone().map(|path| {
        let rec = EventRecorder::new();
        let handle = rec.start_exporter(path);
        bench.recorder = Some(rec);
        handle
    });

    info!("=== SERVO BENCH START ({}) ===", if cli.realtime { "real-time" } else { "simulated" });
    let result = match cli.command {
        Some(Mode::Stream { kp, setpoint }) => {
            let run = bench.config.with_overrides(kp, setpoint);
            serve_stream(&bench, &run)
        }
        Some(Mode::Demo { cycles, out }) => bench.demo(cycles, out.as_ref()),
        None => interactive(&bench),
    };

    // Dropping the last recorder handle lets the exporter finish.
    drop(bench);
    if let Some(handle) = exporter {
        let _ = handle.join();
    }
    info!("=== SERVO BENCH FINISHED ===");
    result
}

fn interactive(bench: &Bench) -> anyhow::Result<()> {
    loop {
        match prompt_menu().as_str() {
            "1" | "" => {
                let interval_ms = prompt_interval(bench.config.interval_ms);
                let kp = prompt_override("Kp", bench.config.kp);
                let setpoint = prompt_override("setpoint in ticks", bench.config.setpoint);
                let run = bench.config.with_overrides(kp, setpoint);
                if let Err(e) = bench.step_test(&run, interval_ms) {
                    error!("Step test failed: {:#}", e);
                }
            }
            "2" => {
                if let Err(e) = bench.demo(DEFAULT_DEMO_CYCLES, None) {
                    error!("Demo failed: {:#}", e);
                }
            }
            "3" | "q" => {
                eprintln!("Exiting.");
                return Ok(());
            }
            other => eprintln!("Unrecognized option '{}', please try again.", other),
        }
    }
}

// Prompts go to stderr so stdout carries telemetry only.
fn prompt_menu() -> String {
    eprintln!("\n┌─────────────────────────────────────────────┐");
    eprintln!("│     SELECT MODE                             │");
    eprintln!("├─────────────────────────────────────────────┤");
    eprintln!("│  1) Step test (stream telemetry)            │");
    eprintln!("│  2) Two-axis demo (+100000 / -150000)       │");
    eprintln!("│  3) Exit                                    │");
    eprintln!("└─────────────────────────────────────────────┘");
    eprint!("Select [1/2/3] (default: 1): ");
    let _ = std::io::stderr().flush();

    let mut input = String::new();
    match stdin().read_line(&mut input) {
        Ok(0) | Err(_) => "3".to_string(),
        Ok(_) => input.trim().to_string(),
    }
}

fn prompt_interval(default_ms: u64) -> u64 {
    eprint!("Enter ms between control feedback [default: {}]: ", default_ms);
    let _ = std::io::stderr().flush();
    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    if input.trim().is_empty() {
        return default_ms;
    }
    parse_interval_command(&input).unwrap_or_else(|e| {
        warn!("{}, using {} ms", e, default_ms);
        default_ms
    })
}

fn prompt_override<T: FromStr + fmt::Display>(label: &str, default: T) -> Option<T> {
    eprint!("Enter {} [default: {}]: ", label, default);
    let _ = std::io::stderr().flush();
    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    parse_override(&input).unwrap_or_else(|e| {
        warn!("{}, using {}", e, default);
        None
    })
}
