//! host_plot.rs
//! Host side of the step-response bench.
//!
//! Sends the sampling interval to the device, collects `<ms>,<ticks>` lines until
//! `End`, then writes the run as CSV (+ summary) and an SVG position plot.
//! The device is `servo_rts stream` spawned as a child process, or a captured
//! stream replayed from `--input`.
//!
//! `--config`, `--kp` and `--setpoint` are forwarded to the device, and the
//! same resolved setpoint is drawn on the plot, so the two sides always agree.

use std::{
    fs::{File, create_dir_all},
    io::{BufReader, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{Context, anyhow, bail};
use clap::Parser;
use log::{error, info, warn};

use servo_rts::{
    RunConfig,
    telemetry::{
        collector::{Collection, collect},
        wire::format_interval_command,
    },
    utils::{
        export::{Series, plot_responses_svg, write_samples_csv, write_summary_csv},
        metrics::ResponseStats,
    },
};

#[derive(Parser)]
#[command(name = "host_plot", about = "Collect and plot servo step responses")]
struct Args {
    /// Sampling interval sent to the device, in ms.
    #[arg(long, default_value_t = 50)]
    interval: u64,

    /// Number of back-to-back runs to request.
    #[arg(long, default_value_t = 1)]
    runs: u32,

    /// Device binary (defaults to `servo_rts` next to this executable).
    #[arg(long)]
    device: Option<PathBuf>,

    /// Extra arguments passed to the device before `stream`.
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    device_args: Vec<String>,

    /// Device TOML run configuration, also used to resolve the plotted setpoint.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Proportional gain requested from the device.
    #[arg(long)]
    kp: Option<f64>,

    /// Replay a captured stream instead of spawning the device.
    #[arg(long, conflicts_with = "device")]
    input: Option<PathBuf>,

    /// Setpoint requested from the device, drawn on the plot and used for the summary.
    #[arg(long, allow_hyphen_values = true)]
    setpoint: Option<i64>,

    /// Output directory.
    #[arg(long, default_value = "data/host")]
    out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    if args.interval == 0 {
        bail!("--interval must be at least 1 ms");
    }
    create_dir_all(&args.out).with_context(|| format!("cannot create {}", args.out.display()))?;

    let setpoint = run_config(&args)?.setpoint;
    let collections = match &args.input {
        Some(path) => vec![replay(path)?],
        None => run_device(&args)?,
    };

    for (i, collection) in collections.iter().enumerate() {
        save_run(&args.out, i + 1, collection, setpoint, args.interval)?;
    }
    Ok(())
}

/// The run the device will perform: its config file plus the command-line overrides.
fn run_config(args: &Args) -> anyhow::Result<RunConfig> {
    let base = match &args.config {
        Some(path) => RunConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => RunConfig::default(),
    };
    Ok(base.with_overrides(args.kp, args.setpoint))
}

fn device_command_args(args: &Args) -> Vec<String> {
    let mut out = args.device_args.clone();
    if let Some(path) = &args.config {
        out.push("--config".into());
        out.push(path.display().to_string());
    }
    out.push("stream".into());
    if let Some(kp) = args.kp {
        out.push(format!("--kp={}", kp));
    }
    if let Some(setpoint) = args.setpoint {
        out.push(format!("--setpoint={}", setpoint));
    }
    out
}

fn replay(path: &Path) -> anyhow::Result<Collection> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    Ok(collect(BufReader::new(file))?)
}

fn run_device(args: &Args) -> anyhow::Result<Vec<Collection>> {
    let device = match &args.device {
        Some(path) => path.clone(),
        None => std::env::current_exe()?.with_file_name("servo_rts"),
    };
    let device_args = device_command_args(args);
    info!("[Host] spawning {} {}", device.display(), device_args.join(" "));

    let mut child = Command::new(&device)
        .args(&device_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("cannot start {}", device.display()))?;

    let mut to_device = child.stdin.take().ok_or_else(|| anyhow!("device stdin unavailable"))?;
    let mut from_device = BufReader::new(child.stdout.take().ok_or_else(|| anyhow!("device stdout unavailable"))?);

    let mut collections = Vec::new();
    for run in 1..=args.runs {
        to_device.write_all(format_interval_command(args.interval).as_bytes())?;
        to_device.flush()?;

        let collection = collect(&mut from_device)?;
        info!(
            "[Host] run {}: {} samples, {} lines skipped",
            run,
            collection.samples.len(),
            collection.skipped()
        );
        let terminated = collection.terminated;
        collections.push(collection);
        if !terminated {
            warn!("[Host] device stream ended early");
            break;
        }
    }

    drop(to_device);
    let status = child.wait()?;
    if !status.success() {
        error!("[Host] device exited with {}", status);
    }
    Ok(collections)
}

fn save_run(dir: &Path, run: usize, collection: &Collection, setpoint: i64, interval: u64) -> anyhow::Result<()> {
    let samples = &collection.samples;
    if samples.is_empty() {
        warn!("[Host] run {} produced no samples", run);
        return Ok(());
    }

    let stem = format!("run_{}", run);
    write_samples_csv(&dir.join(format!("{}.csv", stem)), samples)?;

    if let Some(stats) = ResponseStats::from_samples(samples, setpoint) {
        write_summary_csv(&dir.join(format!("{}_summary.csv", stem)), &stats)?;
        println!(
            "run {}: {} samples, final {} ticks (error {}), overshoot {}",
            run, stats.count, stats.final_position, stats.final_error, stats.overshoot
        );
    }

    let title = format!("Step response, {} ms interval", interval);
    let series = [Series {
        label: &stem,
        samples,
        setpoint: Some(setpoint),
    }];
    if let Err(e) = plot_responses_svg(&dir.join(format!("{}.svg", stem)), &title, &series) {
        error!("[Host] plot failed: {}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        Args::parse_from(std::iter::once("host_plot").chain(extra.iter().copied()))
    }

    #[test]
    fn plotted_setpoint_follows_the_device_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "setpoint = -20000\nkp = 0.02").unwrap();
        let path = file.path().display().to_string();

        let from_file = run_config(&args(&["--config", &path])).unwrap();
        assert_eq!(from_file.setpoint, -20_000);
        assert_eq!(from_file.kp, 0.02);

        let overridden = run_config(&args(&["--config", &path, "--setpoint", "-5000"])).unwrap();
        assert_eq!(overridden.setpoint, -5_000);
        assert_eq!(overridden.kp, 0.02);

        assert_eq!(run_config(&args(&[])).unwrap(), RunConfig::default());
        assert!(run_config(&args(&["--config", "/nonexistent/servo.toml"])).is_err());
    }

    #[test]
    fn device_sees_the_same_tuning_as_the_plot() {
        let argv = device_command_args(&args(&[
            "--config",
            "rig.toml",
            "--kp",
            "0.1",
            "--setpoint",
            "-150000",
            "--device-args",
            "--realtime",
        ]));
        assert_eq!(
            argv,
            vec!["--realtime", "--config", "rig.toml", "stream", "--kp=0.1", "--setpoint=-150000"]
        );

        assert_eq!(device_command_args(&args(&[])), vec!["stream"]);
    }
}
