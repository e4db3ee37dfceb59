//! Device stream → host collector, through an in-memory line buffer.

use std::io::{BufReader, Cursor};

use servo_rts::{
    Actuator, Encoder, RunConfig, Scheduler, Servo, ServoTask, SimClock,
    scheduling::task::ServoTaskConfig,
    sim::motor::{MotorParams, SimMotor},
    telemetry::{
        collector::collect,
        stream::{LineStream, SampleSink},
        wire::{Sample, format_interval_command, parse_interval_command},
    },
};

/// Runs `config` on a fresh simulated axis and returns the bytes it streamed.
fn device_output(config: ServoTaskConfig, interval_ms: u64) -> Vec<u8> {
    let clock = SimClock::new();
    let motor = SimMotor::new(MotorParams::default(), clock.clone());
    let (counter, pwm) = motor.take_hardware().unwrap();
    let servo = Servo::new(Actuator::new(pwm), Encoder::new(counter).unwrap());

    // The scheduler owns the task, so stream into a buffer shared with the test.
    let buffer = SharedBuf::default();
    let task = ServoTask::new("axis_1", servo, config).with_sink(LineStream::new(buffer.clone()));

    let mut sched = Scheduler::new();
    sched.register(Box::new(task), 1, interval_ms, 0).unwrap();
    sched.run_until_idle(&clock);
    assert!(sched.faults().is_empty());
    buffer.take()
}

#[derive(Clone, Default)]
struct SharedBuf(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

impl SharedBuf {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl std::io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn host_command_sizes_the_run() {
    let interval = parse_interval_command(&format_interval_command(50)).unwrap();
    let config = RunConfig::default().test_run(interval);
    let bytes = device_output(config, interval);

    let got = collect(Cursor::new(bytes)).unwrap();
    assert!(got.terminated);
    assert_eq!(got.skipped(), 0);
    assert_eq!(got.samples.len(), 100);

    let stamps: Vec<u64> = got.samples.iter().map(|s| s.timestamp_ms).collect();
    let expected: Vec<u64> = (0..100).map(|i| i * 50).collect();
    assert_eq!(stamps, expected);
    assert_eq!(got.samples[0].position, 0);
}

#[test]
fn operator_gain_and_setpoint_drive_the_run() {
    let stock = RunConfig::default();
    let tuned = stock.with_overrides(Some(0.001), Some(20_000));

    let stock_run = collect(Cursor::new(device_output(stock.test_run(50), 50))).unwrap();
    let tuned_run = collect(Cursor::new(device_output(tuned.test_run(50), 50))).unwrap();
    assert!(tuned_run.terminated);
    assert_eq!(tuned_run.samples.len(), stock_run.samples.len());

    // 20 % duty instead of saturating at 100 %, so the first interval covers less ground.
    let early = tuned_run.samples[1].position;
    assert!(early > 0 && early < stock_run.samples[1].position / 2, "early position {early}");

    // Settles toward the overridden target, not the configured one.
    let last = tuned_run.samples.last().unwrap().position;
    assert!((15_000..=20_000).contains(&last), "final position {last}");
}

#[test]
fn noise_on_the_link_is_skipped() {
    let clean = device_output(ServoTaskConfig::single_run(0.05, 10_000, 20), 10);

    let mut noisy = b"boot v1.2\r\n>>> \r\n".to_vec();
    for line in clean.split_inclusive(|b| *b == b'\n') {
        noisy.extend_from_slice(line);
        noisy.extend_from_slice(b"\xfe\x00garbage\n");
    }

    let expected = collect(Cursor::new(clean)).unwrap();
    let got = collect(BufReader::new(Cursor::new(noisy))).unwrap();
    assert!(got.terminated);
    assert_eq!(got.samples, expected.samples);
    assert!(got.noise_lines >= 20);
}

#[test]
fn back_to_back_runs_restart_time_and_position() {
    let config = ServoTaskConfig {
        kp: 0.05,
        setpoint: 3_000,
        samples_per_run: Some(5),
        max_runs: Some(2),
    };
    let mut reader = Cursor::new(device_output(config, 20));

    let first = collect(&mut reader).unwrap();
    let second = collect(&mut reader).unwrap();
    assert!(first.terminated && second.terminated);
    assert_eq!(first.samples.len(), 5);
    assert_eq!(second.samples.len(), 5);
    assert_eq!(first.samples[0], Sample::new(0, 0));
    assert_eq!(second.samples[0].timestamp_ms, 0);
    // The encoder was re-zeroed, so the second run starts near zero, not near the setpoint.
    assert!(second.samples[0].position.abs() < first.samples[4].position.abs());
}

#[test]
fn legacy_spaced_lines_are_accepted() {
    let mut stream = LineStream::new(Vec::new());
    stream.emit(Sample::new(0, 0)).unwrap();
    stream.end_run().unwrap();
    assert_eq!(stream.get_ref().as_slice(), b"0,0\nEnd\n");

    let legacy = "0, 0\r\n10.0, 120\r\n20, 240\r\nEnd\r\n";
    let got = collect(Cursor::new(legacy)).unwrap();
    assert_eq!(
        got.samples,
        vec![Sample::new(0, 0), Sample::new(10, 120), Sample::new(20, 240)]
    );
}
