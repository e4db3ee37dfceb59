//! servo.rs
//! Proportional position controller for one motor axis.
//!
//! Owns exactly one encoder adapter and one actuator adapter. Every call to
//! `set_setpoint` is a fresh evaluation of `command = Kp × (target − position)`:
//! no integral or derivative memory is kept between calls.
//!
//! Saturation is not detected here. A command beyond the actuator range is
//! clamped silently by the actuator adapter.

use log::debug;

use crate::drive::{
    actuator::{Actuator, PwmOutput},
    encoder::{Encoder, Position, TickCounter},
};
use crate::error::DriveError;

/// Gain of a freshly built servo.
pub const DEFAULT_KP: f64 = 0.1;

/// Most recent control-law evaluation, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoSnapshot {
    pub kp: f64,
    pub setpoint: Position,
    pub position: Position,
    pub error: i64,
    /// `Kp × error` before clamping.
    pub command: f64,
    /// Duty cycle actually written to the actuator.
    pub applied: f64,
}

pub struct Servo<C: TickCounter, P: PwmOutput> {
    encoder: Encoder<C>,
    actuator: Actuator<P>,
    kp: f64,
    setpoint: Position,
    error: i64,
    command: f64,
}

impl<C: TickCounter, P: PwmOutput> Servo<C, P> {
    pub fn new(actuator: Actuator<P>, encoder: Encoder<C>) -> Self {
        Self {
            encoder,
            actuator,
            kp: DEFAULT_KP,
            setpoint: 0,
            error: 0,
            command: 0.0,
        }
    }

    /// Sets the proportional gain. Not validated.
    pub fn set_kp(&mut self, kp: f64) {
        self.kp = kp;
    }

    #[inline]
    pub fn kp(&self) -> f64 {
        self.kp
    }

    /// Runs one control-law evaluation toward `target`.
    ///
    /// Reads the encoder, computes the error and the proportional command, and
    /// forwards the command to the actuator. Hardware faults propagate.
    pub fn set_setpoint(&mut self, target: Position) -> Result<(), DriveError> {
        let position = self.encoder.read()?;
        self.setpoint = target;
        self.error = target.saturating_sub(position);
        self.command = self.kp * self.error as f64;

        let applied = self.actuator.set_duty_cycle(self.command)?;
        debug!(
            "[Servo] target={} pos={} err={} cmd={:.2} applied={:.2}",
            target, position, self.error, self.command, applied
        );
        Ok(())
    }

    /// Open-loop override: commands `level` directly, bypassing the control law.
    /// Intended for stopping the axis (`run(0.0)`) at shutdown.
    pub fn run(&mut self, level: f64) -> Result<(), DriveError> {
        self.actuator.set_duty_cycle(level)?;
        Ok(())
    }

    #[inline]
    pub fn error(&self) -> i64 {
        self.error
    }

    #[inline]
    pub fn command(&self) -> f64 {
        self.command
    }

    #[inline]
    pub fn setpoint(&self) -> Position {
        self.setpoint
    }

    /// Position seen by the latest encoder read.
    #[inline]
    pub fn position(&self) -> Position {
        self.encoder.position()
    }

    pub fn snapshot(&self) -> ServoSnapshot {
        ServoSnapshot {
            kp: self.kp,
            setpoint: self.setpoint,
            position: self.encoder.position(),
            error: self.error,
            command: self.command,
            applied: self.actuator.last_applied(),
        }
    }

    pub fn encoder(&self) -> &Encoder<C> {
        &self.encoder
    }

    pub fn encoder_mut(&mut self) -> &mut Encoder<C> {
        &mut self.encoder
    }

    pub fn actuator(&self) -> &Actuator<P> {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut Actuator<P> {
        &mut self.actuator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::actuator::Direction;

    /// Counter parked at a fixed value that tests can move.
    struct ParkedCounter(u32);

    impl TickCounter for ParkedCounter {
        fn raw_count(&mut self) -> Result<u32, DriveError> {
            Ok(self.0)
        }

        fn bit_width(&self) -> u32 {
            16
        }
    }

    #[derive(Default)]
    struct LastWrite(Option<(Direction, f64)>);

    impl PwmOutput for LastWrite {
        fn write(&mut self, direction: Direction, duty: f64) -> Result<(), DriveError> {
            self.0 = Some((direction, duty));
            Ok(())
        }
    }

    fn servo_at(raw: u32) -> Servo<ParkedCounter, LastWrite> {
        let encoder = Encoder::new(ParkedCounter(raw)).unwrap();
        Servo::new(Actuator::new(LastWrite::default()), encoder)
    }

    #[test]
    fn new_servo_has_default_gain_and_no_error() {
        let servo = servo_at(0);
        assert_eq!(servo.kp(), DEFAULT_KP);
        assert_eq!(servo.error(), 0);
    }

    #[test]
    fn large_step_saturates_to_actuator_limit() {
        let mut servo = servo_at(0);
        servo.set_kp(0.05);
        servo.set_setpoint(100_000).unwrap();

        let snap = servo.snapshot();
        assert_eq!(snap.error, 100_000);
        assert!((snap.command - 5000.0).abs() < 1e-9);
        assert_eq!(snap.applied, 100.0);
        assert_eq!(
            servo.actuator().output().0,
            Some((Direction::Forward, 100.0))
        );
    }

    #[test]
    fn command_is_gain_times_error_within_range() {
        let mut servo = servo_at(0);
        servo.set_kp(0.5);
        servo.encoder_mut().counter_mut().0 = 40;
        servo.set_setpoint(0).unwrap();

        assert_eq!(servo.error(), -40);
        assert_eq!(servo.command(), -20.0);
        assert_eq!(servo.snapshot().applied, -20.0);
        assert_eq!(
            servo.actuator().output().0,
            Some((Direction::Reverse, 20.0))
        );
    }

    #[test]
    fn repeated_setpoint_without_motion_is_idempotent() {
        let mut servo = servo_at(1234);
        servo.set_kp(0.3);
        servo.set_setpoint(1500).unwrap();
        let first = servo.snapshot();
        servo.set_setpoint(1500).unwrap();
        assert_eq!(servo.snapshot(), first);
    }

    #[test]
    fn extreme_setpoint_saturates_instead_of_overflowing() {
        let mut servo = servo_at(0);
        servo.encoder_mut().counter_mut().0 = 40;
        servo.set_setpoint(i64::MIN).unwrap();

        assert_eq!(servo.error(), i64::MIN);
        assert_eq!(servo.snapshot().applied, -100.0);

        servo.encoder_mut().counter_mut().0 = 65_500;
        servo.set_setpoint(i64::MAX).unwrap();
        assert_eq!(servo.error(), i64::MAX);
        assert_eq!(servo.snapshot().applied, 100.0);
    }

    #[test]
    fn run_bypasses_control_law() {
        let mut servo = servo_at(0);
        servo.set_setpoint(10_000).unwrap();
        servo.run(0.0).unwrap();

        assert_eq!(servo.actuator().last_applied(), 0.0);
        // diagnostics still describe the last closed-loop evaluation
        assert_eq!(servo.error(), 10_000);
    }
}
