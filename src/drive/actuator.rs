//! actuator.rs
//! Bounded duty-cycle command for one motor driver.
//!
//! - Signed level in, clamped to a symmetric range (±100 by default).
//! - Sign becomes the direction signal, magnitude becomes the PWM duty.
//! - Write failures are hardware faults and propagate to the caller.

use log::warn;

use crate::error::DriveError;

/// Default symmetric duty-cycle range, in percent.
pub const DEFAULT_DUTY_LIMIT: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// PWM + direction output stage.
pub trait PwmOutput {
    /// Drive the motor in `direction` at `duty` percent (0..=limit).
    fn write(&mut self, direction: Direction, duty: f64) -> Result<(), DriveError>;
}

/// Single PWM channel (one H-bridge input).
pub trait PwmChannel {
    fn set_percent(&mut self, percent: f64) -> Result<(), DriveError>;
}

/// Clamps `level` into `[-limit, limit]`. Non-finite levels command zero.
#[inline]
pub fn clamp_duty(level: f64, limit: f64) -> f64 {
    if !level.is_finite() {
        return if level.is_nan() { 0.0 } else { level.signum() * limit };
    }
    level.clamp(-limit, limit)
}

pub struct Actuator<P: PwmOutput> {
    output: P,
    limit: f64,
    last_applied: f64,
}

impl<P: PwmOutput> Actuator<P> {
    pub fn new(output: P) -> Self {
        Self::with_limit(output, DEFAULT_DUTY_LIMIT)
    }

    /// `limit` is the magnitude of the symmetric range; it must be positive.
    pub fn with_limit(output: P, limit: f64) -> Self {
        Self {
            output,
            limit: limit.abs(),
            last_applied: 0.0,
        }
    }

    /// Clamps `level`, splits it into direction + magnitude and writes both.
    /// Returns the value actually applied.
    pub fn set_duty_cycle(&mut self, level: f64) -> Result<f64, DriveError> {
        if level.is_nan() {
            warn!("[Actuator] NaN duty requested, commanding 0");
        }
        let applied = clamp_duty(level, self.limit);
        let direction = if applied < 0.0 {
            Direction::Reverse
        } else {
            Direction::Forward
        };

        self.output.write(direction, applied.abs())?;
        self.last_applied = applied;
        Ok(applied)
    }

    #[inline]
    pub fn last_applied(&self) -> f64 {
        self.last_applied
    }

    #[inline]
    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub fn output(&self) -> &P {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut P {
        &mut self.output
    }
}

/// Two-input H-bridge (IN1/IN2 PWM) driven as a `PwmOutput`.
///
/// | Direction | IN1  | IN2  |
/// |-----------|------|------|
/// | Forward   | duty | 0    |
/// | Reverse   | 0    | duty |
///
/// Zero duty leaves both inputs low (coast).
pub struct HBridgeDriver<IN1: PwmChannel, IN2: PwmChannel> {
    in1: IN1,
    in2: IN2,
}

impl<IN1: PwmChannel, IN2: PwmChannel> HBridgeDriver<IN1, IN2> {
    pub fn new(in1: IN1, in2: IN2) -> Self {
        Self { in1, in2 }
    }

    pub fn channels(&self) -> (&IN1, &IN2) {
        (&self.in1, &self.in2)
    }
}

impl<IN1: PwmChannel, IN2: PwmChannel> PwmOutput for HBridgeDriver<IN1, IN2> {
    fn write(&mut self, direction: Direction, duty: f64) -> Result<(), DriveError> {
        match direction {
            Direction::Forward => {
                self.in2.set_percent(0.0)?;
                self.in1.set_percent(duty)?;
            }
            Direction::Reverse => {
                self.in1.set_percent(0.0)?;
                self.in2.set_percent(duty)?;
            }
        }
        Ok(())
    }
}
