//! motor.rs
//! First-order DC motor plant with a wrapping quadrature counter.
//!
//! - Speed follows the commanded duty with time constant `tau`; position integrates speed.
//! - The duty is held between writes (zero-order hold); the plant catches up to the
//!   clock lazily on every counter read or PWM write.
//! - `SimCounter` exposes position as a raw `counter_bits`-wide counter that wraps.
//! - The counter and H-bridge are claimed together with `take_hardware`; only one
//!   pair exists at a time and the claim is released when both are dropped.
//! - Reads and writes can be told to fail, for fault-injection tests.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::drive::{
    actuator::{Direction, PwmOutput},
    encoder::TickCounter,
};
use crate::error::DriveError;
use crate::scheduling::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorParams {
    /// Steady-state speed at 100 % duty, in ticks per millisecond.
    pub full_speed_ticks_per_ms: f64,
    /// Mechanical time constant in milliseconds.
    pub time_constant_ms: f64,
    /// Width of the simulated timer counter.
    pub counter_bits: u32,
    /// Raw counter value at position zero.
    pub initial_raw: u32,
    /// Duty magnitude below which static friction holds the shaft.
    pub stiction_duty: f64,
    /// Peak uniform noise added to each raw reading, in ticks (0 disables).
    pub read_noise_ticks: u32,
}

impl Default for MotorParams {
    fn default() -> Self {
        Self {
            full_speed_ticks_per_ms: 60.0,
            time_constant_ms: 50.0,
            counter_bits: 16,
            initial_raw: 0,
            stiction_duty: 2.0,
            read_noise_ticks: 0,
        }
    }
}

struct PlantState {
    position: f64,
    velocity: f64,
    duty: f64,
    last_ms: u64,
    writes: u64,
    fail_writes_after: Option<u64>,
    fail_reads: bool,
    rng: StdRng,
}

impl PlantState {
    /// Exact first-order response over `dt` ms with the current duty held.
    fn advance(&mut self, params: &MotorParams, now_ms: u64) {
        let dt = now_ms.saturating_sub(self.last_ms) as f64;
        self.last_ms = now_ms.max(self.last_ms);
        if dt <= 0.0 {
            return;
        }

        let target = if self.duty.abs() < params.stiction_duty {
            0.0
        } else {
            self.duty / 100.0 * params.full_speed_ticks_per_ms
        };
        let tau = params.time_constant_ms.max(1e-3);
        let decay = (-dt / tau).exp();
        let v0 = self.velocity;

        self.position += target * dt + (v0 - target) * tau * (1.0 - decay);
        self.velocity = target + (v0 - target) * decay;
    }
}

/// Releases the hardware claim once the last handle holding it is gone.
struct Claim(Arc<AtomicBool>);

impl Drop for Claim {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Shared plant. Clones observe the same shaft; the hardware handles are
/// handed out once at a time through `take_hardware`.
#[derive(Clone)]
pub struct SimMotor {
    params: MotorParams,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<PlantState>>,
    claimed: Arc<AtomicBool>,
}

impl SimMotor {
    pub fn new(params: MotorParams, clock: impl Clock + 'static) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(clock);
        let last_ms = clock.now_ms();
        Self {
            params,
            clock,
            state: Arc::new(Mutex::new(PlantState {
                position: 0.0,
                velocity: 0.0,
                duty: 0.0,
                last_ms,
                writes: 0,
                fail_writes_after: None,
                fail_reads: false,
                rng: StdRng::seed_from_u64(0x5e7f),
            })),
            claimed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claims the axis' counter and H-bridge. Returns `None` while a previous
    /// pair is still alive, so two controllers can never drive one shaft.
    pub fn take_hardware(&self) -> Option<(SimCounter, SimPwm)> {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let claim = Arc::new(Claim(self.claimed.clone()));
        Some((
            SimCounter {
                motor: self.clone(),
                _claim: claim.clone(),
            },
            SimPwm {
                motor: self.clone(),
                _claim: claim,
            },
        ))
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Accepts `writes` more PWM writes, then fails every write after that.
    pub fn fail_writes_after(&self, writes: u64) {
        let mut s = self.state.lock();
        s.fail_writes_after = Some(s.writes + writes);
    }

    /// Makes every following counter read fail (or recover).
    pub fn fail_reads(&self, failing: bool) {
        self.state.lock().fail_reads = failing;
    }

    /// True shaft position in ticks (unwrapped, noise-free).
    pub fn position(&self) -> f64 {
        let mut s = self.state.lock();
        s.advance(&self.params, self.clock.now_ms());
        s.position
    }

    pub fn velocity(&self) -> f64 {
        let mut s = self.state.lock();
        s.advance(&self.params, self.clock.now_ms());
        s.velocity
    }

    /// Signed duty currently applied.
    pub fn duty(&self) -> f64 {
        self.state.lock().duty
    }

    pub fn writes(&self) -> u64 {
        self.state.lock().writes
    }

    pub fn params(&self) -> &MotorParams {
        &self.params
    }

    fn raw_count(&self) -> Result<u32, DriveError> {
        let mut s = self.state.lock();
        if s.fail_reads {
            return Err(DriveError::EncoderRead("simulated counter fault".into()));
        }
        s.advance(&self.params, self.clock.now_ms());

        let noise = if self.params.read_noise_ticks > 0 {
            let n = self.params.read_noise_ticks as i64;
            s.rng.random_range(-n..=n)
        } else {
            0
        };
        let modulus = 1i64 << self.params.counter_bits;
        let raw = self.params.initial_raw as i64 + s.position.round() as i64 + noise;
        Ok(raw.rem_euclid(modulus) as u32)
    }

    fn write(&self, direction: Direction, duty: f64) -> Result<(), DriveError> {
        let mut s = self.state.lock();
        if s.fail_writes_after.is_some_and(|n| s.writes >= n) {
            return Err(DriveError::ActuatorWrite("simulated driver fault".into()));
        }
        s.advance(&self.params, self.clock.now_ms());
        s.duty = match direction {
            Direction::Forward => duty,
            Direction::Reverse => -duty,
        };
        s.writes += 1;
        Ok(())
    }
}

/// Quadrature counter view of a `SimMotor`.
pub struct SimCounter {
    motor: SimMotor,
    _claim: Arc<Claim>,
}

impl SimCounter {
    pub fn motor(&self) -> &SimMotor {
        &self.motor
    }
}

impl TickCounter for SimCounter {
    fn raw_count(&mut self) -> Result<u32, DriveError> {
        self.motor.raw_count()
    }

    fn bit_width(&self) -> u32 {
        self.motor.params.counter_bits
    }
}

/// H-bridge view of a `SimMotor`.
pub struct SimPwm {
    motor: SimMotor,
    _claim: Arc<Claim>,
}

impl SimPwm {
    pub fn motor(&self) -> &SimMotor {
        &self.motor
    }
}

impl PwmOutput for SimPwm {
    fn write(&mut self, direction: Direction, duty: f64) -> Result<(), DriveError> {
        self.motor.write(direction, duty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::clock::SimClock;

    #[test]
    fn speed_settles_toward_commanded_duty() {
        let clock = SimClock::new();
        let motor = SimMotor::new(MotorParams::default(), clock.clone());
        let (_, mut pwm) = motor.take_hardware().unwrap();
        pwm.write(Direction::Forward, 50.0).unwrap();

        clock.advance(500);
        assert!((motor.velocity() - 30.0).abs() < 0.01);
        assert!(motor.position() > 0.0);
    }

    #[test]
    fn reverse_duty_moves_backwards() {
        let clock = SimClock::new();
        let motor = SimMotor::new(MotorParams::default(), clock.clone());
        let (_, mut pwm) = motor.take_hardware().unwrap();
        pwm.write(Direction::Reverse, 100.0).unwrap();
        clock.advance(100);
        assert!(motor.position() < 0.0);
        assert_eq!(motor.duty(), -100.0);
    }

    #[test]
    fn stiction_holds_small_duty() {
        let clock = SimClock::new();
        let motor = SimMotor::new(MotorParams::default(), clock.clone());
        let (_, mut pwm) = motor.take_hardware().unwrap();
        pwm.write(Direction::Forward, 1.0).unwrap();
        clock.advance(1000);
        assert_eq!(motor.position(), 0.0);
    }

    #[test]
    fn counter_wraps_at_bit_width() {
        let clock = SimClock::new();
        let params = MotorParams {
            initial_raw: 65_530,
            ..MotorParams::default()
        };
        let motor = SimMotor::new(params, clock.clone());
        let (mut counter, mut pwm) = motor.take_hardware().unwrap();
        assert_eq!(counter.raw_count().unwrap(), 65_530);

        pwm.write(Direction::Forward, 100.0).unwrap();
        clock.advance(200);
        let raw = counter.raw_count().unwrap();
        assert!(raw < 65_530, "counter should have wrapped, got {raw}");
    }

    #[test]
    fn injected_faults_surface_as_drive_errors() {
        let clock = SimClock::new();
        let motor = SimMotor::new(MotorParams::default(), clock);
        let (mut counter, mut pwm) = motor.take_hardware().unwrap();
        motor.fail_writes_after(0);
        assert!(matches!(
            pwm.write(Direction::Forward, 10.0),
            Err(DriveError::ActuatorWrite(_))
        ));

        motor.fail_reads(true);
        assert!(counter.raw_count().is_err());
        motor.fail_reads(false);
        assert!(counter.raw_count().is_ok());
    }

    #[test]
    fn hardware_is_claimed_once_until_released() {
        let clock = SimClock::new();
        let motor = SimMotor::new(MotorParams::default(), clock);
        let (counter, pwm) = motor.take_hardware().unwrap();
        assert!(motor.is_claimed());
        assert!(motor.take_hardware().is_none());
        assert!(motor.clone().take_hardware().is_none());

        // Either half keeps the claim alive.
        drop(counter);
        assert!(motor.take_hardware().is_none());
        drop(pwm);

        assert!(!motor.is_claimed());
        assert!(motor.take_hardware().is_some());
    }
}
