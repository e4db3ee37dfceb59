//! encoder.rs
//! Quadrature encoder adapter over a fixed-width hardware tick counter.
//!
//! - The timer counter wraps at its bit width; consecutive samples are turned into
//!   signed deltas with `wrap_delta` and accumulated into an unbounded position.
//! - `zero()` re-synchronises to the live counter so the next `read()` has no jump.

use log::debug;

use crate::error::DriveError;

/// Accumulated encoder position in ticks.
pub type Position = i64;

/// Raw hardware tick counter (timer peripheral in encoder mode).
pub trait TickCounter {
    /// Current raw counter value, always below `2^bit_width()`.
    fn raw_count(&mut self) -> Result<u32, DriveError>;

    /// Width of the counter register in bits.
    fn bit_width(&self) -> u32;
}

/// Signed distance travelled between two raw samples of a `bits`-wide counter.
///
/// A raw difference larger than half the modulus is taken to be a wrap in the
/// opposite direction and corrected by one full modulus.
pub fn wrap_delta(previous: u32, current: u32, bits: u32) -> i64 {
    let modulus = 1i64 << bits;
    let half = modulus / 2;
    let mut delta = current as i64 - previous as i64;

    if delta > half {
        delta -= modulus;
    } else if delta < -half {
        delta += modulus;
    }
    delta
}

pub struct Encoder<C: TickCounter> {
    counter: C,
    position: Position,
    last_raw: u32,
}

impl<C: TickCounter> Encoder<C> {
    /// Wraps `counter`, taking its current value as the zero reference.
    pub fn new(mut counter: C) -> Result<Self, DriveError> {
        let last_raw = counter.raw_count()?;
        Ok(Self {
            counter,
            position: 0,
            last_raw,
        })
    }

    /// Samples the counter and returns the updated accumulated position.
    pub fn read(&mut self) -> Result<Position, DriveError> {
        let raw = self.counter.raw_count()?;
        let delta = wrap_delta(self.last_raw, raw, self.counter.bit_width());
        self.position += delta;
        self.last_raw = raw;
        Ok(self.position)
    }

    /// Resets the position to zero against the live counter value.
    pub fn zero(&mut self) -> Result<(), DriveError> {
        self.last_raw = self.counter.raw_count()?;
        self.position = 0;
        debug!("[Encoder] zeroed at raw={}", self.last_raw);
        Ok(())
    }

    /// Last accumulated position, without sampling the hardware.
    #[inline]
    pub fn position(&self) -> Position {
        self.position
    }

    pub fn counter(&self) -> &C {
        &self.counter
    }

    pub fn counter_mut(&mut self) -> &mut C {
        &mut self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a fixed list of raw values.
    struct ScriptedCounter {
        values: VecDeque<u32>,
        last: u32,
        bits: u32,
    }

    impl ScriptedCounter {
        fn new(bits: u32, values: &[u32]) -> Self {
            Self {
                values: values.iter().copied().collect(),
                last: 0,
                bits,
            }
        }
    }

    impl TickCounter for ScriptedCounter {
        fn raw_count(&mut self) -> Result<u32, DriveError> {
            if let Some(v) = self.values.pop_front() {
                self.last = v;
            }
            Ok(self.last)
        }

        fn bit_width(&self) -> u32 {
            self.bits
        }
    }

    struct DeadCounter;

    impl TickCounter for DeadCounter {
        fn raw_count(&mut self) -> Result<u32, DriveError> {
            Err(DriveError::EncoderRead("timer not clocked".into()))
        }

        fn bit_width(&self) -> u32 {
            16
        }
    }

    #[test]
    fn wrap_delta_corrects_forward_overflow() {
        assert_eq!(wrap_delta(65530, 65534, 16), 4);
        assert_eq!(wrap_delta(65534, 2, 16), 4);
        assert_eq!(wrap_delta(2, 6, 16), 4);
    }

    #[test]
    fn wrap_delta_corrects_backward_underflow() {
        assert_eq!(wrap_delta(3, 65533, 16), -6);
        assert_eq!(wrap_delta(0, 255, 8), -1);
    }

    #[test]
    fn wrap_delta_keeps_exact_half_modulus() {
        assert_eq!(wrap_delta(0, 32768, 16), 32768);
        assert_eq!(wrap_delta(32768, 0, 16), -32768);
    }

    #[test]
    fn wrap_delta_handles_full_32_bit_counters() {
        assert_eq!(wrap_delta(u32::MAX, 1, 32), 2);
        assert_eq!(wrap_delta(1, u32::MAX, 32), -2);
    }

    #[test]
    fn read_accumulates_across_wraparound() {
        let counter = ScriptedCounter::new(16, &[65530, 65534, 2, 6]);
        let mut enc = Encoder::new(counter).unwrap();

        let positions: Vec<Position> = (0..3).map(|_| enc.read().unwrap()).collect();
        assert_eq!(positions, vec![4, 8, 12]);
        let deltas: Vec<i64> = positions
            .iter()
            .scan(0, |prev, &p| {
                let d = p - *prev;
                *prev = p;
                Some(d)
            })
            .collect();
        assert_eq!(deltas, vec![4, 4, 4]);
    }

    #[test]
    fn read_tracks_reverse_motion_below_zero() {
        let counter = ScriptedCounter::new(16, &[5, 1, 65530, 65500]);
        let mut enc = Encoder::new(counter).unwrap();
        assert_eq!(enc.read().unwrap(), -4);
        assert_eq!(enc.read().unwrap(), -11);
        assert_eq!(enc.read().unwrap(), -41);
    }

    #[test]
    fn zero_then_read_without_motion_is_zero() {
        let counter = ScriptedCounter::new(16, &[100, 900, 1400]);
        let mut enc = Encoder::new(counter).unwrap();
        assert_eq!(enc.read().unwrap(), 800);

        enc.zero().unwrap();
        assert_eq!(enc.position(), 0);
        // counter stays at 1400 from here on
        assert_eq!(enc.read().unwrap(), 0);
    }

    #[test]
    fn zero_resynchronises_without_discontinuity() {
        let counter = ScriptedCounter::new(16, &[0, 5000, 5000, 5010]);
        let mut enc = Encoder::new(counter).unwrap();
        enc.read().unwrap();
        enc.zero().unwrap();
        assert_eq!(enc.read().unwrap(), 10);
    }

    #[test]
    fn counter_failure_propagates() {
        assert!(matches!(
            Encoder::new(DeadCounter),
            Err(DriveError::EncoderRead(_))
        ));
    }
}
