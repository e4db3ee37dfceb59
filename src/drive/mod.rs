//! Drive chain for one motor axis.
//! Encoder ticks in → proportional control law → signed duty cycle out.
//! Hardware stays behind the `TickCounter` and `PwmOutput` traits.

pub mod actuator;
pub mod encoder;
pub mod servo;
