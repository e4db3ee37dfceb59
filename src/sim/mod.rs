//! Simulated hardware: stands in for the timer counter and the H-bridge so the
//! control loop, scheduler and telemetry can run off-target and in tests.

pub mod motor;
