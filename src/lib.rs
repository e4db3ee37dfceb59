//! # Cooperative Servo Control
//!
//! Closed-loop position control of DC motors from quadrature-encoder feedback,
//! multiplexed cooperatively across several control loops.
//!
//! ## Layout
//! - **drive:** encoder adapter → proportional servo → actuator adapter.
//! - **scheduling:** resumable tasks, priority/period scheduler, share + queue primitives.
//! - **telemetry:** `"<ms>,<ticks>"` line stream terminated by `End` (device) and its parser (host).
//! - **sim:** simulated motor plant standing in for the timer counter and H-bridge.
//! - **utils:** event recording, CSV export, response plots.

pub mod config;
pub mod drive;
pub mod error;
pub mod scheduling;
pub mod sim;
pub mod telemetry;
pub mod utils;

pub use config::RunConfig;
pub use drive::{
    actuator::{Actuator, Direction, PwmOutput},
    encoder::{Encoder, Position, TickCounter},
    servo::{Servo, ServoSnapshot},
};
pub use error::{ConfigError, DriveError, ExportError, SchedulerError, TaskError, TelemetryError};
pub use scheduling::{
    clock::{Clock, MonotonicClock, SimClock},
    scheduler::{Scheduler, TaskId},
    task::{CooperativeTask, ServoTask, Step},
};
pub use telemetry::wire::Sample;
