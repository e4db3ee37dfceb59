//! Cooperative scheduling: single-threaded, one task body at a time.
//! Tasks suspend only at the end of a control cycle, so a control-law evaluation
//! and its actuator write are never interleaved with another task.

pub mod clock;
pub mod scheduler;
pub mod share;
pub mod task;
