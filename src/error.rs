//! Error taxonomy.
//!
//! Hardware faults (`DriveError`) are fatal to the task that owns the axis and are
//! always propagated. Telemetry parse problems never show up here: the collector
//! skips malformed lines locally.

use crate::scheduling::scheduler::TaskId;

/// Hardware fault raised by an encoder or actuator adapter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriveError {
    #[error("encoder read failed: {0}")]
    EncoderRead(String),
    #[error("actuator write failed: {0}")]
    ActuatorWrite(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("telemetry I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid sampling interval command: {0:?}")]
    InvalidInterval(String),
    #[error("telemetry queue '{0}' is full, end-of-run marker lost")]
    QueueFull(String),
}

/// Failure that ends a cooperative task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Drive(#[from] DriveError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("no task registered as {0}")]
    UnknownTask(TaskId),
    #[error("task '{0}' registered with a zero period")]
    ZeroPeriod(String),
}

/// Failure writing collected samples to disk.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("export I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("plot rendering failed: {0}")]
    Plot(String),
    #[error("nothing to export")]
    Empty,
}
