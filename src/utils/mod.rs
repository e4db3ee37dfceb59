// Utilities: scheduler event recording, step-response statistics,
// and export of collected runs to CSV and SVG.

pub mod export;
pub mod metrics;
