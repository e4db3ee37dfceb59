//! export.rs
//! Writes collected step responses to disk.
//!
//! - `<name>.csv`: one row per sample (`timestamp_ms,position`).
//! - `<name>_summary.csv`: `metric,value,description` rows from `ResponseStats`.
//! - `<name>.svg`: position over time, one line per axis, dashed setpoint.

use std::path::Path;

use log::info;
use plotters::prelude::*;
use serde::Serialize;

use crate::drive::encoder::Position;
use crate::error::ExportError;
use crate::telemetry::wire::Sample;
use crate::utils::metrics::ResponseStats;

pub const X_LABEL: &str = "Time (ms)";
pub const Y_LABEL: &str = "Position (Ticks)";

/// One line on a response plot.
#[derive(Debug, Clone, Copy)]
pub struct Series<'a> {
    pub label: &'a str,
    pub samples: &'a [Sample],
    pub setpoint: Option<Position>,
}

pub fn write_samples_csv(path: &Path, samples: &[Sample]) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_path(path)?;
    for sample in samples {
        writer.serialize(sample)?;
    }
    writer.flush()?;
    info!("[Export] {} samples written to {}", samples.len(), path.display());
    Ok(())
}

pub fn read_samples_csv(path: &Path) -> Result<Vec<Sample>, ExportError> {
    let mut reader = csv::Reader::from_path(path)?;
    let samples = reader.deserialize().collect::<Result<Vec<Sample>, csv::Error>>()?;
    Ok(samples)
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    metric: &'a str,
    value: String,
    description: &'a str,
}

pub fn write_summary_csv(path: &Path, stats: &ResponseStats) -> Result<(), ExportError> {
    let rows = [
        ("samples", stats.count.to_string(), "Samples collected"),
        ("min_ticks", stats.min.to_string(), "Minimum position"),
        ("max_ticks", stats.max.to_string(), "Maximum position"),
        ("mean_ticks", format!("{:.2}", stats.mean), "Mean position"),
        ("final_ticks", stats.final_position.to_string(), "Last sampled position"),
        ("final_error_ticks", stats.final_error.to_string(), "Setpoint minus last position"),
        ("overshoot_ticks", stats.overshoot.to_string(), "Travel past the setpoint"),
    ];

    let mut writer = csv::Writer::from_path(path)?;
    for (metric, value, description) in rows {
        writer.serialize(SummaryRow {
            metric,
            value,
            description,
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn plot_err<E: std::fmt::Debug>(e: E) -> ExportError {
    ExportError::Plot(format!("{:?}", e))
}

/// Axis ranges covering every sample and setpoint, padded by 5 % vertically.
fn plot_bounds(series: &[Series<'_>]) -> Option<((f64, f64), (f64, f64))> {
    let points = series.iter().flat_map(|s| s.samples.iter());
    let (mut x0, mut x1) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut y0, mut y1) = (f64::INFINITY, f64::NEG_INFINITY);
    for p in points {
        x0 = x0.min(p.timestamp_ms as f64);
        x1 = x1.max(p.timestamp_ms as f64);
        y0 = y0.min(p.position as f64);
        y1 = y1.max(p.position as f64);
    }
    if !x0.is_finite() {
        return None;
    }
    for sp in series.iter().filter_map(|s| s.setpoint) {
        y0 = y0.min(sp as f64);
        y1 = y1.max(sp as f64);
    }

    let pad = ((y1 - y0) * 0.05).max(1.0);
    Some(((x0, x1.max(x0 + 1.0)), (y0 - pad, y1 + pad)))
}

/// Renders `series` as an SVG line chart at `path`.
pub fn plot_responses_svg(path: &Path, title: &str, series: &[Series<'_>]) -> Result<(), ExportError> {
    let ((x0, x1), (y0, y1)) = plot_bounds(series).ok_or(ExportError::Empty)?;

    let root = SVGBackend::new(path, (1024, 640)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 22))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(80)
        .build_cartesian_2d(x0..x1, y0..y1)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc(X_LABEL)
        .y_desc(Y_LABEL)
        .draw()
        .map_err(plot_err)?;

    for (i, s) in series.iter().enumerate() {
        let color = Palette99::pick(i).mix(1.0);
        chart
            .draw_series(LineSeries::new(
                s.samples.iter().map(|p| (p.timestamp_ms as f64, p.position as f64)),
                color.stroke_width(2),
            ))
            .map_err(plot_err)?
            .label(s.label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));

        if let Some(sp) = s.setpoint {
            let sp = sp as f64;
            chart
                .draw_series(DashedLineSeries::new(vec![(x0, sp), (x1, sp)], 8, 6, color.mix(0.6).stroke_width(1)))
                .map_err(plot_err)?;
        }
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;

    info!("[Export] plot written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_survive_a_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let samples = vec![Sample::new(0, 0), Sample::new(10, -42), Sample::new(20, 99_999)];

        write_samples_csv(&path, &samples).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("timestamp_ms,position\n"));
        assert_eq!(read_samples_csv(&path).unwrap(), samples);
    }

    #[test]
    fn summary_lists_response_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        let samples = [Sample::new(0, 0), Sample::new(10, 120), Sample::new(20, 100)];
        let stats = ResponseStats::from_samples(&samples, 100).unwrap();

        write_summary_csv(&path, &stats).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("metric,value,description\n"));
        assert!(text.contains("overshoot_ticks,20,"));
    }

    #[test]
    fn bounds_include_setpoints_and_reject_empty_input() {
        let samples = [Sample::new(0, 0), Sample::new(50, 10)];
        let series = [Series {
            label: "axis",
            samples: &samples,
            setpoint: Some(1_000),
        }];
        let ((x0, x1), (y0, y1)) = plot_bounds(&series).unwrap();
        assert_eq!((x0, x1), (0.0, 50.0));
        assert!(y0 < 0.0 && y1 > 1_000.0);

        let empty = [Series {
            label: "none",
            samples: &[],
            setpoint: None,
        }];
        assert!(plot_bounds(&empty).is_none());
    }
}
