//! Session summary export: one aggregated row per run.
//!
//! Appends to a persistent CSV (header written when the file is new) so
//! successive runs can be compared without re-parsing event traces.

use std::{
    fs::{OpenOptions, create_dir_all},
    io,
    path::Path,
};

use csv::WriterBuilder;
use log::info;
use serde::Serialize;

use crate::utils::metrics::{SharedMetrics, calculate_stats_u64};

#[derive(Debug, Serialize, PartialEq)]
pub struct SummaryRow {
    pub run_secs: f64,
    pub total_cycles: u64,
    pub commands_applied: u64,
    pub commands_rejected: u64,
    pub commands_superseded: u64,
    pub payloads_dropped: u64,
    pub sessions_opened: u64,
    pub failsafe_disconnect: u64,
    pub failsafe_idle: u64,
    pub loop_overruns: u64,
    pub overrun_rate: f64,
    pub max_cycle_us: u64,
    pub avg_queue_latency_us: f64,
    pub max_queue_latency_us: f64,
}

impl SummaryRow {
    pub fn from_metrics(metrics: &SharedMetrics, run_secs: f64) -> Self {
        let m = metrics.lock();
        let latency = calculate_stats_u64(&m.queue_latency_us);

        // Overrun rate as percentage; 0 if no cycles recorded
        let overrun_rate = if m.total_cycles > 0 {
            (m.loop_overruns as f64 / m.total_cycles as f64) * 100.0
        } else {
            0.0
        };

        SummaryRow {
            run_secs,
            total_cycles: m.total_cycles,
            commands_applied: m.commands_applied,
            commands_rejected: m.commands_rejected,
            commands_superseded: m.commands_superseded,
            payloads_dropped: m.payloads_dropped,
            sessions_opened: m.sessions_opened,
            failsafe_disconnect: m.failsafe_disconnect,
            failsafe_idle: m.failsafe_idle,
            loop_overruns: m.loop_overruns,
            overrun_rate,
            max_cycle_us: m.max_cycle_us,
            avg_queue_latency_us: latency.as_ref().map_or(0.0, |s| s.mean),
            max_queue_latency_us: latency.as_ref().map_or(0.0, |s| s.max),
        }
    }
}

/// Appends one summary row for this run to `csv_path`.
pub fn export_summary_csv(metrics: &SharedMetrics, run_secs: f64, csv_path: &Path) -> io::Result<()> {
    if let Some(dir) = csv_path.parent() {
        create_dir_all(dir)?;
    }
    let file_exists = csv_path.exists();

    let file = OpenOptions::new().create(true).append(true).open(csv_path)?;
    let mut wtr = WriterBuilder::new().has_headers(!file_exists).from_writer(file);

    let row = SummaryRow::from_metrics(metrics, run_secs);
    wtr.serialize(&row).map_err(io::Error::other)?;
    wtr.flush()?;

    info!("Summary exported to: {}", csv_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::metrics::Metrics;
    use parking_lot::Mutex;
    use std::{fs, sync::Arc};

    #[test]
    fn summary_appends_with_single_header() {
        let path = std::env::temp_dir().join(format!("rc_drive_summary_{}.csv", std::process::id()));
        let _ = fs::remove_file(&path);

        let metrics: SharedMetrics = Arc::new(Mutex::new(Metrics {
            total_cycles: 200,
            loop_overruns: 2,
            commands_applied: 5,
            ..Metrics::default()
        }));

        export_summary_csv(&metrics, 2.0, &path).unwrap();
        export_summary_csv(&metrics, 3.0, &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("run_secs,total_cycles,"));
        assert_eq!(lines.iter().filter(|l| l.starts_with("run_secs")).count(), 1);

        let row = SummaryRow::from_metrics(&metrics, 1.0);
        assert_eq!(row.overrun_rate, 1.0);
        assert_eq!(row.avg_queue_latency_us, 0.0);
        let _ = fs::remove_file(&path);
    }
}
