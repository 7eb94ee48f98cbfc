//! CSV rendering and file export.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use capgrid_admission::ControlSample;
use thiserror::Error;
use tracing::info;

use crate::collector::{ClusterSample, MetricsRecorder, SweepPoint};

pub const CLUSTER_CSV: &str = "cluster_metrics.csv";

const CLUSTER_HEADER: &str = "timestamp,active_node_count,max_pods,total_pods";
const CONTROLLER_HEADER: &str = "Pods (Control Input),Measured CPU Utilization,Error";
const SWEEP_HEADER: &str = "Max Pods,CPU Utilization";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn render_cluster_csv(samples: &[ClusterSample]) -> String {
    let mut out = String::with_capacity(64 * (samples.len() + 1));
    out.push_str(CLUSTER_HEADER);
    out.push('\n');
    for s in samples {
        let _ = writeln!(
            out,
            "{},{},{},{}",
            s.timestamp.format(TIMESTAMP_FORMAT),
            s.active_nodes,
            s.max_pods,
            s.total_pods
        );
    }
    out
}

pub fn render_controller_csv(samples: &[ControlSample]) -> String {
    let mut out = String::with_capacity(32 * (samples.len() + 1));
    out.push_str(CONTROLLER_HEADER);
    out.push('\n');
    for s in samples {
        let _ = writeln!(out, "{},{},{}", s.max_pods, s.measured, s.error);
    }
    out
}

pub fn render_sweep_csv(points: &[SweepPoint]) -> String {
    let mut out = String::new();
    out.push_str(SWEEP_HEADER);
    out.push('\n');
    for p in points {
        let _ = writeln!(out, "{},{}", p.max_pods, p.utilization);
    }
    out
}

fn write_file(path: &Path, content: &str) -> Result<(), ExportError> {
    std::fs::write(path, content).map_err(|source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn ensure_dir(dir: &Path) -> Result<(), ExportError> {
    std::fs::create_dir_all(dir).map_err(|source| ExportError::Write {
        path: dir.to_path_buf(),
        source,
    })
}

/// File name of a node's controller trace.
pub fn controller_csv_name(node: &str) -> String {
    format!("controller_{node}.csv")
}

impl MetricsRecorder {
    /// Write the cluster series and one controller trace per node into
    /// `dir`, replacing earlier exports. Returns the files written.
    pub fn write_csv(&self, dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
        ensure_dir(dir)?;

        let mut written = Vec::with_capacity(self.controllers().len() + 1);
        let cluster_path = dir.join(CLUSTER_CSV);
        write_file(&cluster_path, &render_cluster_csv(self.cluster()))?;
        written.push(cluster_path);

        for (node, steps) in self.controllers() {
            let path = dir.join(controller_csv_name(node));
            write_file(&path, &render_controller_csv(steps))?;
            written.push(path);
        }

        info!(
            dir = %dir.display(),
            files = written.len(),
            cycles = self.cluster().len(),
            "metrics exported"
        );
        Ok(written)
    }
}

pub fn write_sweep_csv(path: &Path, points: &[SweepPoint]) -> Result<(), ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    write_file(path, &render_sweep_csv(points))
}
