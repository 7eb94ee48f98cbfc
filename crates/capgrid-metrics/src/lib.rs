//! capgrid-metrics: time series for offline analysis.
//!
//! The control loop records one [`ClusterSample`] per cycle and one
//! controller step per applied node update. Both series are written as CSV
//! on shutdown (and once when the job queue drains). Column order is fixed;
//! downstream plotting scripts index columns by position.

pub mod collector;
pub mod export;

pub use collector::{ClusterSample, MetricsRecorder, SweepPoint};
pub use export::{
    CLUSTER_CSV, ExportError, controller_csv_name, render_cluster_csv, render_controller_csv,
    render_sweep_csv, write_sweep_csv,
};
