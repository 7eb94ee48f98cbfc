//! In-memory recorder for cluster and controller series.

use std::collections::BTreeMap;

use capgrid_admission::ControlSample;
use capgrid_registry::CycleSnapshot;
use chrono::{Local, NaiveDateTime};

/// One row of the cluster series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSample {
    pub timestamp: NaiveDateTime,
    pub active_nodes: usize,
    /// Workloads the active nodes could hold: setpoint plus running, summed.
    pub max_pods: u32,
    /// Running workloads across active nodes.
    pub total_pods: u32,
}

/// One point of a capacity sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPoint {
    pub max_pods: u32,
    pub utilization: f64,
}

/// Accumulates every series for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    cluster: Vec<ClusterSample>,
    controllers: BTreeMap<String, Vec<ControlSample>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cycle stamped with the local wall clock.
    pub fn record_cycle(&mut self, snapshot: &CycleSnapshot) {
        self.record_cycle_at(snapshot, Local::now().naive_local());
    }

    pub fn record_cycle_at(&mut self, snapshot: &CycleSnapshot, timestamp: NaiveDateTime) {
        self.cluster.push(ClusterSample {
            timestamp,
            active_nodes: snapshot.active_count,
            max_pods: snapshot.admission_ceiling(),
            total_pods: snapshot.running_workloads,
        });

        for node in &snapshot.nodes {
            if let Some(step) = node.applied {
                self.controllers
                    .entry(node.node.clone())
                    .or_default()
                    .push(step);
            }
        }
    }

    pub fn cluster(&self) -> &[ClusterSample] {
        &self.cluster
    }

    /// Controller steps per node, in node-name order.
    pub fn controllers(&self) -> &BTreeMap<String, Vec<ControlSample>> {
        &self.controllers
    }

    pub fn is_empty(&self) -> bool {
        self.cluster.is_empty()
    }
}
