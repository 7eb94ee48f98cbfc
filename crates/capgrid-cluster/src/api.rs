//! The orchestration API boundary.

use std::future::Future;
use std::pin::Pin;

use capgrid_core::{NodeRole, NodeSpec};

use crate::error::ClusterResult;
use crate::workload::WorkloadManifest;

/// Boxed future returned by every [`ClusterApi`] call.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = ClusterResult<T>> + Send + 'a>>;

/// A node currently registered with the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub role: NodeRole,
}

impl Member {
    pub fn new(name: &str, role: NodeRole) -> Self {
        Self {
            name: name.to_string(),
            role,
        }
    }
}

/// Operations the control loop consumes from the cluster orchestrator.
///
/// Calls may block for a network round trip; callers await them in order
/// and never overlap two calls that mutate the same node.
pub trait ClusterApi: Send + Sync {
    /// List the current cluster members.
    fn list_members(&self) -> ApiFuture<'_, Vec<Member>>;

    /// CPU utilization of a node in percent of its capacity.
    fn node_utilization<'a>(&'a self, node: &'a str) -> ApiFuture<'a, f64>;

    /// Number of workloads in phase `Running` on `node` within `namespace`.
    fn running_workloads<'a>(&'a self, node: &'a str, namespace: &'a str) -> ApiFuture<'a, u32>;

    /// Register an inventory node with the cluster.
    fn create_node<'a>(&'a self, spec: &'a NodeSpec) -> ApiFuture<'a, ()>;

    /// Remove a node from the cluster.
    fn delete_node<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ()>;

    /// Whether a workload object exists. "Not found" is `Ok(false)`.
    fn workload_exists<'a>(&'a self, namespace: &'a str, name: &'a str) -> ApiFuture<'a, bool>;

    /// Create a workload object.
    fn create_workload<'a>(&'a self, manifest: &'a WorkloadManifest) -> ApiFuture<'a, ()>;

    /// Delete a workload object and its pods. Deleting a missing workload
    /// succeeds.
    fn delete_workload<'a>(&'a self, namespace: &'a str, name: &'a str) -> ApiFuture<'a, ()>;

    /// Number of running pods matching a label selector.
    fn count_running<'a>(&'a self, namespace: &'a str, selector: &'a str) -> ApiFuture<'a, u32>;

    /// Delete every workload pod scheduled on `node`. Returns how many were
    /// deleted.
    fn drain_node<'a>(&'a self, node: &'a str, namespace: &'a str) -> ApiFuture<'a, u32>;
}
