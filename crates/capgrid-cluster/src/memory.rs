//! In-process cluster model.
//!
//! `InMemoryCluster` implements [`ClusterApi`] over plain maps. It backs the
//! `--dry-run` mode of the daemon and every test that needs a cluster:
//! utilization, running counts and failures are set from the outside, and
//! every mutating call is recorded so tests can assert on it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use capgrid_core::{NodeRole, NodeSpec};
use tracing::debug;

use crate::api::{ApiFuture, ClusterApi, Member};
use crate::error::ClusterError;
use crate::workload::WorkloadManifest;

#[derive(Debug)]
struct Inner {
    members: Vec<Member>,
    utilization: HashMap<String, f64>,
    running: HashMap<String, u32>,
    metrics_failures: HashSet<String>,
    membership_failures: u32,
    rejected_nodes: HashSet<String>,
    drain_failures: HashSet<String>,
    workloads: BTreeMap<(String, String), WorkloadManifest>,
    workloads_ready: bool,

    // ── Call log ───────────────────────────────────────────────────
    list_calls: u32,
    created_nodes: Vec<String>,
    deleted_nodes: Vec<String>,
    created_workloads: Vec<String>,
    deleted_workloads: Vec<String>,
    drained_nodes: Vec<String>,
}

/// Shared, cloneable in-memory cluster.
#[derive(Debug, Clone)]
pub struct InMemoryCluster {
    inner: Arc<Mutex<Inner>>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                members: Vec::new(),
                utilization: HashMap::new(),
                running: HashMap::new(),
                metrics_failures: HashSet::new(),
                membership_failures: 0,
                rejected_nodes: HashSet::new(),
                drain_failures: HashSet::new(),
                workloads: BTreeMap::new(),
                workloads_ready: true,
                list_calls: 0,
                created_nodes: Vec::new(),
                deleted_nodes: Vec::new(),
                created_workloads: Vec::new(),
                deleted_workloads: Vec::new(),
                drained_nodes: Vec::new(),
            })),
        }
    }

    /// Cluster whose members are the given inventory entries.
    pub fn from_inventory(nodes: &[NodeSpec]) -> Self {
        let cluster = Self::new();
        for spec in nodes {
            cluster.add_member(&spec.name, spec.labels.role);
        }
        cluster
    }

    pub fn with_member(self, name: &str, role: NodeRole) -> Self {
        self.add_member(name, role);
        self
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Fault and load injection ───────────────────────────────────

    pub fn add_member(&self, name: &str, role: NodeRole) {
        let mut s = self.state();
        if !s.members.iter().any(|m| m.name == name) {
            s.members.push(Member::new(name, role));
        }
    }

    /// Drop a member without going through `delete_node`, as a crashed
    /// node would disappear.
    pub fn remove_member(&self, name: &str) {
        self.state().members.retain(|m| m.name != name);
    }

    pub fn set_utilization(&self, node: &str, percent: f64) {
        self.state().utilization.insert(node.to_string(), percent);
    }

    pub fn set_running(&self, node: &str, count: u32) {
        self.state().running.insert(node.to_string(), count);
    }

    pub fn fail_metrics_for(&self, node: &str) {
        self.state().metrics_failures.insert(node.to_string());
    }

    pub fn restore_metrics_for(&self, node: &str) {
        self.state().metrics_failures.remove(node);
    }

    /// Make the next `count` membership queries fail.
    pub fn fail_membership_queries(&self, count: u32) {
        self.state().membership_failures = count;
    }

    /// Reject create and delete calls for `node`.
    pub fn reject_node_actions_for(&self, node: &str) {
        self.state().rejected_nodes.insert(node.to_string());
    }

    /// Make draining `node` fail.
    pub fn fail_drain_for(&self, node: &str) {
        self.state().drain_failures.insert(node.to_string());
    }

    /// Whether created workloads ever report their pods as running.
    pub fn set_workloads_ready(&self, ready: bool) {
        self.state().workloads_ready = ready;
    }

    // ── Observations ───────────────────────────────────────────────

    pub fn member_names(&self) -> Vec<String> {
        self.state().members.iter().map(|m| m.name.clone()).collect()
    }

    pub fn list_calls(&self) -> u32 {
        self.state().list_calls
    }

    pub fn created_nodes(&self) -> Vec<String> {
        self.state().created_nodes.clone()
    }

    pub fn deleted_nodes(&self) -> Vec<String> {
        self.state().deleted_nodes.clone()
    }

    pub fn created_workloads(&self) -> Vec<String> {
        self.state().created_workloads.clone()
    }

    pub fn deleted_workloads(&self) -> Vec<String> {
        self.state().deleted_workloads.clone()
    }

    pub fn drained_nodes(&self) -> Vec<String> {
        self.state().drained_nodes.clone()
    }

    /// Manifests of the workloads currently present.
    pub fn workloads(&self) -> Vec<WorkloadManifest> {
        self.state().workloads.values().cloned().collect()
    }
}

impl ClusterApi for InMemoryCluster {
    fn list_members(&self) -> ApiFuture<'_, Vec<Member>> {
        Box::pin(async move {
            let mut s = self.state();
            s.list_calls += 1;
            if s.membership_failures > 0 {
                s.membership_failures -= 1;
                return Err(ClusterError::Status {
                    status: 503,
                    body: "membership query failed".to_string(),
                });
            }
            Ok(s.members.clone())
        })
    }

    fn node_utilization<'a>(&'a self, node: &'a str) -> ApiFuture<'a, f64> {
        Box::pin(async move {
            let s = self.state();
            if !s.members.iter().any(|m| m.name == node) {
                return Err(ClusterError::NotFound(format!("node {node}")));
            }
            if s.metrics_failures.contains(node) {
                return Err(ClusterError::MetricsUnavailable {
                    node: node.to_string(),
                    reason: "metrics query failed".to_string(),
                });
            }
            s.utilization
                .get(node)
                .copied()
                .ok_or_else(|| ClusterError::MetricsUnavailable {
                    node: node.to_string(),
                    reason: "no sample recorded".to_string(),
                })
        })
    }

    fn running_workloads<'a>(&'a self, node: &'a str, _namespace: &'a str) -> ApiFuture<'a, u32> {
        Box::pin(async move { Ok(self.state().running.get(node).copied().unwrap_or(0)) })
    }

    fn create_node<'a>(&'a self, spec: &'a NodeSpec) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let mut s = self.state();
            if s.rejected_nodes.contains(&spec.name) {
                return Err(ClusterError::Rejected(format!("create node {}", spec.name)));
            }
            s.created_nodes.push(spec.name.clone());
            if !s.members.iter().any(|m| m.name == spec.name) {
                s.members.push(Member::new(&spec.name, spec.labels.role));
            }
            debug!(node = %spec.name, "in-memory node created");
            Ok(())
        })
    }

    fn delete_node<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let mut s = self.state();
            if s.rejected_nodes.contains(name) {
                return Err(ClusterError::Rejected(format!("delete node {name}")));
            }
            s.deleted_nodes.push(name.to_string());
            s.members.retain(|m| m.name != name);
            s.running.remove(name);
            debug!(node = %name, "in-memory node deleted");
            Ok(())
        })
    }

    fn workload_exists<'a>(&'a self, namespace: &'a str, name: &'a str) -> ApiFuture<'a, bool> {
        Box::pin(async move {
            let key = (namespace.to_string(), name.to_string());
            Ok(self.state().workloads.contains_key(&key))
        })
    }

    fn create_workload<'a>(&'a self, manifest: &'a WorkloadManifest) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let mut s = self.state();
            let key = (manifest.namespace.clone(), manifest.name.clone());
            if s.workloads.contains_key(&key) {
                return Err(ClusterError::Status {
                    status: 409,
                    body: format!("workload {} already exists", manifest.name),
                });
            }
            s.created_workloads.push(manifest.name.clone());
            s.workloads.insert(key, manifest.clone());
            Ok(())
        })
    }

    fn delete_workload<'a>(&'a self, namespace: &'a str, name: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let mut s = self.state();
            let key = (namespace.to_string(), name.to_string());
            if s.workloads.remove(&key).is_some() {
                s.deleted_workloads.push(name.to_string());
            }
            Ok(())
        })
    }

    fn count_running<'a>(&'a self, namespace: &'a str, selector: &'a str) -> ApiFuture<'a, u32> {
        Box::pin(async move {
            let s = self.state();
            if !s.workloads_ready {
                return Ok(0);
            }
            Ok(s.workloads
                .values()
                .filter(|w| w.namespace == namespace && w.selector() == selector)
                .map(|w| w.replicas)
                .sum())
        })
    }

    fn drain_node<'a>(&'a self, node: &'a str, _namespace: &'a str) -> ApiFuture<'a, u32> {
        Box::pin(async move {
            let mut s = self.state();
            if s.drain_failures.contains(node) {
                return Err(ClusterError::Status {
                    status: 500,
                    body: format!("drain of {node} failed"),
                });
            }
            s.drained_nodes.push(node.to_string());
            Ok(s.running.insert(node.to_string(), 0).unwrap_or(0))
        })
    }
}
