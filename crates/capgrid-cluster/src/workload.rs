//! Stress workloads.
//!
//! A single [`StressWorkload`] type covers both ways stress is applied:
//! spread across the whole cluster, or pinned to one node through its
//! `nodetype` label. Both share the same manifest construction and the same
//! deploy / await / sample / cleanup sequence.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::api::ClusterApi;
use crate::error::ClusterResult;
use crate::poll::{PollOutcome, poll_until};

/// Where a stress workload runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadScope {
    /// Scheduled anywhere in the cluster.
    Cluster,
    /// Pinned to one node via its `nodetype` label.
    Node { node_name: String, node_type: String },
}

/// Orchestrator-agnostic description of a workload object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadManifest {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub args: Vec<String>,
    /// Pods run in parallel.
    pub replicas: u32,
    /// Required `nodetype` label value, if pinned.
    pub node_type: Option<String>,
    /// Seconds the finished object is kept before the orchestrator reaps it.
    pub ttl_after_finished: u32,
}

impl WorkloadManifest {
    pub fn new(name: &str, namespace: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            image: image.to_string(),
            args: Vec::new(),
            replicas: 1,
            node_type: None,
            ttl_after_finished: 30,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_ttl(mut self, secs: u32) -> Self {
        self.ttl_after_finished = secs;
        self
    }

    pub fn pinned_to(mut self, node_type: &str) -> Self {
        self.node_type = Some(node_type.to_string());
        self
    }

    /// Label selector matching this workload's pods.
    pub fn selector(&self) -> String {
        format!("app={}", self.name)
    }
}

/// A stress-ng workload with its lifecycle operations.
#[derive(Debug, Clone)]
pub struct StressWorkload {
    manifest: WorkloadManifest,
    scope: WorkloadScope,
}

impl StressWorkload {
    /// Build a workload for `scope`; a node scope pins the manifest to the
    /// node's `nodetype` label.
    pub fn new(manifest: WorkloadManifest, scope: WorkloadScope) -> Self {
        let manifest = match &scope {
            WorkloadScope::Cluster => WorkloadManifest {
                node_type: None,
                ..manifest
            },
            WorkloadScope::Node { node_type, .. } => manifest.pinned_to(node_type),
        };
        Self { manifest, scope }
    }

    pub fn manifest(&self) -> &WorkloadManifest {
        &self.manifest
    }

    pub fn scope(&self) -> &WorkloadScope {
        &self.scope
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Create the workload, replacing a leftover object with the same name.
    pub async fn deploy(&self, api: &dyn ClusterApi) -> ClusterResult<()> {
        let m = &self.manifest;
        if api.workload_exists(&m.namespace, &m.name).await? {
            info!(workload = %m.name, "removing leftover workload before deploy");
            self.cleanup(api).await?;
        }

        api.create_workload(m).await?;
        info!(
            workload = %m.name,
            namespace = %m.namespace,
            replicas = m.replicas,
            node_type = m.node_type.as_deref().unwrap_or("*"),
            "workload deployed"
        );
        Ok(())
    }

    /// Wait until every replica is running. Query errors count as "not yet".
    pub async fn await_ready(
        &self,
        api: &dyn ClusterApi,
        timeout: Duration,
        interval: Duration,
    ) -> PollOutcome {
        let m = &self.manifest;
        let selector = m.selector();
        let outcome = poll_until(timeout, interval, || {
            let selector = selector.as_str();
            async move {
                match api.count_running(&m.namespace, selector).await {
                    Ok(running) => {
                        debug!(workload = %m.name, running, wanted = m.replicas, "readiness check");
                        running >= m.replicas
                    }
                    Err(e) => {
                        debug!(workload = %m.name, error = %e, "readiness check failed");
                        false
                    }
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready { elapsed } => {
                info!(workload = %m.name, ?elapsed, "workload ready");
            }
            PollOutcome::TimedOut { elapsed } => {
                warn!(workload = %m.name, ?elapsed, "timed out waiting for workload");
            }
        }
        outcome
    }

    /// Delete the workload and its pods.
    pub async fn cleanup(&self, api: &dyn ClusterApi) -> ClusterResult<()> {
        api.delete_workload(&self.manifest.namespace, &self.manifest.name)
            .await?;
        debug!(workload = %self.manifest.name, "workload cleaned up");
        Ok(())
    }

    /// Current CPU utilization of the nodes this workload stresses.
    ///
    /// Cluster scope samples every member; nodes whose metrics are missing
    /// are skipped.
    pub async fn sample_utilization(
        &self,
        api: &dyn ClusterApi,
    ) -> ClusterResult<Vec<(String, f64)>> {
        match &self.scope {
            WorkloadScope::Node { node_name, .. } => {
                let util = api.node_utilization(node_name).await?;
                Ok(vec![(node_name.clone(), util)])
            }
            WorkloadScope::Cluster => {
                let members = api.list_members().await?;
                let mut samples = Vec::with_capacity(members.len());
                for member in members {
                    match api.node_utilization(&member.name).await {
                        Ok(util) => samples.push((member.name, util)),
                        Err(e) => {
                            warn!(node = %member.name, error = %e, "skipping node without metrics")
                        }
                    }
                }
                Ok(samples)
            }
        }
    }
}
