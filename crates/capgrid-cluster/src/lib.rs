//! capgrid-cluster: everything the control loop knows about the cluster
//! it drives.
//!
//! The control plane is a client of an orchestration API. This crate
//! defines that boundary as the [`ClusterApi`] trait and ships two
//! implementations:
//!
//! ```text
//! ClusterApi
//!   ├── KubeClient      → Kubernetes REST API (nodes, metrics.k8s.io, batch/v1 jobs)
//!   └── InMemoryCluster → in-process cluster model (dry runs, tests)
//!
//! StressWorkload (cluster- or node-scoped)
//!   ├── deploy()             → replace any leftover, create
//!   ├── await_ready()        → poll_until() running == replicas
//!   ├── sample_utilization() → per-node CPU percent
//!   └── cleanup()
//! ```

pub mod api;
pub mod error;
pub mod kube;
pub mod memory;
pub mod poll;
pub mod quantity;
pub mod workload;

pub use api::{ApiFuture, ClusterApi, Member};
pub use error::{ClusterError, ClusterResult};
pub use kube::KubeClient;
pub use memory::InMemoryCluster;
pub use poll::{PollOutcome, poll_until, poll_until_blocking};
pub use workload::{StressWorkload, WorkloadManifest, WorkloadScope};
