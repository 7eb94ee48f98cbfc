//! Static inventory types shared across capgrid crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a node. The inventory uses the cluster node name.
pub type NodeId = String;

/// Role label of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Control-plane node. Never removable.
    Master,
    Worker,
}

impl NodeRole {
    /// Parse the `role` label reported by the orchestration API.
    ///
    /// Anything other than `master` is treated as a worker.
    pub fn from_label(label: &str) -> Self {
        if label.eq_ignore_ascii_case("master") {
            NodeRole::Master
        } else {
            NodeRole::Worker
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Worker => "worker",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Labels attached to a node when it joins the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLabels {
    pub role: NodeRole,
    /// Value of the `nodetype` label used for workload affinity (e.g. `worker1`).
    pub node_type: String,
}

/// Immutable inventory entry for one node the control plane may manage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Cluster node name, also used as the node id.
    pub name: NodeId,
    /// Internal IP address advertised when the node is created.
    pub address: String,
    #[serde(flatten)]
    pub labels: NodeLabels,
}

impl NodeSpec {
    pub fn new(name: &str, address: &str, role: NodeRole, node_type: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            labels: NodeLabels {
                role,
                node_type: node_type.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_from_label() {
        assert_eq!(NodeRole::from_label("master"), NodeRole::Master);
        assert_eq!(NodeRole::from_label("Master"), NodeRole::Master);
        assert_eq!(NodeRole::from_label("worker"), NodeRole::Worker);
        assert_eq!(NodeRole::from_label("unknown"), NodeRole::Worker);
    }

    #[test]
    fn node_spec_flattens_labels() {
        let spec: NodeSpec = toml::from_str(
            r#"
name = "node1"
address = "10.0.0.2"
role = "worker"
node_type = "worker1"
"#,
        )
        .unwrap();
        assert_eq!(spec, NodeSpec::new("node1", "10.0.0.2", NodeRole::Worker, "worker1"));
    }
}
