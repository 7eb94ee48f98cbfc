//! One-shot operator actions outside the control loop.

use std::time::Instant;

use anyhow::{Context, bail};
use capgrid_cluster::ClusterApi;
use capgrid_registry::{ClusterRegistry, NodeAction};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedAction {
    Add,
    Remove,
}

/// Reconcile membership, then add or remove one inventory node.
///
/// The same lifecycle rules as the loop apply: masters are never removed,
/// only inactive nodes are added and only active ones removed.
pub async fn force_node(
    registry: &mut ClusterRegistry,
    api: &dyn ClusterApi,
    action: ForcedAction,
    name: &str,
    now: Instant,
) -> anyhow::Result<()> {
    let summary = registry
        .refresh_membership(api, now)
        .await
        .context("reading cluster membership")?;
    info!(members = summary.members, active = summary.active, "membership loaded");

    let result = match action {
        ForcedAction::Add => registry.add_node(api, name, now).await,
        ForcedAction::Remove => registry.remove_node(api, name, now).await,
    };

    match result.with_context(|| format!("{action:?} {name}"))? {
        NodeAction::Applied => {
            info!(node = name, ?action, "node action applied");
            Ok(())
        }
        NodeAction::Suppressed { remaining } => {
            bail!("{action:?} {name} suppressed by cooldown, {}s left", remaining.as_secs())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capgrid_cluster::InMemoryCluster;
    use capgrid_core::CapgridConfig;
    use capgrid_core::NodeRole;
    use capgrid_registry::NodePhase;

    const CONFIG: &str = r#"
[control]
kp = 0.094
ki = 0.006

[api]
server = "https://127.0.0.1:6443"

[[nodes]]
name = "node0"
address = "10.0.0.1"
role = "master"
node_type = "worker0"

[[nodes]]
name = "node1"
address = "10.0.0.2"
role = "worker"
node_type = "worker1"
"#;

    fn registry() -> ClusterRegistry {
        ClusterRegistry::from_config(&CapgridConfig::parse(CONFIG).unwrap())
    }

    #[tokio::test]
    async fn add_then_remove_worker() {
        let api = InMemoryCluster::new().with_member("node0", NodeRole::Master);
        let mut reg = registry();

        force_node(&mut reg, &api, ForcedAction::Add, "node1", Instant::now())
            .await
            .unwrap();
        assert_eq!(api.created_nodes(), vec!["node1"]);
        assert_eq!(reg.node("node1").map(|n| n.phase()), Some(NodePhase::AddCooldown));

        // A fresh registry, as a second invocation would build.
        let mut reg = registry();
        force_node(&mut reg, &api, ForcedAction::Remove, "node1", Instant::now())
            .await
            .unwrap();
        assert_eq!(api.deleted_nodes(), vec!["node1"]);
        assert_eq!(api.drained_nodes(), vec!["node1"]);
    }

    #[tokio::test]
    async fn master_cannot_be_removed() {
        let api = InMemoryCluster::new().with_member("node0", NodeRole::Master);
        let mut reg = registry();

        let err = force_node(&mut reg, &api, ForcedAction::Remove, "node0", Instant::now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("node0"));
        assert!(api.deleted_nodes().is_empty());
    }

    #[tokio::test]
    async fn unknown_node_is_an_error() {
        let api = InMemoryCluster::new().with_member("node0", NodeRole::Master);
        let mut reg = registry();

        let result = force_node(&mut reg, &api, ForcedAction::Add, "node9", Instant::now()).await;
        assert!(result.is_err());
        assert!(api.created_nodes().is_empty());
    }
}
