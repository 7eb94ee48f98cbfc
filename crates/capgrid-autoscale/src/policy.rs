//! Scaling policy: decides node additions and removals once per cycle.

use std::fmt;
use std::time::{Duration, Instant};

use capgrid_cluster::ClusterApi;
use capgrid_core::config::CapgridConfig;
use capgrid_registry::{ClusterRegistry, NodeAction, RegistryError};
use tracing::{debug, info, warn};

/// What the policy did this cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ScaleDecision {
    /// An add was issued for `node`.
    ScaleUp { node: String },
    /// A remove was issued for `node`.
    ScaleDown { node: String },
    /// The action was wanted but a cooldown held it back.
    Suppressed { node: String, remaining: Duration },
    /// The action was wanted but no node qualifies.
    NoCandidate,
    /// Utilization is low; `remaining` more low cycles before a removal.
    DownscalePending { remaining: u32 },
    /// The orchestrator rejected the action.
    Failed { node: String, reason: String },
    NoChange,
}

impl fmt::Display for ScaleDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleDecision::ScaleUp { node } => write!(f, "scale_up({node})"),
            ScaleDecision::ScaleDown { node } => write!(f, "scale_down({node})"),
            ScaleDecision::Suppressed { node, remaining } => {
                write!(f, "suppressed({node}, {}s left)", remaining.as_secs())
            }
            ScaleDecision::NoCandidate => f.write_str("no_candidate"),
            ScaleDecision::DownscalePending { remaining } => {
                write!(f, "downscale_pending({remaining})")
            }
            ScaleDecision::Failed { node, .. } => write!(f, "failed({node})"),
            ScaleDecision::NoChange => f.write_str("no_change"),
        }
    }
}

/// Rule-based scaling with a debounced scale-down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingPolicy {
    /// Average utilization (percent) above which a node is added.
    pub operating_point: f64,
    /// Fraction of the operating point below which a cycle counts as low.
    pub downscale_threshold: f64,
    /// Consecutive low cycles required before a removal.
    pub downscale_cycles: u32,
}

impl ScalingPolicy {
    pub fn new(operating_point: f64, downscale_threshold: f64, downscale_cycles: u32) -> Self {
        Self {
            operating_point,
            downscale_threshold,
            downscale_cycles,
        }
    }

    pub fn from_config(config: &CapgridConfig) -> Self {
        Self::new(
            config.control.target_utilization,
            config.scaling.downscale_threshold,
            config.scaling.downscale_cycles,
        )
    }

    /// Utilization below which a cycle counts toward scale-down.
    pub fn low_watermark(&self) -> f64 {
        self.downscale_threshold * self.operating_point
    }

    /// Evaluate the rules against the registry and issue at most one node
    /// action. Action failures are reported, never propagated.
    pub async fn evaluate(
        &self,
        registry: &mut ClusterRegistry,
        api: &dyn ClusterApi,
        now: Instant,
    ) -> ScaleDecision {
        let avg = registry.average_active_utilization();

        if avg > self.operating_point {
            registry.reset_low_utilization(self.downscale_cycles);
            return self.scale_up(registry, api, avg, now).await;
        }

        if avg < self.low_watermark() {
            let remaining = registry.tick_low_utilization();
            if remaining > 0 {
                debug!(avg, remaining, "low utilization, scale-down pending");
                return ScaleDecision::DownscalePending { remaining };
            }
            let decision = self.scale_down(registry, api, avg, now).await;
            registry.reset_low_utilization(self.downscale_cycles);
            return decision;
        }

        ScaleDecision::NoChange
    }

    async fn scale_up(
        &self,
        registry: &mut ClusterRegistry,
        api: &dyn ClusterApi,
        avg: f64,
        now: Instant,
    ) -> ScaleDecision {
        let Some(node) = registry.select_scale_up_candidate().map(|n| n.name().to_string()) else {
            info!(avg, "utilization above operating point, no inactive node to add");
            return ScaleDecision::NoCandidate;
        };

        info!(avg, operating_point = self.operating_point, %node, "scaling up");
        let result = registry.add_node(api, &node, now).await;
        Self::into_decision(result, node, true)
    }

    async fn scale_down(
        &self,
        registry: &mut ClusterRegistry,
        api: &dyn ClusterApi,
        avg: f64,
        now: Instant,
    ) -> ScaleDecision {
        let Some(node) = registry.select_removal_candidate().map(|n| n.name().to_string()) else {
            info!(avg, "sustained low utilization, no removable node");
            return ScaleDecision::NoCandidate;
        };

        info!(avg, low_watermark = self.low_watermark(), %node, "scaling down");
        let result = registry.remove_node(api, &node, now).await;
        Self::into_decision(result, node, false)
    }

    fn into_decision(
        result: Result<NodeAction, RegistryError>,
        node: String,
        up: bool,
    ) -> ScaleDecision {
        match result {
            Ok(NodeAction::Applied) if up => ScaleDecision::ScaleUp { node },
            Ok(NodeAction::Applied) => ScaleDecision::ScaleDown { node },
            Ok(NodeAction::Suppressed { remaining }) => {
                ScaleDecision::Suppressed { node, remaining }
            }
            Err(e) => {
                warn!(%node, error = %e, "scaling action failed");
                ScaleDecision::Failed {
                    node,
                    reason: e.to_string(),
                }
            }
        }
    }
}
