//! capgrid-autoscale: cluster-wide scaling policy.
//!
//! Node additions and removals are slow and expensive to undo, so the
//! policy is a plain rule set rather than a controller: scale up as soon as
//! the average utilization of active nodes exceeds the operating point,
//! scale down only after several consecutive low cycles.

pub mod policy;

pub use policy::{ScaleDecision, ScalingPolicy};
