//! capgrid-admission: per-node admission control.
//!
//! Each node owns one [`AdmissionController`]. Once per control cycle the
//! controller turns the node's measured CPU utilization into a pod-capacity
//! setpoint (`max_pods`) using the incremental form of a discrete PI law:
//!
//! ```text
//! e(k) = target - measured
//! u(k) = u(k-1) + (Kp + Ki) * e(k) - Kp * e(k-1)
//! max_pods = clamp(floor(u(k)), min_pods, max_pods_limit)
//! ```
//!
//! A missing sample never counts as zero utilization: the cycle is skipped
//! and the previous setpoint is kept.

pub mod controller;

pub use controller::{AdmissionController, AdmissionLimits, ControlSample, ControllerState, PiGains};
