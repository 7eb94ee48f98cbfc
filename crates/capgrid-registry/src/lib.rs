//! capgrid-registry: the authoritative in-memory model of every inventory
//! node.
//!
//! The [`ClusterRegistry`] is owned by the control loop and lent by `&mut`
//! to the scaling policy and the dispatcher. All state changes go through
//! its methods, so invariants such as "a master is never removable" are
//! enforced in one place.
//!
//! ```text
//! Inactive       ── appears ─────────────────► Active
//! Inactive       ── add accepted ────────────► AddCooldown ── appears ──► Active
//! Active         ── vanishes ────────────────► FailurePending
//! FailurePending ── reappears ───────────────► Active
//! FailurePending ── failure cooldown over ───► Inactive
//! Active         ── remove accepted ─────────► RemoveCooldown ── gone ──► Inactive
//! ```

pub mod error;
pub mod node;
pub mod registry;
pub mod retry;

pub use error::{RegistryError, RegistryResult};
pub use node::{Node, NodePhase};
pub use registry::{
    CleanupReport, ClusterRegistry, CycleSnapshot, MembershipSummary, NodeAction, NodeSample,
};
pub use retry::RetryPolicy;
