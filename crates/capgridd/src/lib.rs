//! capgridd internals, split from the binary so integration tests can drive
//! the loop against an in-memory cluster.

pub mod control_loop;
pub mod operator;
pub mod sweep;

pub use control_loop::{ControlLoop, CycleReport, CycleSummary, ShutdownReport};
pub use operator::{ForcedAction, force_node};
pub use sweep::{SweepPlan, run_sweep};
