//! capgrid-dispatch: drains the job file into the cluster.
//!
//! Jobs leave the [`JobQueue`] in file order, at most one per control
//! cycle, no faster than the configured minimum interval, and only onto a
//! node whose running workloads are below its admission setpoint. A
//! saturated cluster leaves the head job queued for the next cycle.

pub mod dispatcher;
pub mod error;
pub mod queue;

pub use dispatcher::{DispatchOutcome, Dispatcher, LostJob};
pub use error::DispatchError;
pub use queue::JobQueue;
