//! capgrid-core: shared types for the capgrid control plane.
//!
//! - **`config`**: `capgrid.toml` parser and startup validation
//! - **`types`**: static node inventory (`NodeSpec`, roles, labels)
//! - **`job`**: stress workload command parsing (`Job`, `StressorParams`)

pub mod config;
pub mod job;
pub mod types;

pub use config::{CapgridConfig, ConfigError, parse_duration};
pub use job::{Job, JobParseError, StressorParams};
pub use types::*;
