//! Dispatch error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to read job file {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dispatch of {job:?} to {node} failed: {reason}")]
    DispatchFailed {
        job: String,
        node: String,
        reason: String,
    },
}
