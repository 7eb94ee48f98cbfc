//! Registry error types.

use capgrid_cluster::ClusterError;
use thiserror::Error;

use crate::node::NodePhase;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("membership query failed after {attempts} attempts: {source}")]
    MembershipQueryFailed {
        attempts: u32,
        #[source]
        source: ClusterError,
    },

    #[error("{action} of node {node} failed: {source}")]
    NodeActionFailed {
        node: String,
        action: &'static str,
        #[source]
        source: ClusterError,
    },

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("cannot {action} node {node} while {phase}")]
    InvalidTransition {
        node: String,
        action: &'static str,
        phase: NodePhase,
    },

    #[error("node {0} is not removable")]
    NotRemovable(String),
}
