//! Error kinds for cluster scale-in node selection (§4.8). The worker's
//! own per-evaluation pipeline never surfaces a `Result`: every failure
//! there resolves to an ack (no-op/dry-run/target gone) or a nack
//! (retry), logged in place.

use thiserror::Error;

/// Result type used by the scale-in module.
pub type Result<T> = std::result::Result<T, ScaleInError>;

/// One node in the pool that failed the initializing/draining guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeNotReady {
    /// The offending node's ID.
    pub node_id: String,
    /// Its current (non-`Ready`) state.
    pub state: crate::scale_in::NodeState,
}

/// Errors from selecting or draining nodes for a cluster scale-in.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScaleInError {
    /// One or more nodes in the pool are `initializing` or `draining`;
    /// the caller should retry rather than proceed with a partial pool
    /// view. Capped at 10 entries per §4.8.
    #[error("{} node(s) in the pool are not eligible for scale-in (showing up to 10)", .0.len())]
    NodesNotReady(Vec<NodeNotReady>),

    /// Draining a selected node failed.
    #[error("failed to drain node {node_id}: {reason}")]
    DrainFailed {
        /// The node that failed to drain.
        node_id: String,
        /// Why the drain failed.
        reason: String,
    },

    /// Purging (deregistering) a drained node failed.
    #[error("failed to purge node {node_id}: {reason}")]
    PurgeFailed {
        /// The node that failed to purge.
        node_id: String,
        /// Why the purge failed.
        reason: String,
    },
}
