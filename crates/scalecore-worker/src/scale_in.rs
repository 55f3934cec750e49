//! Scale-In Node Selection (§4.8): pure node-selection strategies plus a
//! drain/terminate orchestration trait. Concrete node listings and the
//! actual drain/terminate RPCs are the remote provider's job — this
//! module only owns the algorithm.

use std::time::Duration;

use async_trait::async_trait;
use scalecore_core::PoolIdentifier;

use crate::error::{NodeNotReady, Result, ScaleInError};

/// Maximum number of not-ready nodes reported in a single
/// [`ScaleInError::NodesNotReady`] (§4.8).
const MAX_AGGREGATED_ERRORS: usize = 10;

/// A Nomad client node's eligibility-relevant state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Eligible for scale-in selection.
    Ready,
    /// Still joining the cluster; blocks selection for its whole pool.
    Initializing,
    /// Already draining; blocks selection for its whole pool.
    Draining,
}

impl NodeState {
    /// A stable label for errors and logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Initializing => "initializing",
            Self::Draining => "draining",
        }
    }
}

/// A candidate node for scale-in selection.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    /// Nomad node ID.
    pub id: String,
    /// The remote provider's identifier for the underlying instance.
    pub remote_resource_id: String,
    /// Higher means more recently created; `newest_create_index` uses
    /// this directly.
    pub create_index: u64,
    /// Currently allocated CPU (MHz), summed across allocations.
    pub allocated_cpu: i64,
    /// Currently allocated memory (MB), summed across allocations.
    pub allocated_memory: i64,
    /// Whether the node has any non-terminal allocation at all.
    pub has_non_terminal_alloc: bool,
    /// Whether the node has any non-terminal allocation that isn't from
    /// a system job.
    pub has_non_system_non_terminal_alloc: bool,
    /// Current node state.
    pub state: NodeState,
    /// The node's pool identity.
    pub pool: PoolIdentifier,
}

/// The four node-selection strategies (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// Rank by allocated CPU + allocated memory, ascending.
    LeastBusy,
    /// Use list order (nodes arrive create-index descending).
    NewestCreateIndex,
    /// Only nodes with no non-terminal allocations.
    Empty,
    /// Like `Empty`, but system-job allocations don't count.
    EmptyIgnoreSystem,
}

/// Filters `nodes` to the pool named by `pool`, rejects the call if any
/// pool member is not `Ready`, then selects up to `num` nodes per
/// `strategy`.
///
/// # Errors
///
/// Returns [`ScaleInError::NodesNotReady`] if any node in the pool is
/// `initializing` or `draining`.
pub fn select_nodes(
    nodes: &[NodeInfo],
    pool: &PoolIdentifier,
    strategy: SelectionStrategy,
    num: usize,
) -> Result<Vec<NodeInfo>> {
    let in_pool: Vec<&NodeInfo> = nodes.iter().filter(|n| pool.matches(&n.pool)).collect();

    let not_ready: Vec<NodeNotReady> = in_pool
        .iter()
        .filter(|n| n.state != NodeState::Ready)
        .take(MAX_AGGREGATED_ERRORS)
        .map(|n| NodeNotReady {
            node_id: n.id.clone(),
            state: n.state,
        })
        .collect();
    if !not_ready.is_empty() {
        return Err(ScaleInError::NodesNotReady(not_ready));
    }

    let selected: Vec<NodeInfo> = match strategy {
        SelectionStrategy::LeastBusy => {
            let mut ranked = in_pool;
            ranked.sort_by_key(|n| n.allocated_cpu + n.allocated_memory);
            ranked.into_iter().take(num).cloned().collect()
        }
        SelectionStrategy::NewestCreateIndex => {
            let mut ranked = in_pool;
            ranked.sort_by(|a, b| b.create_index.cmp(&a.create_index));
            ranked.into_iter().take(num).cloned().collect()
        }
        SelectionStrategy::Empty => in_pool
            .into_iter()
            .filter(|n| !n.has_non_terminal_alloc)
            .take(num)
            .cloned()
            .collect(),
        SelectionStrategy::EmptyIgnoreSystem => in_pool
            .into_iter()
            .filter(|n| !n.has_non_system_non_terminal_alloc)
            .take(num)
            .cloned()
            .collect(),
    };

    Ok(selected)
}

/// The remote-provider collaborator that actually drains and
/// deregisters nodes. A concrete Nomad/cloud-provider implementation is
/// out of scope; this trait is the seam worker-side orchestration (and
/// tests) depend on.
#[async_trait]
pub trait NodeDrainer: Send + Sync {
    /// Drains `node_id`, waiting for completion or `deadline`, whichever
    /// comes first.
    ///
    /// # Errors
    ///
    /// Returns an error if the drain could not be initiated or did not
    /// complete.
    async fn drain(&self, node_id: &str, deadline: Duration, ignore_system_jobs: bool) -> Result<()>;

    /// Deregisters a fully-drained node from the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if deregistration failed.
    async fn purge(&self, node_id: &str) -> Result<()>;
}

/// Drains every node in `nodes` (optionally purging it afterward),
/// returning `(nomadNodeID, remoteResourceID)` pairs for the target to
/// hand to the remote provider for termination (§4.8).
///
/// # Errors
///
/// Returns the first drain or purge failure; nodes processed before the
/// failure have already been drained (and, if `purge` is set, purged).
pub async fn drain_and_terminate(
    drainer: &dyn NodeDrainer,
    nodes: &[NodeInfo],
    drain_deadline: Duration,
    ignore_system_jobs: bool,
    purge: bool,
) -> Result<Vec<(String, String)>> {
    let mut terminated = Vec::with_capacity(nodes.len());
    for node in nodes {
        drainer.drain(&node.id, drain_deadline, ignore_system_jobs).await?;
        if purge {
            drainer.purge(&node.id).await?;
        }
        terminated.push((node.id.clone(), node.remote_resource_id.clone()));
    }
    Ok(terminated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, create_index: u64, cpu: i64, mem: i64, state: NodeState) -> NodeInfo {
        NodeInfo {
            id: id.to_string(),
            remote_resource_id: format!("i-{id}"),
            create_index,
            allocated_cpu: cpu,
            allocated_memory: mem,
            has_non_terminal_alloc: false,
            has_non_system_non_terminal_alloc: false,
            state,
            pool: PoolIdentifier {
                node_class: Some("default".into()),
                datacenter: None,
                node_pool: None,
            },
        }
    }

    fn pool() -> PoolIdentifier {
        PoolIdentifier {
            node_class: Some("default".into()),
            datacenter: None,
            node_pool: None,
        }
    }

    #[test]
    fn rejects_call_when_any_node_is_initializing() {
        let nodes = vec![
            node("n1", 1, 0, 0, NodeState::Ready),
            node("n2", 2, 0, 0, NodeState::Initializing),
        ];
        let err = select_nodes(&nodes, &pool(), SelectionStrategy::LeastBusy, 1).unwrap_err();
        assert!(matches!(err, ScaleInError::NodesNotReady(ref v) if v.len() == 1));
    }

    #[test]
    fn rejects_call_when_any_node_is_draining() {
        let nodes = vec![node("n1", 1, 0, 0, NodeState::Draining)];
        let err = select_nodes(&nodes, &pool(), SelectionStrategy::Empty, 1).unwrap_err();
        assert!(matches!(err, ScaleInError::NodesNotReady(_)));
    }

    #[test]
    fn least_busy_picks_lowest_combined_allocation() {
        let nodes = vec![
            node("busy", 1, 80, 80, NodeState::Ready),
            node("idle", 2, 10, 10, NodeState::Ready),
        ];
        let selected = select_nodes(&nodes, &pool(), SelectionStrategy::LeastBusy, 1).unwrap();
        assert_eq!(selected[0].id, "idle");
    }

    #[test]
    fn newest_create_index_picks_highest_index_first() {
        let nodes = vec![
            node("old", 1, 0, 0, NodeState::Ready),
            node("new", 5, 0, 0, NodeState::Ready),
        ];
        let selected = select_nodes(&nodes, &pool(), SelectionStrategy::NewestCreateIndex, 1).unwrap();
        assert_eq!(selected[0].id, "new");
    }

    #[test]
    fn empty_strategy_excludes_nodes_with_any_alloc() {
        let mut busy = node("busy", 1, 0, 0, NodeState::Ready);
        busy.has_non_terminal_alloc = true;
        let idle = node("idle", 2, 0, 0, NodeState::Ready);
        let selected = select_nodes(&[busy, idle], &pool(), SelectionStrategy::Empty, 5).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "idle");
    }

    #[test]
    fn empty_ignore_system_only_excludes_non_system_allocs() {
        let mut system_only = node("sys", 1, 0, 0, NodeState::Ready);
        system_only.has_non_terminal_alloc = true;
        system_only.has_non_system_non_terminal_alloc = false;
        let mut user_job = node("user", 2, 0, 0, NodeState::Ready);
        user_job.has_non_terminal_alloc = true;
        user_job.has_non_system_non_terminal_alloc = true;
        let selected =
            select_nodes(&[system_only, user_job], &pool(), SelectionStrategy::EmptyIgnoreSystem, 5).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "sys");
    }

    #[test]
    fn pool_filter_excludes_nodes_outside_the_pool() {
        let mut other_pool = node("n1", 1, 0, 0, NodeState::Ready);
        other_pool.pool.node_class = Some("gpu".into());
        let nodes = vec![other_pool, node("n2", 2, 0, 0, NodeState::Ready)];
        let selected = select_nodes(&nodes, &pool(), SelectionStrategy::LeastBusy, 5).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "n2");
    }

    struct RecordingDrainer {
        drained: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NodeDrainer for RecordingDrainer {
        async fn drain(&self, node_id: &str, _deadline: Duration, _ignore_system_jobs: bool) -> Result<()> {
            self.drained.lock().unwrap().push(node_id.to_string());
            Ok(())
        }

        async fn purge(&self, _node_id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn drain_and_terminate_returns_node_and_resource_id_pairs() {
        let drainer = RecordingDrainer {
            drained: std::sync::Mutex::new(Vec::new()),
        };
        let nodes = vec![node("n1", 1, 0, 0, NodeState::Ready)];
        let pairs = drain_and_terminate(&drainer, &nodes, Duration::from_secs(60), false, false)
            .await
            .unwrap();
        assert_eq!(pairs, vec![("n1".to_string(), "i-n1".to_string())]);
        assert_eq!(*drainer.drained.lock().unwrap(), vec!["n1".to_string()]);
    }
}
