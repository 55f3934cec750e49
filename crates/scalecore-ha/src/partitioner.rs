//! The HA Partitioner itself (§4.3): owns this replica's registration,
//! the current ring snapshot, and `FilterPolicies`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::ServiceCatalog;
use crate::error::Result;
use crate::ring::HashRing;

/// Partitions a stream of policy IDs across live replicas using a
/// consistent-hash ring over catalog membership.
///
/// Construction registers this replica in the catalog; `run` drives the
/// membership watch until its `CancellationToken` fires, at which point
/// the replica deregisters itself (best-effort; an ungraceful exit is
/// instead caught by the catalog's own health-check timeout, per §4.3).
pub struct HaPartitioner {
    service: String,
    member_id: String,
    catalog: Arc<dyn ServiceCatalog>,
    ring: RwLock<HashRing>,
    ready: AtomicBool,
}

impl HaPartitioner {
    /// Registers `member_id` under `service` in `catalog` and returns a
    /// partitioner with an empty ring; call `run` to start tracking
    /// membership.
    ///
    /// # Errors
    ///
    /// Returns an error if registration with the catalog fails.
    pub async fn register(
        catalog: Arc<dyn ServiceCatalog>,
        service: impl Into<String>,
        member_id: impl Into<String>,
    ) -> Result<Self> {
        let service = service.into();
        let member_id = member_id.into();
        catalog.register(&service, &member_id).await?;
        info!(service, member_id, "registered HA partitioner member");
        Ok(Self {
            service,
            member_id,
            catalog,
            ring: RwLock::new(HashRing::default()),
            ready: AtomicBool::new(false),
        })
    }

    /// This replica's stable member ID.
    #[must_use]
    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    /// Drives the membership watch until `cancel` fires, rebuilding the
    /// ring on every membership change and re-emitting a filtered-ID
    /// notification on `on_rebalance` (the manager's reload hook).
    ///
    /// # Errors
    ///
    /// Returns an error if the initial watch subscription fails.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        on_rebalance: watch::Sender<()>,
    ) -> Result<()> {
        let mut members = self.catalog.watch(&self.service).await?;
        loop {
            let snapshot = members.borrow().clone();
            *self.ring.write() = HashRing::from_members(snapshot);
            self.ready.store(true, Ordering::Release);
            let _ = on_rebalance.send(());

            tokio::select! {
                () = cancel.cancelled() => {
                    if let Err(e) = self.catalog.deregister(&self.service, &self.member_id).await {
                        warn!(member_id = %self.member_id, error = %e, "failed to deregister HA partitioner member");
                    }
                    return Ok(());
                }
                changed = members.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Retains only the IDs this replica owns on the current ring
    /// snapshot (§4.3 `FilterPolicies`). Before the first ring snapshot
    /// arrives, every ID passes through unfiltered so single-replica /
    /// startup operation isn't blocked on the watch.
    #[must_use]
    pub fn filter_policies(&self, ids: Vec<String>) -> Vec<String> {
        if !self.ready.load(Ordering::Acquire) {
            return ids;
        }
        let ring = self.ring.read();
        ids.into_iter()
            .filter(|id| ring.owned_by(id, &self.member_id))
            .collect()
    }

    /// The number of members currently visible on the ring.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.ring.read().len()
    }
}
