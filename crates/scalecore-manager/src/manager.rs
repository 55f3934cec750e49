//! The Policy Manager itself (§4.4): owns an `ID -> Handler` map per
//! configured source, reconciling it against each source's `MonitorIDs`
//! stream and the HA partitioner's owned subset, if HA is enabled.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use scalecore_broker::EvalBroker;
use scalecore_core::SharedClock;
use scalecore_ha::HaPartitioner;
use scalecore_handler::PolicyHandler;
use scalecore_plugin::PluginFleet;
use scalecore_policy::PolicySource;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

struct HandlerEntry {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Drives every configured policy source's `MonitorIDs` stream and keeps
/// exactly one running `PolicyHandler` per currently-owned policy ID.
pub struct PolicyManager {
    fleet: Arc<PluginFleet>,
    broker: Arc<EvalBroker>,
    clock: SharedClock,
    sources: Vec<Arc<dyn PolicySource>>,
    partitioner: Option<Arc<HaPartitioner>>,
    reload_tx: watch::Sender<()>,
    handlers: Mutex<HashMap<String, HandlerEntry>>,
}

impl PolicyManager {
    /// Builds a manager over `sources`. `partitioner`, when set, filters
    /// every source's reported ID set down to this replica's owned
    /// subset before handlers are spawned (§4.3).
    #[must_use]
    pub fn new(
        fleet: Arc<PluginFleet>,
        broker: Arc<EvalBroker>,
        clock: SharedClock,
        sources: Vec<Arc<dyn PolicySource>>,
        partitioner: Option<Arc<HaPartitioner>>,
    ) -> Self {
        let (reload_tx, _reload_rx) = watch::channel(());
        Self {
            fleet,
            broker,
            clock,
            sources,
            partitioner,
            reload_tx,
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// The number of policy handlers currently running, for diagnostics.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Requests every source re-establish its discovery cursor (e.g. a
    /// Nomad blocking query's wait index) from scratch, picking up
    /// renamed or externally-mutated policies immediately instead of on
    /// the source's own poll cadence.
    pub fn reload_sources(&self) {
        let _ = self.reload_tx.send(());
    }

    /// Runs every source's `MonitorIDs` stream and reconciles the
    /// handler map against it until `cancel` fires, then stops every
    /// running handler before returning.
    ///
    /// `rebalance` is the HA partitioner's membership-change signal
    /// (§4.3): each time it fires, every source's last-seen raw ID set
    /// is re-filtered through [`HaPartitioner::filter_policies`] and
    /// reconciled again, without waiting for that source to re-emit on
    /// its own cadence. A partitioner-less agent is handed a receiver
    /// whose sender is dropped immediately, which just disables this
    /// behavior.
    pub async fn run(&self, cancel: CancellationToken, mut rebalance: watch::Receiver<()>) {
        if self.sources.is_empty() {
            cancel.cancelled().await;
            return;
        }

        let (tagged_tx, mut tagged_rx) = mpsc::channel::<(usize, Vec<String>)>(self.sources.len() * 4);
        let mut monitor_tasks = Vec::with_capacity(self.sources.len());

        for (index, source) in self.sources.iter().enumerate() {
            let source = source.clone();
            let source_cancel = cancel.clone();
            let reload_rx = self.reload_tx.subscribe();
            let tagged_tx = tagged_tx.clone();
            monitor_tasks.push(tokio::spawn(async move {
                let (raw_tx, mut raw_rx) = mpsc::channel(4);
                let forward = tokio::spawn(async move {
                    while let Some(ids) = raw_rx.recv().await {
                        if tagged_tx.send((index, ids)).await.is_err() {
                            return;
                        }
                    }
                });
                if let Err(e) = source.monitor_ids(source_cancel, reload_rx, raw_tx).await {
                    warn!(source = source.name(), error = %e, "policy source monitor_ids exited with error");
                }
                forward.abort();
            }));
        }
        drop(tagged_tx);

        let mut raw_per_source: Vec<Vec<String>> = vec![Vec::new(); self.sources.len()];
        let mut per_source: Vec<HashSet<String>> = vec![HashSet::new(); self.sources.len()];
        let mut rebalance_active = true;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                received = tagged_rx.recv() => {
                    match received {
                        Some((index, ids)) => {
                            raw_per_source[index] = ids.clone();
                            self.reconcile(index, ids, &mut per_source, &cancel);
                        }
                        None => break,
                    }
                }
                changed = rebalance.changed(), if rebalance_active => {
                    if changed.is_ok() {
                        for index in 0..self.sources.len() {
                            let ids = raw_per_source[index].clone();
                            self.reconcile(index, ids, &mut per_source, &cancel);
                        }
                    } else {
                        rebalance_active = false;
                    }
                }
            }
        }

        for task in monitor_tasks {
            task.abort();
        }
        self.stop_all();
    }

    fn reconcile(
        &self,
        source_index: usize,
        ids: Vec<String>,
        per_source: &mut [HashSet<String>],
        parent_cancel: &CancellationToken,
    ) {
        let filtered: HashSet<String> = match &self.partitioner {
            Some(partitioner) => partitioner.filter_policies(ids).into_iter().collect(),
            None => ids.into_iter().collect(),
        };
        let previous = std::mem::replace(&mut per_source[source_index], filtered.clone());
        let removed = previous.difference(&filtered).cloned();

        self.stop_missing(removed);
        self.ensure_handlers(source_index, &filtered, parent_cancel);
    }

    fn ensure_handlers(
        &self,
        source_index: usize,
        ids: &HashSet<String>,
        parent_cancel: &CancellationToken,
    ) {
        let mut handlers = self.handlers.lock();
        for id in ids {
            let needs_spawn = handlers.get(id).is_none_or(|entry| entry.task.is_finished());
            if !needs_spawn {
                continue;
            }
            if let Some(stale) = handlers.remove(id) {
                stale.cancel.cancel();
                stale.task.abort();
            }
            let entry = self.spawn_handler(
                id.clone(),
                self.sources[source_index].clone(),
                parent_cancel.child_token(),
            );
            handlers.insert(id.clone(), entry);
        }
    }

    fn stop_missing(&self, removed: impl Iterator<Item = String>) {
        let mut handlers = self.handlers.lock();
        for id in removed {
            if let Some(entry) = handlers.remove(&id) {
                entry.cancel.cancel();
                entry.task.abort();
            }
        }
    }

    fn spawn_handler(
        &self,
        id: String,
        source: Arc<dyn PolicySource>,
        cancel: CancellationToken,
    ) -> HandlerEntry {
        let handler = PolicyHandler::new(
            id.clone(),
            source,
            self.fleet.clone(),
            self.broker.clone(),
            self.clock.clone(),
        );
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = handler.run(task_cancel).await {
                warn!(policy_id = %id, error = %e, "policy handler stopped with error");
            }
        });
        HandlerEntry { cancel, task }
    }

    fn stop_all(&self) {
        let mut handlers = self.handlers.lock();
        for (_, entry) in handlers.drain() {
            entry.cancel.cancel();
            entry.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use async_trait::async_trait;
    use scalecore_core::clock::fake::FakeClock;
    use scalecore_core::{OnError, PolicyTarget, PolicyType, ScalingPolicy};
    use scalecore_ha::{HashRing, InMemoryCatalog};
    use scalecore_plugin::builtin::BuiltinRegistry;
    use scalecore_policy::Result as PolicyResult;

    fn policy(id: &str) -> ScalingPolicy {
        ScalingPolicy {
            id: id.into(),
            policy_type: PolicyType::Horizontal,
            enabled: true,
            min: 1,
            max: 10,
            cooldown: Duration::from_secs(300),
            cooldown_on_scale_up: None,
            evaluation_interval: Duration::from_secs(30),
            target: PolicyTarget {
                name: "test-target".into(),
                config: HashMap::new(),
            },
            checks: vec![],
            on_check_error: OnError::Fail,
        }
    }

    /// A source whose visible ID set is controlled by an external
    /// `watch` channel, so tests can push successive `MonitorIDs`
    /// snapshots deterministically.
    struct ScriptedSource {
        snapshots: watch::Sender<Vec<String>>,
        policies: Mutex<HashMap<String, ScalingPolicy>>,
    }

    impl ScriptedSource {
        fn new() -> (Arc<Self>, watch::Sender<Vec<String>>) {
            let (tx, _rx) = watch::channel(Vec::new());
            let source = Arc::new(Self {
                snapshots: tx.clone(),
                policies: Mutex::new(HashMap::new()),
            });
            (source, tx)
        }

        fn set(&self, id: &str) {
            self.policies.lock().insert(id.to_string(), policy(id));
        }
    }

    #[async_trait]
    impl PolicySource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn monitor_ids(
            &self,
            cancel: CancellationToken,
            mut reload: watch::Receiver<()>,
            ids_tx: mpsc::Sender<Vec<String>>,
        ) -> PolicyResult<()> {
            let mut snapshots = self.snapshots.subscribe();
            loop {
                let current = snapshots.borrow().clone();
                if ids_tx.send(current).await.is_err() {
                    return Ok(());
                }
                tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    _ = snapshots.changed() => {}
                    _ = reload.changed() => {}
                }
            }
        }

        async fn monitor_policy(
            &self,
            id: String,
            cancel: CancellationToken,
            policy_tx: mpsc::Sender<ScalingPolicy>,
        ) -> PolicyResult<()> {
            if let Some(p) = self.policies.lock().get(&id) {
                let _ = policy_tx.send(p.clone()).await;
            }
            cancel.cancelled().await;
            Ok(())
        }

        async fn get_latest_version(&self, id: &str) -> PolicyResult<Option<ScalingPolicy>> {
            Ok(self.policies.lock().get(id).cloned())
        }
    }

    fn manager(sources: Vec<Arc<dyn PolicySource>>) -> PolicyManager {
        PolicyManager::new(
            Arc::new(PluginFleet::new(BuiltinRegistry::with_test_doubles())),
            Arc::new(EvalBroker::new(FakeClock::new(), 1, Duration::from_secs(300))),
            FakeClock::new(),
            sources,
            None,
        )
    }

    #[tokio::test]
    async fn spawns_a_handler_per_discovered_id() {
        let (source, snapshots) = ScriptedSource::new();
        source.set("p1");
        snapshots.send(vec!["p1".to_string()]).unwrap();
        let manager = Arc::new(manager(vec![source]));

        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let manager_for_task = manager.clone();
        let (_rebalance_tx, rebalance_rx) = watch::channel(());
        let task = tokio::spawn(async move { manager_for_task.run(run_cancel, rebalance_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.handler_count(), 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(manager.handler_count(), 0);
    }

    #[tokio::test]
    async fn stops_handler_when_id_disappears_from_source() {
        let (source, snapshots) = ScriptedSource::new();
        source.set("p1");
        snapshots.send(vec!["p1".to_string()]).unwrap();
        let manager = Arc::new(manager(vec![source]));

        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let manager_for_task = manager.clone();
        let (_rebalance_tx, rebalance_rx) = watch::channel(());
        let task = tokio::spawn(async move { manager_for_task.run(run_cancel, rebalance_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.handler_count(), 1);

        snapshots.send(Vec::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.handler_count(), 0);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn rebalance_signal_reassigns_handlers_without_new_source_emission() {
        let (source, snapshots) = ScriptedSource::new();
        source.set("p1");
        snapshots.send(vec!["p1".to_string()]).unwrap();

        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.register("agents", "agent-a").await.unwrap();
        let partitioner = Arc::new(
            HaPartitioner::register(catalog.clone(), "agents", "agent-a")
                .await
                .unwrap(),
        );

        let manager = Arc::new(PolicyManager::new(
            Arc::new(PluginFleet::new(BuiltinRegistry::with_test_doubles())),
            Arc::new(EvalBroker::new(FakeClock::new(), 1, Duration::from_secs(300))),
            FakeClock::new(),
            vec![source],
            Some(partitioner.clone()),
        ));

        let (rebalance_tx, rebalance_rx) = watch::channel(());
        let partitioner_cancel = CancellationToken::new();
        let partitioner_run_cancel = partitioner_cancel.clone();
        let partitioner_for_task = partitioner.clone();
        let partitioner_task = tokio::spawn(async move {
            partitioner_for_task.run(partitioner_run_cancel, rebalance_tx).await
        });

        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let manager_for_task = manager.clone();
        let task = tokio::spawn(async move { manager_for_task.run(run_cancel, rebalance_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.handler_count(), 1);

        // A second member joins; the partitioner rebuilds its ring and
        // fires the rebalance signal with no new snapshot from the
        // source. Ownership of "p1" is re-evaluated from that signal
        // alone.
        catalog.register("agents", "agent-b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let ring = HashRing::from_members(["agent-a", "agent-b"]);
        let still_owned = ring.owned_by("p1", "agent-a");
        assert_eq!(manager.handler_count(), usize::from(still_owned));

        partitioner_cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), partitioner_task)
            .await
            .unwrap()
            .unwrap();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
