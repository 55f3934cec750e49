//! Worker pool spawning: one fixed-size pool of [`Worker`] tasks per
//! broker queue, sized from `policy_eval.workers` (§4.7, §6).

use std::sync::Arc;

use scalecore_broker::EvalBroker;
use scalecore_core::SharedClock;
use scalecore_plugin::PluginFleet;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::worker::Worker;

/// A running set of worker tasks dequeuing from one queue.
pub struct WorkerPool {
    queue_name: String,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers, each named `"{queue_name}-{index}"`,
    /// dequeuing only from `queue_name`.
    #[must_use]
    pub fn spawn(
        queue_name: impl Into<String>,
        count: usize,
        broker: Arc<EvalBroker>,
        fleet: Arc<PluginFleet>,
        clock: SharedClock,
        cancel: CancellationToken,
    ) -> Self {
        let queue_name = queue_name.into();
        info!(queue = %queue_name, count, "starting worker pool");
        let tasks = (0..count)
            .map(|index| {
                let worker = Worker::new(
                    format!("{queue_name}-{index}"),
                    vec![queue_name.clone()],
                    broker.clone(),
                    fleet.clone(),
                    clock.clone(),
                );
                let cancel = cancel.clone();
                tokio::spawn(async move { worker.run(cancel).await })
            })
            .collect();
        Self { queue_name, tasks }
    }

    /// The queue this pool dequeues from.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// The number of worker tasks in this pool.
    #[must_use]
    pub fn size(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every worker task to finish (normally only after the
    /// pool's `CancellationToken` has fired).
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(queue = %self.queue_name, error = %e, "worker task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use scalecore_core::clock::fake::FakeClock;
    use scalecore_plugin::builtin::BuiltinRegistry;

    #[tokio::test]
    async fn spawn_starts_requested_number_of_workers() {
        let broker = Arc::new(EvalBroker::new(FakeClock::new(), 1, Duration::from_secs(300)));
        let fleet = Arc::new(PluginFleet::new(BuiltinRegistry::with_test_doubles()));
        let cancel = CancellationToken::new();

        let pool = WorkerPool::spawn(
            "horizontal",
            3,
            broker,
            fleet,
            FakeClock::new(),
            cancel.clone(),
        );
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.queue_name(), "horizontal");

        cancel.cancel();
        pool.join().await;
    }
}
