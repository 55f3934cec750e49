//! The Policy Handler (§4.5): one task per policy ID, owning a ticker,
//! the policy's live `MonitorPolicy` subscription, and the cooldown gate
//! that decides whether a tick produces an evaluation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use scalecore_broker::EvalBroker;
use scalecore_core::{Direction, ScalingPolicy, SharedClock, TargetStatus};
use scalecore_plugin::PluginFleet;
use scalecore_policy::{PolicyError, PolicySource};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{HandlerError, Result};

/// Upper bound on the random delay added to a freshly (re)built ticker's
/// first tick, so many handlers with the same interval don't all fire in
/// lockstep (§4.5 step 2, "splay").
const SPLAY_MAX_MILLIS: u64 = 300;

/// Cooldown is treated as elapsed once the remaining time drops below
/// this, so the tick that first observes a just-expired cooldown still
/// fires instead of waiting for a further tick.
const COOLDOWN_SLACK: Duration = Duration::from_secs(1);

/// Safety ceiling on a single tick's work, guarding against a stuck
/// plugin call wedging the handler's loop indefinitely.
const DEFAULT_TICK_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay before `MonitorPolicy` is retried after a non-`NotFound`
/// failure.
const MONITOR_RETRY_DELAY: Duration = Duration::from_secs(5);

enum MonitorEvent {
    Updated(ScalingPolicy),
    Gone,
}

enum TickOutcome {
    Continue,
    TargetGone,
}

/// Drives one policy through its evaluation lifecycle: re-subscribes to
/// policy changes, ticks on `evaluation_interval`, and enqueues a
/// `ScalingEvaluation` onto the broker whenever the target is ready and
/// out of cooldown.
pub struct PolicyHandler {
    policy_id: String,
    source: Arc<dyn PolicySource>,
    fleet: Arc<PluginFleet>,
    broker: Arc<EvalBroker>,
    clock: SharedClock,
    tick_timeout: Duration,
}

impl PolicyHandler {
    /// Builds a handler for `policy_id`. Does not fetch or tick until
    /// `run` is called.
    #[must_use]
    pub fn new(
        policy_id: String,
        source: Arc<dyn PolicySource>,
        fleet: Arc<PluginFleet>,
        broker: Arc<EvalBroker>,
        clock: SharedClock,
    ) -> Self {
        Self {
            policy_id,
            source,
            fleet,
            broker,
            clock,
            tick_timeout: DEFAULT_TICK_TIMEOUT,
        }
    }

    /// The policy ID this handler was built for.
    #[must_use]
    pub fn policy_id(&self) -> &str {
        &self.policy_id
    }

    /// Runs the handler until `cancel` fires, the policy disappears from
    /// its source, or the source reports it didn't exist at startup.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::PolicyNotFound`] or
    /// [`HandlerError::InitialFetchFailed`] if the policy could not be
    /// loaded when the handler started. Once running, a disappearing
    /// policy is a normal (`Ok`) stop, not an error — the caller (the
    /// manager) is expected to have already removed this ID from its
    /// handler map by watching the same source.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut policy = match self.source.get_latest_version(&self.policy_id).await {
            Ok(Some(policy)) => policy,
            Ok(None) => {
                return Err(HandlerError::PolicyNotFound {
                    id: self.policy_id.clone(),
                })
            }
            Err(source) => {
                return Err(HandlerError::InitialFetchFailed {
                    id: self.policy_id.clone(),
                    source,
                })
            }
        };

        let (events_tx, mut events_rx) = mpsc::channel(8);
        let monitor_task = tokio::spawn(supervise_monitor(
            self.source.clone(),
            self.policy_id.clone(),
            cancel.clone(),
            events_tx,
        ));

        let mut ticker = build_ticker(policy.evaluation_interval);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    monitor_task.abort();
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if matches!(self.run_tick(&policy).await, TickOutcome::TargetGone) {
                        monitor_task.abort();
                        return Ok(());
                    }
                }
                event = events_rx.recv() => {
                    match event {
                        Some(MonitorEvent::Updated(updated)) => {
                            if updated.evaluation_interval != policy.evaluation_interval {
                                ticker = build_ticker(updated.evaluation_interval);
                            }
                            policy = updated;
                        }
                        Some(MonitorEvent::Gone) | None => {
                            info!(policy_id = %self.policy_id, "policy removed from source, stopping handler");
                            monitor_task.abort();
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn run_tick(&self, policy: &ScalingPolicy) -> TickOutcome {
        match tokio::time::timeout(self.tick_timeout, self.tick(policy)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(policy_id = %policy.id, "tick exceeded safety timeout, skipping");
                TickOutcome::Continue
            }
        }
    }

    async fn tick(&self, policy: &ScalingPolicy) -> TickOutcome {
        if let Err(e) = policy.validate() {
            warn!(policy_id = %policy.id, error = %e, "skipping tick: policy failed validation");
            return TickOutcome::Continue;
        }
        if !policy.enabled {
            debug!(policy_id = %policy.id, "skipping tick: policy disabled");
            return TickOutcome::Continue;
        }

        let target = match self.fleet.get_target(&policy.target.name) {
            Ok(target) => target,
            Err(e) => {
                warn!(policy_id = %policy.id, target = %policy.target.name, error = %e, "skipping tick: target plugin unavailable");
                return TickOutcome::Continue;
            }
        };

        let status = match target.status(&policy.target.config).await {
            Ok(Some(status)) => status,
            Ok(None) => {
                info!(policy_id = %policy.id, target = %policy.target.name, "target no longer exists, stopping handler");
                return TickOutcome::TargetGone;
            }
            Err(e) => {
                warn!(policy_id = %policy.id, error = %e, "skipping tick: target status call failed");
                return TickOutcome::Continue;
            }
        };

        if !status.ready {
            debug!(policy_id = %policy.id, "skipping tick: target not ready");
            return TickOutcome::Continue;
        }

        if let Some(remaining) = self.cooldown_remaining(policy, &status) {
            debug!(policy_id = %policy.id, remaining_secs = remaining.as_secs(), "skipping tick: in cooldown");
            return TickOutcome::Continue;
        }

        let id = self.broker.enqueue(policy.clone());
        debug!(policy_id = %policy.id, eval_id = %id, "enqueued evaluation");
        TickOutcome::Continue
    }

    /// Resolves `CooldownOnScaleUp` against the target's reported last
    /// activity and returns how much cooldown remains, or `None` if the
    /// gate is clear. Always logs which cooldown value was chosen
    /// (`cooldown_source = "scale_up" | "default"`) when a last-event
    /// timestamp is present.
    fn cooldown_remaining(&self, policy: &ScalingPolicy, status: &TargetStatus) -> Option<Duration> {
        let last_event_nanos = status.last_event_nanos()?;
        let last_event: DateTime<Utc> = DateTime::from_timestamp_nanos(last_event_nanos);

        let scale_up = status.last_direction() == Some(Direction::Up);
        let (cooldown, cooldown_source) = match (scale_up, policy.cooldown_on_scale_up) {
            (true, Some(d)) => (d, "scale_up"),
            _ => (policy.cooldown, "default"),
        };

        let elapsed = self
            .clock
            .now_utc()
            .signed_duration_since(last_event)
            .to_std()
            .unwrap_or(Duration::ZERO);

        debug!(
            policy_id = %policy.id,
            cooldown_source,
            elapsed_secs = elapsed.as_secs(),
            cooldown_secs = cooldown.as_secs(),
            "evaluated cooldown gate"
        );

        if elapsed + COOLDOWN_SLACK >= cooldown {
            None
        } else {
            Some(cooldown - elapsed)
        }
    }
}

/// Builds an interval ticker for `interval`, splaying its first firing
/// by up to [`SPLAY_MAX_MILLIS`] so handlers sharing the same
/// `evaluation_interval` don't all tick in lockstep.
fn build_ticker(interval: Duration) -> tokio::time::Interval {
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=SPLAY_MAX_MILLIS));
    let start = tokio::time::Instant::now() + interval + jitter;
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker
}

/// Drives `PolicySource::monitor_policy`, restarting it with a fixed
/// backoff on transient errors and forwarding updates on `events_tx`
/// until `cancel` fires or the source reports the policy is gone.
async fn supervise_monitor(
    source: Arc<dyn PolicySource>,
    policy_id: String,
    cancel: CancellationToken,
    events_tx: mpsc::Sender<MonitorEvent>,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let (policy_tx, mut policy_rx) = mpsc::channel(4);
        let forward_events_tx = events_tx.clone();
        let forward = tokio::spawn(async move {
            while let Some(policy) = policy_rx.recv().await {
                if forward_events_tx.send(MonitorEvent::Updated(policy)).await.is_err() {
                    return;
                }
            }
        });

        let result = source
            .monitor_policy(policy_id.clone(), cancel.clone(), policy_tx)
            .await;
        forward.abort();

        match result {
            Ok(()) => return,
            Err(PolicyError::NotFound { .. }) => {
                let _ = events_tx.send(MonitorEvent::Gone).await;
                return;
            }
            Err(e) => {
                warn!(policy_id = %policy_id, error = %e, "policy monitor failed, retrying");
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(MONITOR_RETRY_DELAY) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use scalecore_core::clock::fake::FakeClock;
    use scalecore_core::{OnError, PolicyTarget, PolicyType};
    use scalecore_plugin::builtin::BuiltinRegistry;
    use scalecore_plugin::{PluginInstanceSpec, PluginKind};
    use scalecore_policy::Result as PolicyResult;
    use tokio::sync::watch;

    fn base_policy(id: &str) -> ScalingPolicy {
        ScalingPolicy {
            id: id.into(),
            policy_type: PolicyType::Horizontal,
            enabled: true,
            min: 1,
            max: 10,
            cooldown: Duration::from_secs(300),
            cooldown_on_scale_up: None,
            evaluation_interval: Duration::from_millis(20),
            target: PolicyTarget {
                name: "test-target".into(),
                config: HashMap::new(),
            },
            checks: vec![],
            on_check_error: OnError::Fail,
        }
    }

    struct StubSource {
        policy: ScalingPolicy,
        fetch_calls: AtomicUsize,
    }

    #[async_trait]
    impl PolicySource for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        async fn monitor_ids(
            &self,
            cancel: CancellationToken,
            _reload: watch::Receiver<()>,
            _ids_tx: mpsc::Sender<Vec<String>>,
        ) -> PolicyResult<()> {
            cancel.cancelled().await;
            Ok(())
        }

        async fn monitor_policy(
            &self,
            _id: String,
            cancel: CancellationToken,
            _policy_tx: mpsc::Sender<ScalingPolicy>,
        ) -> PolicyResult<()> {
            cancel.cancelled().await;
            Ok(())
        }

        async fn get_latest_version(&self, _id: &str) -> PolicyResult<Option<ScalingPolicy>> {
            self.fetch_calls.fetch_add(1, Ordering::Relaxed);
            Ok(Some(self.policy.clone()))
        }
    }

    struct MissingSource;

    #[async_trait]
    impl PolicySource for MissingSource {
        fn name(&self) -> &str {
            "missing"
        }

        async fn monitor_ids(
            &self,
            _cancel: CancellationToken,
            _reload: watch::Receiver<()>,
            _ids_tx: mpsc::Sender<Vec<String>>,
        ) -> PolicyResult<()> {
            Ok(())
        }

        async fn monitor_policy(
            &self,
            _id: String,
            _cancel: CancellationToken,
            _policy_tx: mpsc::Sender<ScalingPolicy>,
        ) -> PolicyResult<()> {
            Ok(())
        }

        async fn get_latest_version(&self, _id: &str) -> PolicyResult<Option<ScalingPolicy>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn run_returns_policy_not_found_when_absent_at_start() {
        let handler = PolicyHandler::new(
            "p1".into(),
            Arc::new(MissingSource),
            Arc::new(PluginFleet::new(BuiltinRegistry::with_test_doubles())),
            Arc::new(EvalBroker::new(FakeClock::new(), 1, Duration::from_secs(300))),
            FakeClock::new(),
        );
        let cancel = CancellationToken::new();
        let result = handler.run(cancel).await;
        assert!(matches!(result, Err(HandlerError::PolicyNotFound { .. })));
    }

    #[tokio::test]
    async fn run_exits_cleanly_on_cancel() {
        let source = Arc::new(StubSource {
            policy: base_policy("p1"),
            fetch_calls: AtomicUsize::new(0),
        });
        let fleet = Arc::new(PluginFleet::new(BuiltinRegistry::with_test_doubles()));
        fleet
            .load(vec![(
                PluginKind::Target,
                PluginInstanceSpec {
                    name: "test-target".into(),
                    driver: "test-in-memory-target".into(),
                    args: vec![],
                    external: false,
                    config: HashMap::new(),
                },
            )])
            .await
            .expect("fleet load ok");
        let broker = Arc::new(EvalBroker::new(FakeClock::new(), 1, Duration::from_secs(300)));
        let handler = PolicyHandler::new("p1".into(), source, fleet, broker.clone(), FakeClock::new());

        let cancel = CancellationToken::new();
        let cancel_for_task = cancel.clone();
        let run = tokio::spawn(async move { handler.run(cancel_for_task).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("handler task completed")
            .expect("handler task did not panic");
        assert!(result.is_ok());
    }
}
