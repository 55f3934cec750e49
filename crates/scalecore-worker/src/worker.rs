//! Workers (§4.7): dequeue one evaluation at a time, run its checks,
//! reduce their proposed actions through check-group preempt semantics,
//! apply limits, and drive `Target.Scale`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use scalecore_broker::EvalBroker;
use scalecore_core::{
    Direction, OnError, PolicyTarget, ScalingAction, ScalingEvaluation, ScalingPolicy,
    ScalingPolicyCheck, SharedClock,
};
use scalecore_plugin::{PluginFleet, ScaleOutcome, StrategyInput, TimeRange};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum ProcessOutcome {
    Ack,
    Nack,
}

/// Drives evaluations dequeued from one or more broker queues
/// end-to-end, per §4.7.
pub struct Worker {
    id: String,
    queue_names: Vec<String>,
    broker: Arc<EvalBroker>,
    fleet: Arc<PluginFleet>,
    clock: SharedClock,
}

impl Worker {
    /// Builds a worker identified by `id`, dequeuing from `queue_names`
    /// in priority order.
    #[must_use]
    pub fn new(
        id: String,
        queue_names: Vec<String>,
        broker: Arc<EvalBroker>,
        fleet: Arc<PluginFleet>,
        clock: SharedClock,
    ) -> Self {
        Self {
            id,
            queue_names,
            broker,
            fleet,
            clock,
        }
    }

    /// Dequeues and processes evaluations until `cancel` fires. On
    /// cancellation, the in-flight evaluation (if any) is abandoned
    /// without being acked — the broker's ack-timeout reaper redelivers
    /// it (§5 "Cancellation").
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let Some(eval) = self
                .broker
                .dequeue(&self.queue_names, &self.id, &cancel)
                .await
            else {
                return;
            };
            self.process(eval).await;
        }
    }

    async fn process(&self, eval: ScalingEvaluation) {
        match self.evaluate(&eval.policy).await {
            ProcessOutcome::Ack => self.broker.ack(eval.id, &self.id),
            ProcessOutcome::Nack => self.broker.nack(eval.id, &self.id),
        }
    }

    async fn evaluate(&self, policy: &ScalingPolicy) -> ProcessOutcome {
        let target = match self.fleet.get_target(&policy.target.name) {
            Ok(target) => target,
            Err(e) => {
                warn!(policy_id = %policy.id, error = %e, "worker: target plugin unavailable");
                return ProcessOutcome::Nack;
            }
        };

        let status = match target.status(&policy.target.config).await {
            Ok(Some(status)) => status,
            Ok(None) => {
                info!(policy_id = %policy.id, "worker: target no longer exists, dropping evaluation");
                return ProcessOutcome::Ack;
            }
            Err(e) => {
                warn!(policy_id = %policy.id, error = %e, "worker: target status call failed");
                return ProcessOutcome::Nack;
            }
        };

        let mut check_actions = Vec::with_capacity(policy.checks.len());
        for check in &policy.checks {
            check_actions.push(self.run_check(policy, check, status.count).await);
        }

        if check_actions.iter().any(|action| action.error) {
            warn!(policy_id = %policy.id, "worker: one or more checks errored, nacking for retry");
            return ProcessOutcome::Nack;
        }

        let mut action = reduce_actions(&policy.checks, check_actions);

        action.cap_count(policy.min, policy.max);
        if let Some(max_change) = max_change_for(&policy.target, action.direction) {
            action.cap_change(status.count, max_change);
        }

        if matches!(action.direction, Direction::None) || action.count == status.count {
            debug!(policy_id = %policy.id, "worker: no-op evaluation, acking without scaling");
            return ProcessOutcome::Ack;
        }

        if policy.target.get_bool("dry-run") {
            action.mark_dry_run();
            info!(policy_id = %policy.id, count = action.count, "worker: dry-run, skipping Target.Scale");
            return ProcessOutcome::Ack;
        }

        match target.scale(&action, &policy.target.config).await {
            Ok(ScaleOutcome::Scaled) => {
                info!(policy_id = %policy.id, count = action.count, direction = ?action.direction, "worker: scaled target");
                ProcessOutcome::Ack
            }
            Ok(ScaleOutcome::NoOp) => {
                debug!(policy_id = %policy.id, "worker: target reported scaling no-op, cooldown suppressed");
                ProcessOutcome::Ack
            }
            Err(e) => {
                warn!(policy_id = %policy.id, error = %e, "worker: Target.Scale failed, will retry");
                ProcessOutcome::Nack
            }
        }
    }

    async fn run_check(
        &self,
        policy: &ScalingPolicy,
        check: &ScalingPolicyCheck,
        current_count: i64,
    ) -> ScalingAction {
        let apm = match self.fleet.get_apm(&check.source) {
            Ok(apm) => apm,
            Err(e) => {
                warn!(policy_id = %policy.id, check = %check.name, error = %e, "check failed: apm unavailable");
                return ScalingAction::error(format!("apm '{}' unavailable: {e}", check.source));
            }
        };

        let now = self.clock.now_utc();
        let offset =
            ChronoDuration::from_std(check.query_window_offset).unwrap_or_else(|_| ChronoDuration::zero());
        let window = ChronoDuration::from_std(check.query_window).unwrap_or_else(|_| ChronoDuration::zero());
        let to = now - offset;
        let from = to - window;

        let metrics = match apm.query(&check.query, TimeRange { from, to }).await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(policy_id = %policy.id, check = %check.name, error = %e, "check failed: apm query failed");
                return ScalingAction::error(format!("apm query failed: {e}"));
            }
        };

        if metrics.is_empty() {
            return match check.effective_on_error(policy.on_check_error) {
                OnError::Ignore => ScalingAction::none(),
                OnError::Fail => {
                    warn!(policy_id = %policy.id, check = %check.name, "check failed: empty metric series");
                    ScalingAction::error(format!("check '{}': empty metric series", check.name))
                }
            };
        }

        let strategy = match self.fleet.get_strategy(&check.strategy.name) {
            Ok(strategy) => strategy,
            Err(e) => {
                warn!(policy_id = %policy.id, check = %check.name, error = %e, "check failed: strategy unavailable");
                return ScalingAction::error(format!(
                    "strategy '{}' unavailable: {e}",
                    check.strategy.name
                ));
            }
        };

        let input = StrategyInput {
            check: check.clone(),
            metrics,
            policy: policy.clone(),
            current_count,
        };

        match strategy.run(input).await {
            Ok(action) => action,
            Err(e) => {
                warn!(policy_id = %policy.id, check = %check.name, error = %e, "check failed: strategy run failed");
                ScalingAction::error(format!("strategy run failed: {e}"))
            }
        }
    }
}

/// Resolves the optional `max_scale_up`/`max_scale_down` target config
/// key for the given proposed direction.
fn max_change_for(target: &PolicyTarget, direction: Direction) -> Option<i64> {
    match direction {
        Direction::Up => target.get_i64("max_scale_up"),
        Direction::Down => target.get_i64("max_scale_down"),
        Direction::None => None,
    }
}

/// Groups `actions` by their check's group key (ungrouped checks form
/// singleton groups), reduces within each group by preempt semantics,
/// then reduces across groups the same way (§4.7 steps 4-5).
fn reduce_actions(checks: &[ScalingPolicyCheck], actions: Vec<ScalingAction>) -> ScalingAction {
    let mut groups: HashMap<String, ScalingAction> = HashMap::new();
    for (check, action) in checks.iter().zip(actions) {
        let key = check.group_key();
        match groups.remove(&key) {
            Some(existing) => {
                groups.insert(key, preempt(existing, action));
            }
            None => {
                groups.insert(key, action);
            }
        }
    }
    groups
        .into_values()
        .reduce(preempt)
        .unwrap_or_else(ScalingAction::none)
}

/// The preempt rule (§4.7 step 4): `up` beats everything (larger count
/// wins between two `up`s); `none` cancels a `down`; between two
/// `down`s, the smaller count wins.
fn preempt(a: ScalingAction, b: ScalingAction) -> ScalingAction {
    match (a.direction, b.direction) {
        (Direction::Up, Direction::Up) => {
            if a.count >= b.count {
                a
            } else {
                b
            }
        }
        (Direction::Up, _) => a,
        (_, Direction::Up) => b,
        (Direction::None, _) => a,
        (_, Direction::None) => b,
        (Direction::Down, Direction::Down) => {
            if a.count <= b.count {
                a
            } else {
                b
            }
        }
    }
}
