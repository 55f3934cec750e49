//! The Eval Broker itself (§4.6): per-queue FIFO delivery of
//! `ScalingEvaluation`s from policy handlers to workers, with ack/nack
//! redelivery and policy-ID collapsing so a slow worker never lets two
//! stale evaluations for the same policy pile up on the same queue.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use scalecore_core::{Clock, ScalingEvaluation, ScalingPolicy, SharedClock};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BrokerError, Result};

struct Unacked {
    eval: ScalingEvaluation,
    queue: String,
    worker_id: String,
    dequeued_at: Instant,
    delivery_count: u32,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<Uuid>>,
    ready: HashMap<Uuid, ScalingEvaluation>,
    unacked: HashMap<Uuid, Unacked>,
    /// policy ID -> the one evaluation currently representing it,
    /// whether still queued or already dequeued. Used to collapse a
    /// fresh `enqueue` into the still-queued copy instead of piling up
    /// duplicates (§4.6 "policy-ID collapsing").
    policy_in_flight: HashMap<String, Uuid>,
    /// Delivery counts, keyed by evaluation ID, surviving across
    /// requeue cycles until the evaluation is acked or finally dropped.
    /// `Unacked::delivery_count` alone isn't enough since it's removed
    /// (and would otherwise reset) on every nack/redeliver.
    delivery_counts: HashMap<Uuid, u32>,
}

/// The broker: one process-wide instance shared by every policy
/// handler (producers) and worker (consumers).
pub struct EvalBroker {
    clock: SharedClock,
    delivery_limit: u32,
    ack_timeout: Duration,
    state: Mutex<State>,
    notify: Notify,
}

impl EvalBroker {
    /// Builds a broker. `delivery_limit` and `ack_timeout` come from
    /// `policy_eval { delivery_limit, ack_timeout }` (§6); production
    /// defaults are 1 and 5 minutes respectively.
    #[must_use]
    pub fn new(clock: SharedClock, delivery_limit: u32, ack_timeout: Duration) -> Self {
        Self {
            clock,
            delivery_limit,
            ack_timeout,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    /// Enqueues `policy` for evaluation, routed to the queue named by
    /// its `PolicyType`. If an evaluation for this policy ID is already
    /// in flight — still queued, or already dequeued into a worker's
    /// hands but not yet acked — its contents are replaced in place and
    /// no second evaluation is created: at most one in-flight evaluation
    /// ever exists per policy ID (§4.6). Returns the evaluation's ID.
    pub fn enqueue(&self, policy: ScalingPolicy) -> Uuid {
        let now = self.clock.now_utc();
        let mut state = self.state.lock();

        if let Some(&existing_id) = state.policy_in_flight.get(&policy.id) {
            if let Some(existing) = state.ready.get_mut(&existing_id) {
                debug!(policy_id = %policy.id, eval_id = %existing_id, "collapsing into already-queued evaluation");
                existing.policy = policy;
                drop(state);
                self.notify.notify_one();
                return existing_id;
            }
            if let Some(unacked) = state.unacked.get_mut(&existing_id) {
                debug!(policy_id = %policy.id, eval_id = %existing_id, "collapsing into evaluation already in a worker's hands");
                unacked.eval.policy = policy;
                return existing_id;
            }
        }

        let queue = state
            .queues
            .entry(policy.policy_type.queue_name().to_string())
            .or_default();
        let eval = ScalingEvaluation::new(policy.clone(), now);
        let id = eval.id;
        queue.push_back(id);
        state.ready.insert(id, eval);
        state.policy_in_flight.insert(policy.id, id);
        drop(state);
        self.notify.notify_one();
        id
    }

    fn try_dequeue(&self, queue_names: &[String], worker_id: &str) -> Option<ScalingEvaluation> {
        let mut state = self.state.lock();
        for name in queue_names {
            let Some(queue) = state.queues.get_mut(name) else {
                continue;
            };
            let Some(id) = queue.pop_front() else {
                continue;
            };
            let eval = state
                .ready
                .remove(&id)
                .expect("queued id always has a ready entry");
            let delivery_count = state.delivery_counts.get(&id).unwrap_or(&0) + 1;
            state.delivery_counts.insert(id, delivery_count);
            state.unacked.insert(
                id,
                Unacked {
                    eval: eval.clone(),
                    queue: name.clone(),
                    worker_id: worker_id.to_string(),
                    dequeued_at: self.clock.now_instant(),
                    delivery_count,
                },
            );
            return Some(eval);
        }
        None
    }

    /// Blocks until an evaluation is available on any of `queue_names`,
    /// `cancel` fires, or (implementation detail) the broker is
    /// dropped. Delivery is oldest-first within and across the
    /// requested queues in the order they're listed.
    pub async fn dequeue(
        &self,
        queue_names: &[String],
        worker_id: &str,
        cancel: &CancellationToken,
    ) -> Option<ScalingEvaluation> {
        loop {
            if let Some(eval) = self.try_dequeue(queue_names, worker_id) {
                return Some(eval);
            }
            tokio::select! {
                () = cancel.cancelled() => return None,
                () = self.notify.notified() => {}
            }
        }
    }

    /// Acknowledges successful (or successfully no-op'd) processing of
    /// `id` by `worker_id`, clearing it from the unacked set. Silently
    /// ignored if `id` isn't currently dequeued-but-unacked, or is held
    /// by a different worker (§4.6) — acking is advisory, never fatal.
    pub fn ack(&self, id: Uuid, worker_id: &str) {
        let mut state = self.state.lock();
        match state.unacked.get(&id) {
            Some(unacked) if unacked.worker_id == worker_id => {}
            _ => return,
        }
        let unacked = state.unacked.remove(&id).expect("checked above");
        state.delivery_counts.remove(&id);
        if state.policy_in_flight.get(&unacked.eval.policy.id) == Some(&id) {
            state.policy_in_flight.remove(&unacked.eval.policy.id);
        }
    }

    /// Negatively acknowledges `id` as held by `worker_id`: re-enqueues
    /// it at the head of its original queue if under `delivery_limit`,
    /// else drops it and logs. Silently ignored if `id` isn't currently
    /// dequeued-but-unacked, or is held by a different worker (§4.6).
    pub fn nack(&self, id: Uuid, worker_id: &str) {
        let mut state = self.state.lock();
        match state.unacked.get(&id) {
            Some(unacked) if unacked.worker_id == worker_id => {}
            _ => return,
        }
        let _ = self.requeue_or_drop(&mut state, id, "nack");
    }

    fn requeue_or_drop(&self, state: &mut State, id: Uuid, cause: &str) -> Result<()> {
        let unacked = state
            .unacked
            .remove(&id)
            .ok_or(BrokerError::NotOutstanding { id })?;

        if unacked.delivery_count < self.delivery_limit {
            debug!(eval_id = %id, delivery_count = unacked.delivery_count, cause, "redelivering evaluation");
            state
                .queues
                .entry(unacked.queue.clone())
                .or_default()
                .push_front(id);
            state.ready.insert(id, unacked.eval);
        } else {
            warn!(eval_id = %id, delivery_count = unacked.delivery_count, cause, "dropping evaluation after exhausting delivery limit");
            state.delivery_counts.remove(&id);
            if state.policy_in_flight.get(&unacked.eval.policy.id) == Some(&id) {
                state.policy_in_flight.remove(&unacked.eval.policy.id);
            }
        }
        Ok(())
    }

    /// Finds unacked evaluations whose `ack_timeout` has elapsed and
    /// treats each as an implicit nack. Returns how many were reaped.
    pub fn reap_expired(&self) -> usize {
        let now = self.clock.now_instant();
        let mut state = self.state.lock();
        let expired: Vec<Uuid> = state
            .unacked
            .iter()
            .filter(|(_, u)| now.saturating_duration_since(u.dequeued_at) >= self.ack_timeout)
            .map(|(id, _)| *id)
            .collect();
        let count = expired.len();
        for id in expired {
            let _ = self.requeue_or_drop(&mut state, id, "ack-timeout");
        }
        count
    }

    /// Runs `reap_expired` on a fixed `sweep_interval` until `cancel`
    /// fires. Intended to be spawned once per agent process alongside
    /// the worker pools.
    pub async fn run_timeout_reaper(&self, cancel: CancellationToken, sweep_interval: Duration) {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let reaped = self.reap_expired();
                    if reaped > 0 {
                        info!(count = reaped, "reaped ack-timed-out evaluations");
                    }
                }
            }
        }
    }

    /// The number of evaluations currently queued (not yet dequeued)
    /// on `queue_name`, for diagnostics.
    #[must_use]
    pub fn queue_depth(&self, queue_name: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue_name)
            .map_or(0, VecDeque::len)
    }

    /// The number of evaluations currently dequeued but unacked, for
    /// diagnostics.
    #[must_use]
    pub fn unacked_count(&self) -> usize {
        self.state.lock().unacked.len()
    }
}
