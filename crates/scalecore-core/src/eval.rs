//! `ScalingEvaluation` and `ScalingAction` (§3), the transient per-tick
//! and per-check values that flow handler → broker → worker → target.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::policy::ScalingPolicy;

/// Direction a check (or the reduced action) proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// No scaling action.
    #[default]
    None,
    /// Scale up.
    Up,
    /// Scale down.
    Down,
}

/// Well-known `ScalingAction::meta` keys, matching §3's conventions.
pub mod meta_keys {
    /// Set to `true` when the action ran in dry-run mode.
    pub const DRY_RUN: &str = "dry_run";
    /// Set to `true` when `CapCount` clamped the count.
    pub const COUNT_CAPPED: &str = "count.capped";
    /// The pre-cap count, present only when `count.capped` is true.
    pub const COUNT_ORIGINAL: &str = "count.original";
    /// Stack of reasons superseded by a later annotation.
    pub const REASON_HISTORY: &str = "reason_history";
}

/// A proposed scaling outcome, either from a single check or reduced
/// across checks/groups (§3, §4.7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScalingAction {
    /// Proposed direction.
    pub direction: Direction,
    /// Desired absolute count after the action. `-1` denotes dry-run.
    pub count: i64,
    /// Human-readable justification, superseded reasons pushed to
    /// `reason_history` in `meta`.
    pub reason: String,
    /// Whether this action represents a check/evaluation error.
    pub error: bool,
    /// Audit annotations (see `meta_keys`).
    pub meta: HashMap<String, Value>,
}

impl ScalingAction {
    /// The canonical "do nothing" action.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// An action representing a check error.
    #[must_use]
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            direction: Direction::None,
            count: -1,
            reason: reason.into(),
            error: true,
            meta: HashMap::new(),
        }
    }

    /// Sets a new reason, pushing the previous one onto `reason_history`
    /// if it was non-empty.
    pub fn supersede_reason(&mut self, new_reason: impl Into<String>) {
        let previous = std::mem::replace(&mut self.reason, new_reason.into());
        if !previous.is_empty() {
            let history = self
                .meta
                .entry(meta_keys::REASON_HISTORY.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(arr) = history {
                arr.push(Value::String(previous));
            }
        }
    }

    /// Clamps `count` into `policy.min..=policy.max`, annotating the
    /// action per the `CapCount` invariant (§8 item 6): when capping
    /// occurs, `count.capped = true`, `count.original` is the pre-cap
    /// value, and the prior reason is pushed onto `reason_history`.
    pub fn cap_count(&mut self, min: i64, max: i64) {
        let capped = self.count.clamp(min, max);
        if capped != self.count {
            let original = self.count;
            self.meta
                .insert(meta_keys::COUNT_CAPPED.to_string(), Value::Bool(true));
            self.meta.insert(
                meta_keys::COUNT_ORIGINAL.to_string(),
                Value::Number(original.into()),
            );
            self.supersede_reason(format!(
                "capped count from {original} to {capped} to stay within limits"
            ));
            self.count = capped;
        }
    }

    /// Further clamps `count` so `|count - current| <= max_change`, used
    /// for the optional `max_scale_up`/`max_scale_down` target config.
    pub fn cap_change(&mut self, current: i64, max_change: i64) {
        let delta = self.count - current;
        if delta.unsigned_abs() as i64 > max_change {
            let original = self.count;
            let capped = if delta > 0 {
                current + max_change
            } else {
                current - max_change
            };
            self.meta
                .insert(meta_keys::COUNT_CAPPED.to_string(), Value::Bool(true));
            self.meta.insert(
                meta_keys::COUNT_ORIGINAL.to_string(),
                Value::Number(original.into()),
            );
            self.supersede_reason(format!(
                "capped count from {original} to {capped} to respect max_change"
            ));
            self.count = capped;
        }
    }

    /// Marks this action as dry-run: sets `count = -1` and annotates
    /// `meta["dry_run"] = true`, per §4.7 step 8.
    pub fn mark_dry_run(&mut self) {
        self.meta
            .insert(meta_keys::DRY_RUN.to_string(), Value::Bool(true));
        self.count = -1;
    }

    /// Whether `CapCount`/`cap_change` annotated this action as capped.
    #[must_use]
    pub fn was_capped(&self) -> bool {
        matches!(self.meta.get(meta_keys::COUNT_CAPPED), Some(Value::Bool(true)))
    }
}

/// A transient unit of work: one tick of one policy, en route to a
/// worker via the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingEvaluation {
    /// Assigned by the broker at enqueue time if absent.
    pub id: Uuid,
    /// Pointer-value snapshot of the policy at tick time.
    pub policy: ScalingPolicy,
    /// When the handler created this evaluation.
    pub create_time: DateTime<Utc>,
}

impl ScalingEvaluation {
    /// Creates a fresh evaluation for `policy`, minting a new ID.
    #[must_use]
    pub fn new(policy: ScalingPolicy, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            policy,
            create_time: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_count_clamps_and_annotates() {
        let mut action = ScalingAction {
            direction: Direction::Up,
            count: 30,
            reason: "scaling up because factor is 10.000000".into(),
            error: false,
            meta: HashMap::new(),
        };
        action.cap_count(1, 10);
        assert_eq!(action.count, 10);
        assert!(action.was_capped());
        assert_eq!(
            action.meta.get(meta_keys::COUNT_ORIGINAL),
            Some(&Value::Number(30.into()))
        );
        assert_eq!(
            action.reason,
            "capped count from 30 to 10 to stay within limits"
        );
        let history = action
            .meta
            .get(meta_keys::REASON_HISTORY)
            .and_then(Value::as_array)
            .expect("history present");
        assert_eq!(
            history,
            &vec![Value::String(
                "scaling up because factor is 10.000000".into()
            )]
        );
    }

    #[test]
    fn cap_count_no_op_when_in_range() {
        let mut action = ScalingAction {
            direction: Direction::Up,
            count: 4,
            reason: "scaling up because factor is 1.25".into(),
            error: false,
            meta: HashMap::new(),
        };
        action.cap_count(1, 10);
        assert_eq!(action.count, 4);
        assert!(!action.was_capped());
    }

    #[test]
    fn mark_dry_run_sets_sentinel_count() {
        let mut action = ScalingAction {
            direction: Direction::Up,
            count: 5,
            reason: "r".into(),
            error: false,
            meta: HashMap::new(),
        };
        action.mark_dry_run();
        assert_eq!(action.count, -1);
        assert_eq!(action.meta.get(meta_keys::DRY_RUN), Some(&Value::Bool(true)));
    }

    #[test]
    fn cap_change_respects_max_delta() {
        let mut action = ScalingAction {
            direction: Direction::Up,
            count: 20,
            reason: "r".into(),
            error: false,
            meta: HashMap::new(),
        };
        action.cap_change(10, 3);
        assert_eq!(action.count, 13);
        assert!(action.was_capped());
    }
}
