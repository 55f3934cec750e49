//! The `ScalingPolicy` data model (§3 of the design).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// What kind of target a policy drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    /// Scales a job's task group replica count.
    Horizontal,
    /// Scales the underlying client-node cluster.
    Cluster,
}

impl PolicyType {
    /// The broker queue name this policy type is routed to.
    #[must_use]
    pub fn queue_name(self) -> &'static str {
        match self {
            Self::Horizontal => "horizontal",
            Self::Cluster => "cluster",
        }
    }
}

/// What to do when a check (or the policy as a whole) hits an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// The check (or evaluation) fails.
    #[default]
    Fail,
    /// The check yields `Direction::None` instead of failing.
    Ignore,
}

/// The scaling target a policy drives: identity plus free-form behavior
/// config (`node_drain_deadline`, `max_scale_up`, `cooldown_on_scale_up`,
/// `dry-run`, ...). The core treats every value as opaque except where a
/// handler or worker looks up a well-known key (see `target_config`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyTarget {
    /// Configured target plugin instance name.
    pub name: String,
    /// Target identity + behavior config.
    pub config: HashMap<String, String>,
}

impl PolicyTarget {
    /// Reads a config value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    /// Reads a boolean config value, defaulting to `false` on absence or
    /// parse failure.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> bool {
        self.config
            .get(key)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Reads an integer config value.
    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.config.get(key).and_then(|v| v.parse().ok())
    }
}

/// A strategy reference: the configured plugin instance name plus its
/// opaque config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRef {
    /// Configured strategy plugin instance name.
    pub name: String,
    /// Strategy config, opaque to the core.
    pub config: HashMap<String, String>,
}

/// One check inside a policy: a metric query paired with a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicyCheck {
    /// Check name, unique within its policy.
    pub name: String,
    /// Configured APM plugin instance name.
    pub source: String,
    /// Opaque query string, interpreted only by the named APM.
    pub query: String,
    /// How far back to query.
    #[serde(with = "duration_secs")]
    pub query_window: Duration,
    /// How far back from "now" the window ends (a query lag).
    #[serde(with = "duration_secs")]
    pub query_window_offset: Duration,
    /// Behavior on empty/erroring query result.
    pub on_error: Option<OnError>,
    /// The strategy run against the queried metrics.
    pub strategy: StrategyRef,
    /// Check-group label for conflict resolution (§4.7 step 4). Checks
    /// without an explicit group form a singleton group keyed by name.
    pub group: Option<String>,
}

impl ScalingPolicyCheck {
    /// The effective check-group key: `group` if set, else a singleton
    /// key derived from the check's own name.
    #[must_use]
    pub fn group_key(&self) -> String {
        self.group.clone().unwrap_or_else(|| format!("__singleton::{}", self.name))
    }

    /// Resolves the effective `on_error` given the policy-level default.
    #[must_use]
    pub fn effective_on_error(&self, policy_default: OnError) -> OnError {
        self.on_error.unwrap_or(policy_default)
    }
}

/// The evaluation unit: a complete, validated scaling policy (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    /// Stable, opaque, unique ID.
    pub id: String,
    /// What this policy scales.
    pub policy_type: PolicyType,
    /// Whether the policy is active.
    pub enabled: bool,
    /// Minimum allowed count.
    pub min: i64,
    /// Maximum allowed count.
    pub max: i64,
    /// Minimum wall-clock delay between scaling actions.
    #[serde(with = "duration_secs")]
    pub cooldown: Duration,
    /// Cooldown to use instead of `cooldown` when the most recent action
    /// was `up` (§9 open question, resolved in SPEC_FULL §4).
    #[serde(with = "duration_secs_opt", default)]
    pub cooldown_on_scale_up: Option<Duration>,
    /// Tick interval for this policy's handler.
    #[serde(with = "duration_secs")]
    pub evaluation_interval: Duration,
    /// The target this policy scales.
    pub target: PolicyTarget,
    /// Ordered list of checks.
    pub checks: Vec<ScalingPolicyCheck>,
    /// Default `on_error` for checks that don't set their own.
    pub on_check_error: OnError,
}

impl ScalingPolicy {
    /// Validates the invariants from §3: `min <= max`, `evaluation_interval
    /// > 0`, every check has a source/strategy name, and the target has a
    /// name. Does not require plugins to exist — that's a runtime
    /// dispense-time concern, not a structural one.
    ///
    /// # Errors
    ///
    /// Returns the first invariant violation found.
    pub fn validate(&self) -> Result<()> {
        if self.min > self.max {
            return Err(CoreError::InvalidBounds {
                id: self.id.clone(),
                min: self.min,
                max: self.max,
            });
        }
        if self.evaluation_interval.is_zero() {
            return Err(CoreError::InvalidEvaluationInterval {
                id: self.id.clone(),
            });
        }
        if self.target.name.is_empty() {
            return Err(CoreError::MissingTarget { id: self.id.clone() });
        }
        for check in &self.checks {
            if check.source.is_empty() {
                return Err(CoreError::MissingCheckField {
                    id: self.id.clone(),
                    check: check.name.clone(),
                    field: "source".into(),
                });
            }
            if check.strategy.name.is_empty() {
                return Err(CoreError::MissingCheckField {
                    id: self.id.clone(),
                    check: check.name.clone(),
                    field: "strategy".into(),
                });
            }
        }
        Ok(())
    }

    /// Clamps `count` into `[min, max]`.
    #[must_use]
    pub fn clamp_count(&self, count: i64) -> i64 {
        count.clamp(self.min, self.max)
    }
}

/// `serde` helper: (de)serialize a `Duration` as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// `serde` helper: (de)serialize an `Option<Duration>` as whole seconds.
mod duration_secs_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        d: &Option<Duration>,
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        d.map(|v| v.as_secs()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_policy() -> ScalingPolicy {
        ScalingPolicy {
            id: "p1".into(),
            policy_type: PolicyType::Horizontal,
            enabled: true,
            min: 1,
            max: 10,
            cooldown: Duration::from_secs(300),
            cooldown_on_scale_up: None,
            evaluation_interval: Duration::from_secs(10),
            target: PolicyTarget {
                name: "nomad-target".into(),
                config: HashMap::new(),
            },
            checks: vec![ScalingPolicyCheck {
                name: "cpu".into(),
                source: "prometheus".into(),
                query: "cpu_used".into(),
                query_window: Duration::from_secs(60),
                query_window_offset: Duration::ZERO,
                on_error: None,
                strategy: StrategyRef {
                    name: "target-value".into(),
                    config: HashMap::new(),
                },
                group: None,
            }],
            on_check_error: OnError::Fail,
        }
    }

    #[test]
    fn validates_clean_policy() {
        assert!(base_policy().validate().is_ok());
    }

    #[test]
    fn rejects_min_greater_than_max() {
        let mut p = base_policy();
        p.min = 20;
        assert!(matches!(
            p.validate(),
            Err(CoreError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn rejects_zero_interval() {
        let mut p = base_policy();
        p.evaluation_interval = Duration::ZERO;
        assert!(matches!(
            p.validate(),
            Err(CoreError::InvalidEvaluationInterval { .. })
        ));
    }

    #[test]
    fn rejects_missing_target_name() {
        let mut p = base_policy();
        p.target.name.clear();
        assert!(matches!(p.validate(), Err(CoreError::MissingTarget { .. })));
    }

    #[test]
    fn rejects_check_missing_source() {
        let mut p = base_policy();
        p.checks[0].source.clear();
        assert!(matches!(
            p.validate(),
            Err(CoreError::MissingCheckField { .. })
        ));
    }

    #[test]
    fn clamp_count_respects_bounds() {
        let p = base_policy();
        assert_eq!(p.clamp_count(-5), 1);
        assert_eq!(p.clamp_count(5), 5);
        assert_eq!(p.clamp_count(50), 10);
    }

    #[test]
    fn singleton_group_key_is_stable_per_check() {
        let p = base_policy();
        let key_a = p.checks[0].group_key();
        let key_b = p.checks[0].group_key();
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn effective_on_error_falls_back_to_policy_default() {
        let p = base_policy();
        assert_eq!(
            p.checks[0].effective_on_error(OnError::Ignore),
            OnError::Ignore
        );
    }
}
