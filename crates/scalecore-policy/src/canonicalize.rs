//! Canonicalization (§4.2/§4.5.1): fills in defaults a source omitted,
//! applies mutators, then re-validates. Every policy handed out of this
//! crate — from either adapter — has gone through `canonicalize`.

use std::time::Duration;

use scalecore_core::ScalingPolicy;

use crate::error::Result;
use crate::mutators;

/// Fallback values applied when a policy omits its own, from
/// `policy { default_cooldown, default_evaluation_interval }` (§6).
#[derive(Debug, Clone, Copy)]
pub struct PolicyDefaults {
    /// Used when a policy's `cooldown` is unset (zero).
    pub default_cooldown: Duration,
    /// Used when a policy's `evaluation_interval` is unset (zero).
    pub default_evaluation_interval: Duration,
}

impl PolicyDefaults {
    /// Builds defaults from an agent's `PolicyConfig`.
    #[must_use]
    pub fn new(default_cooldown: Duration, default_evaluation_interval: Duration) -> Self {
        Self {
            default_cooldown,
            default_evaluation_interval,
        }
    }
}

/// Fills in `defaults` where the policy left a value zeroed, applies
/// mutators (§4.5.1), and validates the result.
///
/// # Errors
///
/// Returns an error if the canonicalized policy still fails
/// `ScalingPolicy::validate`.
pub fn canonicalize(mut policy: ScalingPolicy, defaults: &PolicyDefaults) -> Result<ScalingPolicy> {
    if policy.cooldown.is_zero() {
        policy.cooldown = defaults.default_cooldown;
    }
    if policy.evaluation_interval.is_zero() {
        policy.evaluation_interval = defaults.default_evaluation_interval;
    }
    mutators::apply(&mut policy);
    policy.validate()?;
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use scalecore_core::{OnError, PolicyTarget, PolicyType};

    fn defaults() -> PolicyDefaults {
        PolicyDefaults::new(Duration::from_secs(300), Duration::from_secs(10))
    }

    fn bare_policy() -> ScalingPolicy {
        ScalingPolicy {
            id: "p1".into(),
            policy_type: PolicyType::Horizontal,
            enabled: true,
            min: 1,
            max: 10,
            cooldown: Duration::ZERO,
            cooldown_on_scale_up: None,
            evaluation_interval: Duration::ZERO,
            target: PolicyTarget {
                name: "nomad-target".into(),
                config: HashMap::new(),
            },
            checks: vec![],
            on_check_error: OnError::Fail,
        }
    }

    #[test]
    fn fills_in_zeroed_cooldown_and_interval() {
        let canon = canonicalize(bare_policy(), &defaults()).unwrap();
        assert_eq!(canon.cooldown, Duration::from_secs(300));
        assert_eq!(canon.evaluation_interval, Duration::from_secs(10));
    }

    #[test]
    fn preserves_explicit_nonzero_values() {
        let mut policy = bare_policy();
        policy.cooldown = Duration::from_secs(60);
        policy.evaluation_interval = Duration::from_secs(5);
        let canon = canonicalize(policy, &defaults()).unwrap();
        assert_eq!(canon.cooldown, Duration::from_secs(60));
        assert_eq!(canon.evaluation_interval, Duration::from_secs(5));
    }

    #[test]
    fn rejects_policy_that_is_still_invalid_after_defaults() {
        let mut policy = bare_policy();
        policy.min = 20;
        assert!(canonicalize(policy, &defaults()).is_err());
    }
}
