//! `TargetStatus` and cluster-scaling pool identity (§3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::eval::Direction;

/// Conventional `TargetStatus::meta` key for the remote provider's most
/// recent scaling activity, unix-nanoseconds.
pub const LAST_EVENT_KEY: &str = "last_event";

/// Conventional `TargetStatus::meta` key recording the direction
/// (`"up"`/`"down"`) of the most recent scaling activity, alongside
/// `LAST_EVENT_KEY`'s timestamp. Used to resolve `CooldownOnScaleUp`
/// (§9 open question): a handler's cooldown gate substitutes
/// `cooldown_on_scale_up` for `cooldown` when this was `"up"`.
pub const LAST_DIRECTION_KEY: &str = "last_direction";

/// The current observable state of a target, as returned by
/// `Target::Status`. `None` from the plugin call site means "the target
/// does not exist"; a present-but-not-ready status means "skip this
/// tick", per §4.5 step 3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStatus {
    /// Whether the target can currently be evaluated/scaled.
    pub ready: bool,
    /// Current observed count.
    pub count: i64,
    /// Free-form metadata; see `LAST_EVENT_KEY`.
    pub meta: HashMap<String, String>,
}

impl TargetStatus {
    /// Creates a ready status with no metadata.
    #[must_use]
    pub fn ready(count: i64) -> Self {
        Self {
            ready: true,
            count,
            meta: HashMap::new(),
        }
    }

    /// Parses `meta[LAST_EVENT_KEY]` as unix-nanoseconds, if present and
    /// well-formed.
    #[must_use]
    pub fn last_event_nanos(&self) -> Option<i64> {
        self.meta.get(LAST_EVENT_KEY).and_then(|v| v.parse().ok())
    }

    /// Parses `meta[LAST_DIRECTION_KEY]`, if present and well-formed.
    #[must_use]
    pub fn last_direction(&self) -> Option<Direction> {
        match self.meta.get(LAST_DIRECTION_KEY).map(String::as_str) {
            Some("up") => Some(Direction::Up),
            Some("down") => Some(Direction::Down),
            Some("none") => Some(Direction::None),
            _ => None,
        }
    }
}

/// The sentinel node-class value used when a cluster-scaling policy's
/// target config has no explicit `node_class` (§3 "Pool identity").
pub const DEFAULT_POOL_SENTINEL: &str = "autoscaler-default-pool";

/// Predicate selecting which client nodes constitute a cluster-scaling
/// pool. Any subset of fields may be set; all set fields must match
/// (an AND-combination), per §3.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolIdentifier {
    /// Nomad node class, or `DEFAULT_POOL_SENTINEL` when unset in config.
    pub node_class: Option<String>,
    /// Nomad datacenter.
    pub datacenter: Option<String>,
    /// Nomad node pool.
    pub node_pool: Option<String>,
}

impl PoolIdentifier {
    /// Builds a pool identifier from a target config map, applying the
    /// default-pool sentinel when `node_class` is absent or empty.
    #[must_use]
    pub fn from_target_config(config: &HashMap<String, String>) -> Self {
        let node_class = config
            .get("node_class")
            .filter(|v| !v.is_empty())
            .cloned()
            .or_else(|| Some(DEFAULT_POOL_SENTINEL.to_string()));
        Self {
            node_class,
            datacenter: config.get("datacenter").filter(|v| !v.is_empty()).cloned(),
            node_pool: config.get("node_pool").filter(|v| !v.is_empty()).cloned(),
        }
    }

    /// Whether `other` fields match every field this identifier sets.
    #[must_use]
    pub fn matches(&self, other: &PoolIdentifier) -> bool {
        matches_opt(&self.node_class, &other.node_class)
            && matches_opt(&self.datacenter, &other.datacenter)
            && matches_opt(&self.node_pool, &other.node_pool)
    }
}

fn matches_opt(want: &Option<String>, have: &Option<String>) -> bool {
    match want {
        None => true,
        Some(w) => have.as_deref() == Some(w.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_node_class_gets_default_sentinel() {
        let config = HashMap::new();
        let id = PoolIdentifier::from_target_config(&config);
        assert_eq!(id.node_class.as_deref(), Some(DEFAULT_POOL_SENTINEL));
    }

    #[test]
    fn explicit_node_class_is_preserved() {
        let mut config = HashMap::new();
        config.insert("node_class".to_string(), "gpu".to_string());
        let id = PoolIdentifier::from_target_config(&config);
        assert_eq!(id.node_class.as_deref(), Some("gpu"));
    }

    #[test]
    fn and_combination_requires_every_set_field() {
        let want = PoolIdentifier {
            node_class: Some("gpu".into()),
            datacenter: Some("dc1".into()),
            node_pool: None,
        };
        let matches = PoolIdentifier {
            node_class: Some("gpu".into()),
            datacenter: Some("dc1".into()),
            node_pool: Some("anything".into()),
        };
        let mismatches = PoolIdentifier {
            node_class: Some("gpu".into()),
            datacenter: Some("dc2".into()),
            node_pool: None,
        };
        assert!(want.matches(&matches));
        assert!(!want.matches(&mismatches));
    }

    #[test]
    fn last_event_nanos_parses_meta() {
        let mut meta = HashMap::new();
        meta.insert(LAST_EVENT_KEY.to_string(), "12345".to_string());
        let status = TargetStatus {
            ready: true,
            count: 3,
            meta,
        };
        assert_eq!(status.last_event_nanos(), Some(12345));
    }

    #[test]
    fn last_direction_parses_known_values() {
        let mut meta = HashMap::new();
        meta.insert(LAST_DIRECTION_KEY.to_string(), "up".to_string());
        let status = TargetStatus {
            ready: true,
            count: 3,
            meta,
        };
        assert_eq!(status.last_direction(), Some(Direction::Up));
    }

    #[test]
    fn last_direction_is_none_when_absent_or_unrecognized() {
        let status = TargetStatus::ready(3);
        assert_eq!(status.last_direction(), None);

        let mut meta = HashMap::new();
        meta.insert(LAST_DIRECTION_KEY.to_string(), "sideways".to_string());
        let status = TargetStatus {
            ready: true,
            count: 3,
            meta,
        };
        assert_eq!(status.last_direction(), None);
    }
}
