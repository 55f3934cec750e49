//! The plugin contracts external collaborators must implement (§4.1).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scalecore_core::{ScalingAction, ScalingPolicy, ScalingPolicyCheck, TargetStatus};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What kind of plugin a configured instance or RPC call is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    /// Application performance monitor / metrics provider.
    Apm,
    /// Scaling target (job group, ASG, instance group, ...).
    Target,
    /// Scaling strategy (target-value, threshold, pass-through, ...).
    Strategy,
}

impl PluginKind {
    /// A stable label, used in errors and log fields.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Apm => "apm",
            Self::Target => "target",
            Self::Strategy => "strategy",
        }
    }
}

/// What a plugin reports about itself, checked against its configured
/// `(name, type)` at launch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// The name the plugin believes it is.
    pub name: String,
    /// The kind the plugin believes it is.
    pub kind: PluginKind,
}

/// Capability shared by every plugin kind.
#[async_trait]
pub trait Base: Send + Sync {
    /// Returns the plugin's self-reported identity.
    fn plugin_info(&self) -> PluginInfo;

    /// Pushes configuration to the plugin. A failure here removes the
    /// instance from dispense maps (§7 "Plugin launch / config errors").
    async fn set_config(&self, config: HashMap<String, String>) -> Result<()>;
}

/// A single metric sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Sample timestamp.
    pub timestamp: DateTime<Utc>,
    /// Sample value.
    pub value: f64,
}

/// A half-open time window passed to `Apm::query`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Window start (inclusive).
    pub from: DateTime<Utc>,
    /// Window end (exclusive).
    pub to: DateTime<Utc>,
}

/// Metrics provider abstraction (§4.1). `query` is finite and
/// single-shot: an empty result is a reportable condition handled by the
/// worker's `OnError` policy, not an error from the plugin's point of
/// view.
#[async_trait]
pub trait Apm: Base {
    /// Runs `query` over `range`, returning the resulting sample series.
    async fn query(&self, query: &str, range: TimeRange) -> Result<Vec<MetricPoint>>;
}

/// Sentinel distinguishing a successful no-op scale from an ordinary
/// scaling call: suppresses cooldown and the `last_event` write so the
/// next tick can try again (§4.1, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleOutcome {
    /// The target was scaled.
    Scaled,
    /// `TargetScalingNoOp`: nothing happened, cooldown is suppressed.
    NoOp,
}

/// The controllable subject of a policy (§4.1).
#[async_trait]
pub trait Target: Base {
    /// Returns the target's current state, or `None` if the target no
    /// longer exists (the handler owning it should stop itself).
    async fn status(&self, config: &HashMap<String, String>) -> Result<Option<TargetStatus>>;

    /// Executes a scaling action.
    async fn scale(
        &self,
        action: &ScalingAction,
        config: &HashMap<String, String>,
    ) -> Result<ScaleOutcome>;
}

/// Input to `Strategy::run`: the check being evaluated, its queried
/// metrics, the owning policy (for `min`/`max`/`target` context), and the
/// target's current observed count.
#[derive(Debug, Clone)]
pub struct StrategyInput {
    /// The check this strategy run is for.
    pub check: ScalingPolicyCheck,
    /// Metrics returned by the check's APM query.
    pub metrics: Vec<MetricPoint>,
    /// The owning policy.
    pub policy: ScalingPolicy,
    /// Current observed count from `TargetStatus`.
    pub current_count: i64,
}

/// The algorithm turning a metric sample plus current count into a
/// proposed new count (§4.1).
#[async_trait]
pub trait Strategy: Base {
    /// Produces a `ScalingAction` for the given input. May return
    /// `Direction::None`.
    async fn run(&self, input: StrategyInput) -> Result<ScalingAction>;
}
