//! Built-in plugin dispatch and the deterministic test doubles used
//! across this crate's (and downstream crates') own test suites.
//!
//! Concrete metrics/target/strategy integrations (Prometheus, Datadog,
//! AWS ASG, ...) are out of scope (§1); this module only provides the
//! factory-map mechanism `PluginFleet::Load` dispatches built-in drivers
//! through, plus the in-process doubles.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use scalecore_core::{Direction, ScalingAction, TargetStatus};

use crate::error::Result;
use crate::traits::{
    Apm, Base, MetricPoint, PluginInfo, PluginKind, ScaleOutcome, Strategy, StrategyInput, Target,
    TimeRange,
};

/// A factory for one built-in driver of a given kind.
pub type ApmFactory = Arc<dyn Fn(&str) -> Arc<dyn Apm> + Send + Sync>;
/// A factory for one built-in target driver.
pub type TargetFactory = Arc<dyn Fn(&str) -> Arc<dyn Target> + Send + Sync>;
/// A factory for one built-in strategy driver.
pub type StrategyFactory = Arc<dyn Fn(&str) -> Arc<dyn Strategy> + Send + Sync>;

/// The set of built-in drivers a `PluginFleet` can dispatch to, keyed by
/// driver name (distinct from the instance name a policy references).
#[derive(Default)]
pub struct BuiltinRegistry {
    apms: RwLock<HashMap<String, ApmFactory>>,
    targets: RwLock<HashMap<String, TargetFactory>>,
    strategies: RwLock<HashMap<String, StrategyFactory>>,
}

impl BuiltinRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a built-in APM driver factory.
    pub fn register_apm(&self, driver: impl Into<String>, factory: ApmFactory) {
        self.apms.write().insert(driver.into(), factory);
    }

    /// Registers a built-in target driver factory.
    pub fn register_target(&self, driver: impl Into<String>, factory: TargetFactory) {
        self.targets.write().insert(driver.into(), factory);
    }

    /// Registers a built-in strategy driver factory.
    pub fn register_strategy(&self, driver: impl Into<String>, factory: StrategyFactory) {
        self.strategies.write().insert(driver.into(), factory);
    }

    /// Instantiates a built-in APM driver by name, if registered.
    #[must_use]
    pub fn build_apm(&self, driver: &str, instance_name: &str) -> Option<Arc<dyn Apm>> {
        self.apms.read().get(driver).map(|f| f(instance_name))
    }

    /// Instantiates a built-in target driver by name, if registered.
    #[must_use]
    pub fn build_target(&self, driver: &str, instance_name: &str) -> Option<Arc<dyn Target>> {
        self.targets.read().get(driver).map(|f| f(instance_name))
    }

    /// Instantiates a built-in strategy driver by name, if registered.
    #[must_use]
    pub fn build_strategy(&self, driver: &str, instance_name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.read().get(driver).map(|f| f(instance_name))
    }

    /// A registry pre-populated with the deterministic test doubles in
    /// this module, registered under `"test-noop-apm"`,
    /// `"test-in-memory-target"`, and `"test-pass-through-strategy"`.
    #[must_use]
    pub fn with_test_doubles() -> Self {
        let registry = Self::new();
        registry.register_apm(
            "test-noop-apm",
            Arc::new(|name| Arc::new(NoopApm::new(name)) as Arc<dyn Apm>),
        );
        registry.register_target(
            "test-in-memory-target",
            Arc::new(|name| Arc::new(InMemoryTarget::new(name)) as Arc<dyn Target>),
        );
        registry.register_strategy(
            "test-pass-through-strategy",
            Arc::new(|name| Arc::new(PassThroughStrategy::new(name)) as Arc<dyn Strategy>),
        );
        registry
    }
}

/// An APM double that always returns an empty series.
pub struct NoopApm {
    name: String,
}

impl NoopApm {
    /// Creates a new no-op APM instance.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Base for NoopApm {
    fn plugin_info(&self) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            kind: PluginKind::Apm,
        }
    }
    async fn set_config(&self, _config: HashMap<String, String>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Apm for NoopApm {
    async fn query(&self, _query: &str, _range: TimeRange) -> Result<Vec<MetricPoint>> {
        Ok(Vec::new())
    }
}

/// A target double holding an in-memory, settable `TargetStatus` and
/// recording every `Scale` call it receives, for use in worker/handler
/// test suites.
pub struct InMemoryTarget {
    name: String,
    status: RwLock<Option<TargetStatus>>,
    scale_calls: RwLock<Vec<ScalingAction>>,
}

impl InMemoryTarget {
    /// Creates a target double reporting `Ready=true, Count=0` until
    /// `set_status` is called.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: RwLock::new(Some(TargetStatus::ready(0))),
            scale_calls: RwLock::new(Vec::new()),
        }
    }

    /// Replaces the status this target reports. `None` simulates "target
    /// does not exist".
    pub fn set_status(&self, status: Option<TargetStatus>) {
        *self.status.write() = status;
    }

    /// Returns every action passed to `scale` so far, in call order.
    #[must_use]
    pub fn scale_calls(&self) -> Vec<ScalingAction> {
        self.scale_calls.read().clone()
    }
}

#[async_trait]
impl Base for InMemoryTarget {
    fn plugin_info(&self) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            kind: PluginKind::Target,
        }
    }
    async fn set_config(&self, _config: HashMap<String, String>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Target for InMemoryTarget {
    async fn status(&self, _config: &HashMap<String, String>) -> Result<Option<TargetStatus>> {
        Ok(self.status.read().clone())
    }

    async fn scale(
        &self,
        action: &ScalingAction,
        _config: &HashMap<String, String>,
    ) -> Result<ScaleOutcome> {
        self.scale_calls.write().push(action.clone());
        if let Some(status) = self.status.write().as_mut() {
            status.count = action.count;
        }
        Ok(ScaleOutcome::Scaled)
    }
}

/// A strategy double that always returns `Direction::None`.
pub struct PassThroughStrategy {
    name: String,
}

impl PassThroughStrategy {
    /// Creates a new pass-through strategy instance.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Base for PassThroughStrategy {
    fn plugin_info(&self) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            kind: PluginKind::Strategy,
        }
    }
    async fn set_config(&self, _config: HashMap<String, String>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Strategy for PassThroughStrategy {
    async fn run(&self, _input: StrategyInput) -> Result<ScalingAction> {
        Ok(ScalingAction {
            direction: Direction::None,
            count: _input.current_count,
            reason: "pass-through: no scaling".into(),
            error: false,
            meta: HashMap::new(),
        })
    }
}
