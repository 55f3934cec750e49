//! The Plugin Fleet: launches, configures, dispenses, and reloads the
//! APM/target/strategy plugin instances a running agent uses (§4.1).
//!
//! Concrete plugin implementations (Prometheus, Datadog, AWS ASG, ...)
//! are out of scope; this crate owns the launch/handshake/RPC mechanics
//! and the dispense map, plus a handful of deterministic test-double
//! plugins reused across downstream crates' test suites.

#![forbid(unsafe_code)]

pub mod builtin;
pub mod error;
pub mod fleet;
pub mod process;
pub mod rpc;
pub mod traits;

pub use builtin::{ApmFactory, BuiltinRegistry, InMemoryTarget, NoopApm, PassThroughStrategy, StrategyFactory, TargetFactory};
pub use error::{PluginError, Result};
pub use fleet::{PluginFleet, PluginInstanceSpec};
pub use process::{ExternalApm, ExternalPluginProcess, ExternalStrategy, ExternalTarget};
pub use traits::{
    Apm, Base, MetricPoint, PluginInfo, PluginKind, ScaleOutcome, Strategy, StrategyInput, Target,
    TimeRange,
};
