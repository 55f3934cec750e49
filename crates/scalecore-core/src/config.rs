//! Agent configuration schema (§6 "External Interfaces").
//!
//! These are plain, `serde`-deserializable structs mirroring the
//! recognized HCL/JSON options. Loading them from files, merging CLI
//! flags, and HCL parsing itself are named-but-external collaborators
//! (the CLI/HCL loader is out of scope per §1) — this module only
//! defines the shape components agree on.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// `log_level` values (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// One configured plugin instance (`apm`/`target`/`strategy` blocks, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInstanceConfig {
    /// Configured instance name, used by policies to reference it.
    pub name: String,
    /// Driver: `"built-in"` or an external binary name.
    pub driver: String,
    /// Args passed to an external driver's process.
    #[serde(default)]
    pub args: Vec<String>,
    /// Free-form plugin config, passed to `SetConfig`.
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// `policy { source "nomad"|"file" { enabled } }` (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PolicySourceConfig {
    /// Whether this source is active.
    pub enabled: bool,
}

/// `policy { ... }` (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Directory the file source watches.
    pub dir: Option<PathBuf>,
    /// Default cooldown applied when a policy omits one.
    #[serde(with = "humantime_secs")]
    pub default_cooldown: Duration,
    /// Default evaluation interval applied when a policy omits one.
    #[serde(with = "humantime_secs")]
    pub default_evaluation_interval: Duration,
    /// Nomad policy source config.
    pub nomad_source: PolicySourceConfig,
    /// File policy source config.
    pub file_source: PolicySourceConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            dir: None,
            default_cooldown: Duration::from_secs(300),
            default_evaluation_interval: Duration::from_secs(10),
            nomad_source: PolicySourceConfig { enabled: true },
            file_source: PolicySourceConfig { enabled: false },
        }
    }
}

/// `policy_eval { workers { ... } }` (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolsConfig {
    /// Number of `horizontal`-queue workers.
    pub horizontal: usize,
    /// Number of `cluster`-queue workers.
    pub cluster: usize,
}

impl Default for WorkerPoolsConfig {
    fn default() -> Self {
        Self {
            horizontal: 2,
            cluster: 2,
        }
    }
}

/// `policy_eval { ... }` (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEvalConfig {
    /// Max redelivery attempts before an evaluation is dropped.
    pub delivery_limit: u32,
    /// How long a dequeued evaluation may stay un-acked.
    #[serde(with = "humantime_secs")]
    pub ack_timeout: Duration,
    /// Grace period after agent start before the first evaluation runs.
    #[serde(with = "humantime_secs")]
    pub evaluate_after: Duration,
    /// Per-queue worker pool sizes.
    pub workers: WorkerPoolsConfig,
}

impl Default for PolicyEvalConfig {
    fn default() -> Self {
        Self {
            delivery_limit: 1,
            ack_timeout: Duration::from_secs(5 * 60),
            evaluate_after: Duration::ZERO,
            workers: WorkerPoolsConfig::default(),
        }
    }
}

/// `nomad { ... }` (§6). The core never opens this connection itself —
/// it is handed to the `NomadApiClient` collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NomadConfig {
    pub address: Option<String>,
    pub region: Option<String>,
    pub namespace: Option<String>,
    pub token: Option<String>,
    pub http_auth: Option<String>,
    pub ca_cert: Option<String>,
    pub ca_path: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    pub tls_server_name: Option<String>,
    pub skip_verify: bool,
    #[serde(with = "humantime_secs_opt", default)]
    pub block_query_wait_time: Option<Duration>,
}

/// `ha { consul { ... } }` (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HaCatalogConfig {
    pub service_name: String,
}

/// `ha { ... }` (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HaConfig {
    pub enabled: bool,
    pub consul: HaCatalogConfig,
}

/// Top-level agent configuration (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub log_level: LogLevel,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default)]
    pub enable_debug: bool,
    pub plugin_dir: PathBuf,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub policy_eval: PolicyEvalConfig,
    #[serde(default)]
    pub nomad: NomadConfig,
    #[serde(default)]
    pub ha: HaConfig,
    #[serde(default)]
    pub apm: Vec<PluginInstanceConfig>,
    #[serde(default)]
    pub target: Vec<PluginInstanceConfig>,
    #[serde(default)]
    pub strategy: Vec<PluginInstanceConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            log_json: false,
            enable_debug: false,
            plugin_dir: PathBuf::from("/tmp/scalecore/plugins"),
            policy: PolicyConfig::default(),
            policy_eval: PolicyEvalConfig::default(),
            nomad: NomadConfig::default(),
            ha: HaConfig::default(),
            apm: Vec::new(),
            target: Vec::new(),
            strategy: Vec::new(),
        }
    }
}

mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod humantime_secs_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        d.map(|v| v.as_secs()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}
