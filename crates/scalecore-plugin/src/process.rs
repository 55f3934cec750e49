//! External plugin process supervision: spawns a driver binary, performs
//! the handshake, and exposes a typed RPC client implementing the
//! `Apm`/`Target`/`Strategy` traits over its stdio (§4.1, §6).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use scalecore_core::{ScalingAction, TargetStatus};
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{PluginError, Result};
use crate::rpc::{self, read_handshake};
use crate::traits::{
    Apm, Base, MetricPoint, PluginInfo, PluginKind, ScaleOutcome, Strategy, StrategyInput, Target,
    TimeRange,
};

/// The generic transport half of an external plugin: request/response
/// framing over an arbitrary (reader, writer) pair. Production code uses
/// a spawned child's stdio; tests use an in-memory duplex pipe standing
/// in for a plugin partner, so the handshake and framing logic itself is
/// exercised without a real subprocess.
struct Transport<R, W> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
    next_id: AtomicU64,
}

impl<R, W> Transport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn call(&mut self, plugin_name: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        rpc::call(&mut self.reader, &mut self.writer, plugin_name, id, method, params).await
    }
}

/// A launched external plugin process with its RPC transport.
pub struct ExternalPluginProcess {
    name: String,
    kind: PluginKind,
    info: PluginInfo,
    child: Mutex<Child>,
    transport: Mutex<Transport<ChildStdout, ChildStdin>>,
}

impl ExternalPluginProcess {
    /// Spawns `driver` with `args`, reads its handshake, asks for its
    /// `plugin_info`, and verifies it matches `(name, kind)`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LaunchFailed`] if the process cannot be
    /// spawned, [`PluginError::HandshakeFailed`] if the handshake is bad,
    /// or [`PluginError::IdentityMismatch`] if the reported identity
    /// doesn't match what was configured.
    pub async fn spawn(driver: &str, args: &[String], kind: PluginKind, name: &str) -> Result<Self> {
        let mut child = Command::new(driver)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| PluginError::LaunchFailed {
                name: name.to_string(),
                kind: kind.label(),
                reason: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| PluginError::LaunchFailed {
            name: name.to_string(),
            kind: kind.label(),
            reason: "child had no stdout pipe".into(),
        })?;
        let stdin = child.stdin.take().ok_or_else(|| PluginError::LaunchFailed {
            name: name.to_string(),
            kind: kind.label(),
            reason: "child had no stdin pipe".into(),
        })?;

        let mut reader = BufReader::new(stdout);
        read_handshake(&mut reader, name).await?;
        let writer = BufWriter::new(stdin);
        let mut transport = Transport {
            reader,
            writer,
            next_id: AtomicU64::new(0),
        };

        let info_value = transport.call(name, "plugin_info", serde_json::Value::Null).await?;
        let info: PluginInfo = serde_json::from_value(info_value).map_err(|e| PluginError::CallFailed {
            name: name.to_string(),
            method: "plugin_info".to_string(),
            reason: e.to_string(),
        })?;
        if info.kind != kind || info.name != name {
            let _ = child.start_kill();
            return Err(PluginError::IdentityMismatch {
                name: name.to_string(),
                expected_kind: kind.label(),
                reported_kind: info.kind.label().to_string(),
                reported_name: info.name,
            });
        }

        info!(name, kind = kind.label(), "launched external plugin");
        Ok(Self {
            name: name.to_string(),
            kind,
            info,
            child: Mutex::new(child),
            transport: Mutex::new(transport),
        })
    }

    async fn rpc_call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let mut transport = self.transport.lock().await;
        transport.call(&self.name, method, params).await
    }

    /// Best-effort process termination (§4.1 `KillPlugins`).
    pub async fn kill(&self) {
        let mut child = self.child.lock().await;
        if let Err(e) = child.start_kill() {
            warn!(name = %self.name, error = %e, "failed to kill plugin process");
        }
    }
}

#[async_trait]
impl Base for ExternalPluginProcess {
    fn plugin_info(&self) -> PluginInfo {
        self.info.clone()
    }

    async fn set_config(&self, config: HashMap<String, String>) -> Result<()> {
        let params = serde_json::to_value(&config).map_err(|e| PluginError::ConfigFailed {
            name: self.name.clone(),
            reason: e.to_string(),
        })?;
        self.rpc_call("set_config", params)
            .await
            .map_err(|e| PluginError::ConfigFailed {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

/// `Apm` wrapper over an external plugin process.
pub struct ExternalApm(pub std::sync::Arc<ExternalPluginProcess>);

#[async_trait]
impl Base for ExternalApm {
    fn plugin_info(&self) -> PluginInfo {
        self.0.plugin_info()
    }
    async fn set_config(&self, config: HashMap<String, String>) -> Result<()> {
        self.0.set_config(config).await
    }
}

#[async_trait]
impl Apm for ExternalApm {
    async fn query(&self, query: &str, range: TimeRange) -> Result<Vec<MetricPoint>> {
        let params = serde_json::json!({ "query": query, "range": range });
        let value = self.0.rpc_call("query", params).await?;
        serde_json::from_value(value).map_err(|e| PluginError::CallFailed {
            name: self.0.name.clone(),
            method: "query".into(),
            reason: e.to_string(),
        })
    }
}

/// `Target` wrapper over an external plugin process.
pub struct ExternalTarget(pub std::sync::Arc<ExternalPluginProcess>);

#[async_trait]
impl Base for ExternalTarget {
    fn plugin_info(&self) -> PluginInfo {
        self.0.plugin_info()
    }
    async fn set_config(&self, config: HashMap<String, String>) -> Result<()> {
        self.0.set_config(config).await
    }
}

#[async_trait]
impl Target for ExternalTarget {
    async fn status(&self, config: &HashMap<String, String>) -> Result<Option<TargetStatus>> {
        let params = serde_json::json!({ "config": config });
        let value = self.0.rpc_call("status", params).await?;
        serde_json::from_value(value).map_err(|e| PluginError::CallFailed {
            name: self.0.name.clone(),
            method: "status".into(),
            reason: e.to_string(),
        })
    }

    async fn scale(
        &self,
        action: &ScalingAction,
        config: &HashMap<String, String>,
    ) -> Result<ScaleOutcome> {
        let params = serde_json::json!({ "action": action, "config": config });
        let value = self.0.rpc_call("scale", params).await?;
        serde_json::from_value(value).map_err(|e| PluginError::CallFailed {
            name: self.0.name.clone(),
            method: "scale".into(),
            reason: e.to_string(),
        })
    }
}

/// `Strategy` wrapper over an external plugin process.
pub struct ExternalStrategy(pub std::sync::Arc<ExternalPluginProcess>);

#[async_trait]
impl Base for ExternalStrategy {
    fn plugin_info(&self) -> PluginInfo {
        self.0.plugin_info()
    }
    async fn set_config(&self, config: HashMap<String, String>) -> Result<()> {
        self.0.set_config(config).await
    }
}

#[async_trait]
impl Strategy for ExternalStrategy {
    async fn run(&self, input: StrategyInput) -> Result<ScalingAction> {
        let params = serde_json::json!({
            "check": input.check,
            "metrics": input.metrics,
            "policy": input.policy,
            "current_count": input.current_count,
        });
        let value = self.0.rpc_call("run", params).await?;
        serde_json::from_value(value).map_err(|e| PluginError::CallFailed {
            name: self.0.name.clone(),
            method: "run".into(),
            reason: e.to_string(),
        })
    }
}
