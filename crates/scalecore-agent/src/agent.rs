//! The `Agent` (§4, §6): wires a [`PluginFleet`], the configured policy
//! sources, an [`EvalBroker`], a [`PolicyManager`], an optional
//! [`HaPartitioner`], and per-queue worker pools into one running
//! control plane.
//!
//! This struct consumes an already-built [`AgentConfig`] value. Loading
//! that value from HCL/JSON files, merging CLI flags, and the flags
//! themselves are a named-but-external collaborator (§1, §6) — nothing
//! in this crate reads a file or parses an argument.

use std::sync::Arc;
use std::time::Duration;

use scalecore_broker::EvalBroker;
use scalecore_core::config::AgentConfig;
use scalecore_core::SharedClock;
use scalecore_ha::{HaPartitioner, ServiceCatalog};
use scalecore_manager::PolicyManager;
use scalecore_plugin::{BuiltinRegistry, PluginFleet, PluginInstanceSpec, PluginKind};
use scalecore_policy::{canonicalize::PolicyDefaults, FileSource, NomadApiClient, NomadSource, PolicySource};
use scalecore_worker::WorkerPool;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{AgentError, Result};

/// The default poll interval a watched policy directory is scanned at
/// when the file source is enabled; config has no dedicated knob for
/// it, so it shares the source-wide evaluation-interval default.
fn file_source_poll_interval(config: &AgentConfig) -> Duration {
    config.policy.default_evaluation_interval
}

/// One running control plane: a plugin fleet, policy discovery, a
/// manager reconciling policy handlers, and the worker pools draining
/// the evaluations those handlers enqueue.
pub struct Agent {
    config: AgentConfig,
    fleet: Arc<PluginFleet>,
    broker: Arc<EvalBroker>,
    manager: Arc<PolicyManager>,
    partitioner: Option<Arc<HaPartitioner>>,
    clock: SharedClock,
}

impl Agent {
    /// Builds an agent from `config`, launching every configured plugin
    /// instance and constructing the policy sources, manager, and (if
    /// `ha.enabled`) HA partitioner it names.
    ///
    /// `nomad_client` is required when `policy.nomad_source.enabled`;
    /// `catalog` is required when `ha.enabled`. Both are named-but-
    /// external collaborators (§7) this crate only consumes.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured plugin instance fails to load,
    /// a required collaborator is missing, or this replica fails to
    /// join the HA membership catalog.
    pub async fn new(
        config: AgentConfig,
        builtins: BuiltinRegistry,
        nomad_client: Option<Arc<dyn NomadApiClient>>,
        catalog: Option<Arc<dyn ServiceCatalog>>,
        clock: SharedClock,
    ) -> Result<Self> {
        let fleet = Arc::new(PluginFleet::new(builtins));
        fleet
            .load(plugin_specs(&config))
            .await
            .map_err(AgentError::PluginLoad)?;

        let broker = Arc::new(EvalBroker::new(
            clock.clone(),
            config.policy_eval.delivery_limit,
            config.policy_eval.ack_timeout,
        ));

        let sources = build_sources(&config, nomad_client)?;

        let partitioner = match (config.ha.enabled, catalog) {
            (true, Some(catalog)) => {
                let member_id = uuid::Uuid::new_v4().to_string();
                info!(member_id, service = %config.ha.consul.service_name, "joining HA membership catalog");
                let partitioner =
                    HaPartitioner::register(catalog, config.ha.consul.service_name.as_str(), member_id)
                        .await
                        .map_err(AgentError::Ha)?;
                Some(Arc::new(partitioner))
            }
            (true, None) => {
                return Err(AgentError::MissingCollaborator {
                    feature: "ha.enabled",
                    collaborator: "ServiceCatalog",
                })
            }
            (false, _) => None,
        };

        let manager = Arc::new(PolicyManager::new(
            fleet.clone(),
            broker.clone(),
            clock.clone(),
            sources,
            partitioner.clone(),
        ));

        Ok(Self {
            config,
            fleet,
            broker,
            manager,
            partitioner,
            clock,
        })
    }

    /// The number of policy handlers currently running, for diagnostics.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.manager.handler_count()
    }

    /// Requests every policy source re-establish its discovery cursor
    /// from scratch (§4.4).
    pub fn reload_sources(&self) {
        self.manager.reload_sources();
    }

    /// Runs the agent until `cancel` fires: joins the HA ring (if
    /// configured), waits out `policy_eval.evaluate_after`, then starts
    /// the policy manager, the broker's ack-timeout reaper, and the
    /// `horizontal`/`cluster` worker pools. On shutdown, stops every
    /// task and kills externally-launched plugin processes.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut background = Vec::new();

        let (rebalance_tx, rebalance_rx) = watch::channel(());
        if let Some(partitioner) = self.partitioner.clone() {
            let cancel = cancel.child_token();
            background.push(tokio::spawn(async move {
                if let Err(e) = partitioner.run(cancel, rebalance_tx).await {
                    warn!(error = %e, "HA partitioner stopped");
                }
            }));
        }

        let broker = self.broker.clone();
        let reaper_cancel = cancel.child_token();
        background.push(tokio::spawn(async move {
            broker.run_timeout_reaper(reaper_cancel, Duration::from_secs(10)).await;
        }));

        if !self.config.policy_eval.evaluate_after.is_zero() {
            info!(grace = ?self.config.policy_eval.evaluate_after, "waiting out evaluate_after grace period");
            tokio::select! {
                () = tokio::time::sleep(self.config.policy_eval.evaluate_after) => {}
                () = cancel.cancelled() => {
                    self.shutdown(background).await;
                    return;
                }
            }
        }

        let manager = self.manager.clone();
        let manager_cancel = cancel.child_token();
        background.push(tokio::spawn(async move {
            manager.run(manager_cancel, rebalance_rx).await;
        }));

        let pools = vec![
            WorkerPool::spawn(
                "horizontal",
                self.config.policy_eval.workers.horizontal,
                self.broker.clone(),
                self.fleet.clone(),
                self.clock.clone(),
                cancel.child_token(),
            ),
            WorkerPool::spawn(
                "cluster",
                self.config.policy_eval.workers.cluster,
                self.broker.clone(),
                self.fleet.clone(),
                self.clock.clone(),
                cancel.child_token(),
            ),
        ];

        cancel.cancelled().await;
        info!("shutdown signal received, draining workers");
        for pool in pools {
            pool.join().await;
        }
        self.shutdown(background).await;
    }

    async fn shutdown(&self, background: Vec<tokio::task::JoinHandle<()>>) {
        for task in background {
            let _ = task.await;
        }
        self.fleet.kill_plugins().await;
    }
}

fn plugin_specs(config: &AgentConfig) -> Vec<(PluginKind, PluginInstanceSpec)> {
    let mut specs = Vec::new();
    for (kind, instances) in [
        (PluginKind::Apm, &config.apm),
        (PluginKind::Target, &config.target),
        (PluginKind::Strategy, &config.strategy),
    ] {
        for instance in instances {
            specs.push((
                kind,
                PluginInstanceSpec {
                    name: instance.name.clone(),
                    driver: instance.driver.clone(),
                    args: instance.args.clone(),
                    external: true,
                    config: instance.config.clone(),
                },
            ));
        }
    }
    specs
}

fn build_sources(
    config: &AgentConfig,
    nomad_client: Option<Arc<dyn NomadApiClient>>,
) -> Result<Vec<Arc<dyn PolicySource>>> {
    let defaults = PolicyDefaults::new(
        config.policy.default_cooldown,
        config.policy.default_evaluation_interval,
    );

    let mut sources: Vec<Arc<dyn PolicySource>> = Vec::new();

    if config.policy.nomad_source.enabled {
        let client = nomad_client.ok_or(AgentError::MissingCollaborator {
            feature: "policy.nomad_source.enabled",
            collaborator: "NomadApiClient",
        })?;
        sources.push(Arc::new(NomadSource::new(client, defaults.clone())));
    }

    if config.policy.file_source.enabled {
        let dir = config.policy.dir.clone().ok_or(AgentError::MissingPolicyDir)?;
        sources.push(Arc::new(FileSource::new(dir, file_source_poll_interval(config), defaults)));
    }

    if sources.is_empty() {
        return Err(AgentError::NoPolicySourceEnabled);
    }

    Ok(sources)
}
