//! The Plugin Fleet (§4.1): launches configured plugin instances,
//! dispenses them to callers by name, and reloads the fleet when config
//! changes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::builtin::BuiltinRegistry;
use crate::error::{PluginError, Result};
use crate::process::{ExternalApm, ExternalPluginProcess, ExternalStrategy, ExternalTarget};
use crate::traits::{Apm, PluginKind, Strategy, Target};

/// One configured plugin instance, as the fleet's caller supplies it to
/// `Load`/`Reload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInstanceSpec {
    /// The instance name policies reference (`apm`/`strategy`/`target`
    /// fields in a policy or check).
    pub name: String,
    /// The driver to launch: either a built-in driver name registered in
    /// a [`BuiltinRegistry`], or an external binary path.
    pub driver: String,
    /// Arguments passed to an external driver binary. Ignored for
    /// built-ins.
    pub args: Vec<String>,
    /// `true` if `driver` names an external binary rather than a
    /// built-in driver.
    pub external: bool,
    /// Config pushed to the instance via `SetConfig` after launch.
    pub config: HashMap<String, String>,
}

enum Instance {
    Apm(Arc<dyn Apm>),
    Target(Arc<dyn Target>),
    Strategy(Arc<dyn Strategy>),
}

struct LiveInstance {
    spec: PluginInstanceSpec,
    kind: PluginKind,
    instance: Instance,
    /// Set only for externally-launched instances, so `KillPlugins` can
    /// terminate the subprocess.
    process: Option<Arc<ExternalPluginProcess>>,
}

/// Dispenses APM/target/strategy plugin instances by name, and tracks
/// enough state to diff and reload the fleet on config changes (§4.1).
pub struct PluginFleet {
    builtins: BuiltinRegistry,
    instances: RwLock<HashMap<String, LiveInstance>>,
}

impl PluginFleet {
    /// An empty fleet backed by `builtins` for built-in driver lookups.
    #[must_use]
    pub fn new(builtins: BuiltinRegistry) -> Self {
        Self {
            builtins,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Launches every instance in `specs`, pushes its config, and adds it
    /// to the dispense map. Partial failures do not roll back successful
    /// launches (§4.1); if any instance fails, the launched ones remain
    /// active and a [`PluginError::Multi`] is returned summarizing the
    /// failures.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Multi`] if one or more instances in `specs`
    /// failed to launch or configure.
    pub async fn load(&self, specs: Vec<(PluginKind, PluginInstanceSpec)>) -> Result<()> {
        let total = specs.len();
        let mut failures = Vec::new();
        for (kind, spec) in specs {
            let name = spec.name.clone();
            match self.load_one(kind, spec).await {
                Ok(()) => info!(name, kind = kind.label(), "loaded plugin instance"),
                Err(e) => {
                    warn!(name, kind = kind.label(), error = %e, "failed to load plugin instance");
                    failures.push(e);
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            let failed = failures.len();
            Err(PluginError::Multi(failed, total, failures))
        }
    }

    async fn load_one(&self, kind: PluginKind, spec: PluginInstanceSpec) -> Result<()> {
        let (instance, process) = if spec.external {
            let process = Arc::new(
                ExternalPluginProcess::spawn(&spec.driver, &spec.args, kind, &spec.name).await?,
            );
            let instance = match kind {
                PluginKind::Apm => Instance::Apm(Arc::new(ExternalApm(process.clone()))),
                PluginKind::Target => Instance::Target(Arc::new(ExternalTarget(process.clone()))),
                PluginKind::Strategy => {
                    Instance::Strategy(Arc::new(ExternalStrategy(process.clone())))
                }
            };
            (instance, Some(process))
        } else {
            let instance = match kind {
                PluginKind::Apm => Instance::Apm(self.builtins.build_apm(&spec.driver, &spec.name).ok_or_else(
                    || PluginError::NotFound {
                        name: spec.driver.clone(),
                        kind: kind.label(),
                    },
                )?),
                PluginKind::Target => {
                    Instance::Target(self.builtins.build_target(&spec.driver, &spec.name).ok_or_else(
                        || PluginError::NotFound {
                            name: spec.driver.clone(),
                            kind: kind.label(),
                        },
                    )?)
                }
                PluginKind::Strategy => Instance::Strategy(
                    self.builtins
                        .build_strategy(&spec.driver, &spec.name)
                        .ok_or_else(|| PluginError::NotFound {
                            name: spec.driver.clone(),
                            kind: kind.label(),
                        })?,
                ),
            };
            (instance, None)
        };

        let config_result = match &instance {
            Instance::Apm(p) => p.set_config(spec.config.clone()).await,
            Instance::Target(p) => p.set_config(spec.config.clone()).await,
            Instance::Strategy(p) => p.set_config(spec.config.clone()).await,
        };
        if let Err(e) = config_result {
            if let Some(process) = process {
                warn!(name = %spec.name, kind = kind.label(), "killing instance after config handshake failure");
                process.kill().await;
            }
            return Err(e);
        }

        self.instances.write().insert(
            spec.name.clone(),
            LiveInstance {
                spec,
                kind,
                instance,
                process,
            },
        );
        Ok(())
    }

    /// Returns the named APM instance.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`] if no instance is registered
    /// under `name`, or [`PluginError::WrongType`] if it is registered as
    /// a different kind.
    pub fn get_apm(&self, name: &str) -> Result<Arc<dyn Apm>> {
        match self.lookup(name, PluginKind::Apm)?.instance {
            Instance::Apm(p) => Ok(p),
            _ => unreachable!("lookup enforces kind"),
        }
    }

    /// Returns the named target instance.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`] if no instance is registered
    /// under `name`, or [`PluginError::WrongType`] if it is registered as
    /// a different kind.
    pub fn get_target(&self, name: &str) -> Result<Arc<dyn Target>> {
        match self.lookup(name, PluginKind::Target)?.instance {
            Instance::Target(p) => Ok(p),
            _ => unreachable!("lookup enforces kind"),
        }
    }

    /// Returns the named strategy instance.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`] if no instance is registered
    /// under `name`, or [`PluginError::WrongType`] if it is registered as
    /// a different kind.
    pub fn get_strategy(&self, name: &str) -> Result<Arc<dyn Strategy>> {
        match self.lookup(name, PluginKind::Strategy)?.instance {
            Instance::Strategy(p) => Ok(p),
            _ => unreachable!("lookup enforces kind"),
        }
    }

    fn lookup(&self, name: &str, kind: PluginKind) -> Result<LiveInstanceSnapshot> {
        let instances = self.instances.read();
        let live = instances.get(name).ok_or_else(|| PluginError::NotFound {
            name: name.to_string(),
            kind: kind.label(),
        })?;
        if live.kind != kind {
            return Err(PluginError::WrongType {
                name: name.to_string(),
                requested_kind: kind.label(),
                actual_kind: live.kind.label(),
            });
        }
        Ok(LiveInstanceSnapshot {
            instance: clone_instance(&live.instance),
        })
    }

    /// Diffs `specs` against the currently loaded instances by deep
    /// equality of their [`PluginInstanceSpec`]: unchanged instances are
    /// left running, changed or new ones are (re-)launched, and instances
    /// no longer present in `specs` are killed and dropped (§4.1).
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Multi`] if any new or changed instance
    /// failed to (re-)launch; instances that did launch, and the kill of
    /// removed instances, still take effect.
    pub async fn reload(&self, specs: Vec<(PluginKind, PluginInstanceSpec)>) -> Result<()> {
        let wanted: HashMap<String, (PluginKind, PluginInstanceSpec)> =
            specs.into_iter().map(|(k, s)| (s.name.clone(), (k, s))).collect();

        let stale: Vec<String> = {
            let instances = self.instances.read();
            instances
                .iter()
                .filter(|(name, live)| match wanted.get(*name) {
                    None => true,
                    Some((kind, spec)) => *kind != live.kind || *spec != live.spec,
                })
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in &stale {
            self.kill_one(name).await;
        }

        let to_load: Vec<(PluginKind, PluginInstanceSpec)> = {
            let instances = self.instances.read();
            wanted
                .into_iter()
                .filter(|(name, (kind, spec))| match instances.get(name) {
                    Some(live) => live.kind != *kind || live.spec != *spec,
                    None => true,
                })
                .map(|(_, v)| v)
                .collect()
        };
        if to_load.is_empty() {
            Ok(())
        } else {
            self.load(to_load).await
        }
    }

    async fn kill_one(&self, name: &str) {
        let process = self.instances.write().remove(name).and_then(|live| live.process);
        if let Some(process) = process {
            process.kill().await;
        }
    }

    /// Kills every externally-launched plugin process and clears the
    /// dispense map (§4.1, called at agent shutdown).
    pub async fn kill_plugins(&self) {
        let removed: Vec<LiveInstance> = self.instances.write().drain().map(|(_, v)| v).collect();
        for live in removed {
            if let Some(process) = live.process {
                process.kill().await;
            }
        }
    }

    /// Names and kinds of every currently loaded instance, for
    /// diagnostics.
    #[must_use]
    pub fn loaded(&self) -> Vec<(String, PluginKind)> {
        self.instances
            .read()
            .values()
            .map(|live| (live.spec.name.clone(), live.kind))
            .collect()
    }
}

struct LiveInstanceSnapshot {
    instance: Instance,
}

fn clone_instance(instance: &Instance) -> Instance {
    match instance {
        Instance::Apm(p) => Instance::Apm(p.clone()),
        Instance::Target(p) => Instance::Target(p.clone()),
        Instance::Strategy(p) => Instance::Strategy(p.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_fleet() -> PluginFleet {
        PluginFleet::new(BuiltinRegistry::with_test_doubles())
    }

    fn apm_spec(name: &str) -> (PluginKind, PluginInstanceSpec) {
        (
            PluginKind::Apm,
            PluginInstanceSpec {
                name: name.to_string(),
                driver: "test-noop-apm".to_string(),
                args: Vec::new(),
                external: false,
                config: HashMap::new(),
            },
        )
    }

    #[tokio::test]
    async fn load_then_get_dispenses_instance() {
        let fleet = test_fleet();
        fleet.load(vec![apm_spec("apm-a")]).await.expect("load ok");
        let apm = fleet.get_apm("apm-a").expect("apm present");
        assert_eq!(apm.plugin_info().name, "apm-a");
    }

    #[tokio::test]
    async fn get_unknown_name_is_not_found() {
        let fleet = test_fleet();
        let err = fleet.get_apm("missing").unwrap_err();
        assert!(matches!(err, PluginError::NotFound { .. }));
    }

    #[tokio::test]
    async fn get_wrong_kind_errors() {
        let fleet = test_fleet();
        fleet.load(vec![apm_spec("apm-a")]).await.expect("load ok");
        let err = fleet.get_target("apm-a").unwrap_err();
        assert!(matches!(err, PluginError::WrongType { .. }));
    }

    #[tokio::test]
    async fn load_failure_reports_multi_but_keeps_successes() {
        let fleet = test_fleet();
        let bad = (
            PluginKind::Apm,
            PluginInstanceSpec {
                name: "apm-bad".to_string(),
                driver: "no-such-driver".to_string(),
                args: Vec::new(),
                external: false,
                config: HashMap::new(),
            },
        );
        let err = fleet
            .load(vec![apm_spec("apm-good"), bad])
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Multi(1, 2, _)));
        assert!(fleet.get_apm("apm-good").is_ok());
        assert!(fleet.get_apm("apm-bad").is_err());
    }

    #[tokio::test]
    async fn reload_removes_instances_no_longer_present() {
        let fleet = test_fleet();
        fleet.load(vec![apm_spec("apm-a")]).await.expect("load ok");
        fleet.reload(vec![]).await.expect("reload ok");
        assert!(fleet.get_apm("apm-a").is_err());
    }

    #[tokio::test]
    async fn reload_leaves_unchanged_instances_alone() {
        let fleet = test_fleet();
        fleet.load(vec![apm_spec("apm-a")]).await.expect("load ok");
        fleet.reload(vec![apm_spec("apm-a")]).await.expect("reload ok");
        assert!(fleet.get_apm("apm-a").is_ok());
        assert_eq!(fleet.loaded().len(), 1);
    }

    #[tokio::test]
    async fn reload_relaunches_changed_instance_config() {
        let fleet = test_fleet();
        fleet.load(vec![apm_spec("apm-a")]).await.expect("load ok");
        let mut changed = apm_spec("apm-a");
        changed.1.config.insert("k".to_string(), "v".to_string());
        fleet.reload(vec![changed]).await.expect("reload ok");
        assert!(fleet.get_apm("apm-a").is_ok());
        assert_eq!(fleet.loaded().len(), 1);
    }

    #[tokio::test]
    async fn kill_plugins_clears_dispense_map() {
        let fleet = test_fleet();
        fleet.load(vec![apm_spec("apm-a")]).await.expect("load ok");
        fleet.kill_plugins().await;
        assert!(fleet.loaded().is_empty());
    }
}
