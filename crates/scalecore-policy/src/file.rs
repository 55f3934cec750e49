//! The file policy source (§4.2): watches a directory of `*.json`
//! policy files. There's no filesystem-event dependency in the
//! workspace stack, so this adapter polls on a fixed interval rather
//! than subscribing to inotify/kqueue — simpler, and at the poll
//! intervals this system runs at (seconds, not milliseconds) the
//! difference is not observable.
//!
//! IDs are derived from `(path, policy-name)`, not file contents, so a
//! policy keeps its ID across edits and agent restarts. Renaming a file
//! is therefore indistinguishable from deleting the old policy and
//! adding a new one — the simplest resolution of the open question
//! around rename handling, and the one adopted here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use scalecore_core::{OnError, PolicyTarget, PolicyType, ScalingPolicy, ScalingPolicyCheck};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::canonicalize::{canonicalize, PolicyDefaults};
use crate::error::{PolicyError, Result};
use crate::source::PolicySource;

/// On-disk policy file shape: everything `ScalingPolicy` has except
/// `id`, which is derived from the file path rather than read from the
/// file itself (§4.2 — stable IDs across restarts, independent of
/// content).
#[derive(Debug, Clone, Deserialize)]
struct PolicyFile {
    name: String,
    policy_type: PolicyType,
    #[serde(default = "default_true")]
    enabled: bool,
    min: i64,
    max: i64,
    #[serde(with = "secs", default)]
    cooldown: Duration,
    #[serde(with = "secs_opt", default)]
    cooldown_on_scale_up: Option<Duration>,
    #[serde(with = "secs", default)]
    evaluation_interval: Duration,
    target: PolicyTarget,
    #[serde(default)]
    checks: Vec<ScalingPolicyCheck>,
    #[serde(default)]
    on_check_error: OnError,
}

fn default_true() -> bool {
    true
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod secs_opt {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

impl PolicyFile {
    fn into_policy(self, id: String) -> ScalingPolicy {
        ScalingPolicy {
            id,
            policy_type: self.policy_type,
            enabled: self.enabled,
            min: self.min,
            max: self.max,
            cooldown: self.cooldown,
            cooldown_on_scale_up: self.cooldown_on_scale_up,
            evaluation_interval: self.evaluation_interval,
            target: self.target,
            checks: self.checks,
            on_check_error: self.on_check_error,
        }
    }
}

fn derive_id(path: &Path, name: &str) -> String {
    let key = format!("{}::{name}", path.display());
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

fn is_policy_file(path: &Path) -> bool {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if file_name.starts_with('.') || file_name.ends_with('~') || file_name.ends_with(".tmp") {
        return false;
    }
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

/// A `PolicySource` backed by a directory of policy files, polled on
/// `poll_interval`.
pub struct FileSource {
    dir: PathBuf,
    poll_interval: Duration,
    defaults: PolicyDefaults,
    snapshot: RwLock<HashMap<String, ScalingPolicy>>,
}

impl FileSource {
    /// Builds a file source watching `dir`.
    #[must_use]
    pub fn new(dir: PathBuf, poll_interval: Duration, defaults: PolicyDefaults) -> Self {
        Self {
            dir,
            poll_interval,
            defaults,
            snapshot: RwLock::new(HashMap::new()),
        }
    }

    /// Re-reads the watched directory and returns the current
    /// `id -> policy` set, ignoring files that fail to parse (logged,
    /// not fatal — one bad file shouldn't take down every other policy
    /// in the directory).
    ///
    /// # Errors
    ///
    /// Returns an error only if the directory itself cannot be listed.
    fn scan(&self) -> Result<HashMap<String, ScalingPolicy>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| PolicyError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut found = HashMap::new();
        for entry in entries {
            let entry = entry.map_err(|source| PolicyError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !is_policy_file(&path) {
                continue;
            }
            match self.load_file(&path) {
                Ok((id, policy)) => {
                    found.insert(id, policy);
                }
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable policy file"),
            }
        }
        Ok(found)
    }

    fn load_file(&self, path: &Path) -> Result<(String, ScalingPolicy)> {
        let contents = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: PolicyFile =
            serde_json::from_str(&contents).map_err(|source| PolicyError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let id = derive_id(path, &raw.name);
        let policy = raw.into_policy(id.clone());
        let policy = canonicalize(policy, &self.defaults)?;
        Ok((id, policy))
    }
}

#[async_trait]
impl PolicySource for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn monitor_ids(
        &self,
        cancel: CancellationToken,
        mut reload: watch::Receiver<()>,
        ids_tx: mpsc::Sender<Vec<String>>,
    ) -> Result<()> {
        let mut last_ids: Option<Vec<String>> = None;
        loop {
            let found = self.scan()?;
            let mut ids: Vec<String> = found.keys().cloned().collect();
            ids.sort_unstable();
            *self.snapshot.write() = found;

            if last_ids.as_ref() != Some(&ids) {
                debug!(count = ids.len(), "file source id set changed");
                if ids_tx.send(ids.clone()).await.is_err() {
                    return Ok(());
                }
                last_ids = Some(ids);
            }

            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.poll_interval) => {}
                result = reload.changed() => {
                    if result.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn monitor_policy(
        &self,
        id: String,
        cancel: CancellationToken,
        policy_tx: mpsc::Sender<ScalingPolicy>,
    ) -> Result<()> {
        let mut last: Option<ScalingPolicy> = None;
        loop {
            match self.get_latest_version(&id).await? {
                Some(policy) => {
                    if last.as_ref() != Some(&policy) {
                        if policy_tx.send(policy.clone()).await.is_err() {
                            return Ok(());
                        }
                        last = Some(policy);
                    }
                }
                None => return Err(PolicyError::NotFound { id }),
            }

            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn get_latest_version(&self, id: &str) -> Result<Option<ScalingPolicy>> {
        if let Some(policy) = self.snapshot.read().get(id).cloned() {
            return Ok(Some(policy));
        }
        let found = self.scan()?;
        let policy = found.get(id).cloned();
        *self.snapshot.write() = found;
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_policy(dir: &Path, filename: &str, name: &str, min: i64, max: i64) {
        let body = serde_json::json!({
            "name": name,
            "policy_type": "horizontal",
            "enabled": true,
            "min": min,
            "max": max,
            "cooldown": 300,
            "cooldown_on_scale_up": null,
            "evaluation_interval": 10,
            "target": {"name": "nomad-target", "config": {}},
            "checks": [],
            "on_check_error": "fail",
        });
        std::fs::write(dir.join(filename), serde_json::to_string_pretty(&body).unwrap()).unwrap();
    }

    fn defaults() -> PolicyDefaults {
        PolicyDefaults::new(Duration::from_secs(300), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn scan_finds_valid_policy_files_and_skips_junk() {
        let dir = tempdir().unwrap();
        write_policy(dir.path(), "web.json", "web", 1, 10);
        std::fs::write(dir.path().join(".web.json.swp"), "garbage").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a policy").unwrap();

        let source = FileSource::new(dir.path().to_path_buf(), Duration::from_millis(10), defaults());
        let found = source.scan().unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn id_is_stable_across_rescans() {
        let dir = tempdir().unwrap();
        write_policy(dir.path(), "web.json", "web", 1, 10);
        let source = FileSource::new(dir.path().to_path_buf(), Duration::from_millis(10), defaults());
        let first = source.scan().unwrap();
        let second = source.scan().unwrap();
        let first_id = first.keys().next().unwrap();
        let second_id = second.keys().next().unwrap();
        assert_eq!(first_id, second_id);
    }

    #[tokio::test]
    async fn renaming_a_file_changes_its_id() {
        let dir = tempdir().unwrap();
        write_policy(dir.path(), "web.json", "web", 1, 10);
        let source = FileSource::new(dir.path().to_path_buf(), Duration::from_millis(10), defaults());
        let before = source.scan().unwrap();
        let before_id = before.keys().next().unwrap().clone();

        std::fs::rename(dir.path().join("web.json"), dir.path().join("web2.json")).unwrap();
        let after = source.scan().unwrap();
        let after_id = after.keys().next().unwrap().clone();

        assert_ne!(before_id, after_id);
    }

    #[tokio::test]
    async fn get_latest_version_is_none_for_unknown_id() {
        let dir = tempdir().unwrap();
        let source = FileSource::new(dir.path().to_path_buf(), Duration::from_millis(10), defaults());
        assert_eq!(source.get_latest_version("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn monitor_policy_reports_not_found_after_file_removed() {
        let dir = tempdir().unwrap();
        write_policy(dir.path(), "web.json", "web", 1, 10);
        let source = FileSource::new(dir.path().to_path_buf(), Duration::from_millis(5), defaults());
        let found = source.scan().unwrap();
        let id = found.keys().next().unwrap().clone();

        std::fs::remove_file(dir.path().join("web.json")).unwrap();

        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(4);
        let result = source.monitor_policy(id, cancel, tx).await;
        assert!(matches!(result, Err(PolicyError::NotFound { .. })));
    }
}
