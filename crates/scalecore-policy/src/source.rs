//! The `PolicySource` contract (§4.2): a source owns `MonitorIDs`,
//! `MonitorPolicy`, and `GetLatestVersion` for the policies it discovers.
//! The manager runs one `monitor_ids` task per configured, enabled
//! source and forwards that source's `ReloadCh` on `ReloadSources`.

use async_trait::async_trait;
use scalecore_core::ScalingPolicy;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A policy source: Nomad's scaling-policy API, or a watched directory
/// of policy files.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// The source's name, as used in logs and config (`"nomad"`,
    /// `"file"`).
    fn name(&self) -> &str;

    /// Streams the full current set of known policy IDs on `ids_tx`
    /// every time that set changes, until `cancel` fires or a reload is
    /// requested on `reload`. Blocks between changes (a long-poll or a
    /// poll loop), returning only on cancellation or unrecoverable
    /// source failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the source becomes permanently unavailable.
    async fn monitor_ids(
        &self,
        cancel: CancellationToken,
        reload: watch::Receiver<()>,
        ids_tx: mpsc::Sender<Vec<String>>,
    ) -> Result<()>;

    /// Streams successive versions of policy `id` on `policy_tx` as they
    /// change, until `cancel` fires. Returns `Err(PolicyError::NotFound)`
    /// the moment `id` disappears from the source — callers (the policy
    /// handler) treat that as a permanent stop, per §4.5.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::NotFound` when the policy is removed, or a
    /// `SourceUnavailable`/`Invalid` error on other failures.
    async fn monitor_policy(
        &self,
        id: String,
        cancel: CancellationToken,
        policy_tx: mpsc::Sender<ScalingPolicy>,
    ) -> Result<()>;

    /// Fetches the current version of `id` directly, without
    /// subscribing to future changes. Returns `Ok(None)` if the policy
    /// does not (or no longer) exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be reached.
    async fn get_latest_version(&self, id: &str) -> Result<Option<ScalingPolicy>>;
}
