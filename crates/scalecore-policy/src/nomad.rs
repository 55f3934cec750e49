//! The Nomad policy source (§4.2): discovers `scaling { policy { ... } }`
//! blocks via Nomad's blocking-query API. `NomadApiClient` is the named
//! external collaborator this adapter drives — a real implementation
//! talks to a live Nomad agent over HTTP; that transport is out of
//! scope here (§1 Non-goals), so this crate only defines the contract
//! and the monitor-loop mechanics around it.

use async_trait::async_trait;
use scalecore_core::ScalingPolicy;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::canonicalize::{canonicalize, PolicyDefaults};
use crate::error::{PolicyError, Result};
use crate::source::PolicySource;

/// A minimal policy stub as returned by Nomad's policy-listing endpoint:
/// just enough to drive `MonitorIDs` without fetching every policy body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NomadPolicyStub {
    /// The policy's stable Nomad-assigned ID.
    pub id: String,
}

/// The Nomad HTTP API surface this source needs, modeled as blocking
/// queries: each call should not return until `wait_index` is stale
/// (Nomad's `X-Nomad-Index` semantics), returning the new index
/// alongside the result so the caller can issue the next blocking call.
#[async_trait]
pub trait NomadApiClient: Send + Sync {
    /// Lists every known scaling-policy ID, blocking past `wait_index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the Nomad agent cannot be reached.
    async fn list_policies(&self, wait_index: u64) -> Result<(Vec<NomadPolicyStub>, u64)>;

    /// Reads one policy's current definition, blocking past
    /// `wait_index`. `Ok((None, _))` means the policy does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the Nomad agent cannot be reached.
    async fn read_policy(
        &self,
        id: &str,
        wait_index: u64,
    ) -> Result<(Option<ScalingPolicy>, u64)>;
}

/// A `PolicySource` backed by a `NomadApiClient`.
pub struct NomadSource {
    client: std::sync::Arc<dyn NomadApiClient>,
    defaults: PolicyDefaults,
}

impl NomadSource {
    /// Builds a Nomad policy source around the given API client.
    #[must_use]
    pub fn new(client: std::sync::Arc<dyn NomadApiClient>, defaults: PolicyDefaults) -> Self {
        Self { client, defaults }
    }
}

#[async_trait]
impl PolicySource for NomadSource {
    fn name(&self) -> &str {
        "nomad"
    }

    async fn monitor_ids(
        &self,
        cancel: CancellationToken,
        mut reload: watch::Receiver<()>,
        ids_tx: mpsc::Sender<Vec<String>>,
    ) -> Result<()> {
        let mut wait_index: u64 = 0;
        loop {
            if reload.has_changed().unwrap_or(false) {
                let _ = reload.borrow_and_update();
                wait_index = 0;
            }

            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                result = self.client.list_policies(wait_index) => {
                    match result {
                        Ok((stubs, new_idx)) => {
                            wait_index = new_idx;
                            let ids = stubs.into_iter().map(|s| s.id).collect();
                            if ids_tx.send(ids).await.is_err() {
                                return Ok(());
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "nomad policy listing failed, retrying");
                            return Err(err);
                        }
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
        let mut wait_index = 0;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                result = self.client.read_policy(&id, wait_index) => {
                    match result? {
                        (Some(raw), new_idx) => {
                            wait_index = new_idx;
                            let canon = canonicalize(raw, &self.defaults)?;
                            debug!(policy_id = %id, "nomad source observed policy update");
                            if policy_tx.send(canon).await.is_err() {
                                return Ok(());
                            }
                        }
                        (None, _) => return Err(PolicyError::NotFound { id }),
                    }
                }
            }
        }
    }

    async fn get_latest_version(&self, id: &str) -> Result<Option<ScalingPolicy>> {
        let (raw, _idx) = self.client.read_policy(id, 0).await?;
        raw.map(|p| canonicalize(p, &self.defaults)).transpose()
    }
}
