//! `ServiceCatalog`: the membership directory this replica registers
//! with and watches (§4.3). Stands in for a Consul/Nomad-service-style
//! directory; no concrete backend is implemented here.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;

/// Registers and watches membership of a single named service.
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    /// Registers `member_id` as a healthy member of `service`. Idempotent:
    /// re-registering the same `member_id` refreshes its health check.
    async fn register(&self, service: &str, member_id: &str) -> Result<()>;

    /// Removes `member_id` from `service`'s membership, best-effort.
    async fn deregister(&self, service: &str, member_id: &str) -> Result<()>;

    /// Returns a channel that yields the current sorted member-id list
    /// for `service` every time membership changes (insertion, deletion,
    /// or health-check timeout), starting with the list as of the call.
    async fn watch(&self, service: &str) -> Result<watch::Receiver<Vec<String>>>;
}

/// An in-process, in-memory catalog for tests and single-binary
/// deployments where no real membership directory is wired in.
pub struct InMemoryCatalog {
    inner: parking_lot::Mutex<std::collections::HashMap<String, watch::Sender<Vec<String>>>>,
}

impl InMemoryCatalog {
    /// An empty catalog with no registered services.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: parking_lot::Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn sender_for(&self, service: &str) -> watch::Sender<Vec<String>> {
        let mut map = self.inner.lock();
        map.entry(service.to_string())
            .or_insert_with(|| watch::channel(Vec::new()).0)
            .clone()
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceCatalog for InMemoryCatalog {
    async fn register(&self, service: &str, member_id: &str) -> Result<()> {
        let sender = self.sender_for(service);
        sender.send_modify(|members| {
            if !members.iter().any(|m| m == member_id) {
                members.push(member_id.to_string());
                members.sort();
            }
        });
        Ok(())
    }

    async fn deregister(&self, service: &str, member_id: &str) -> Result<()> {
        let sender = self.sender_for(service);
        sender.send_modify(|members| members.retain(|m| m != member_id));
        Ok(())
    }

    async fn watch(&self, service: &str) -> Result<watch::Receiver<Vec<String>>> {
        Ok(self.sender_for(service).subscribe())
    }
}
