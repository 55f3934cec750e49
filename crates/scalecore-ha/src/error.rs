//! HA partitioner error kinds.

use thiserror::Error;

/// Result type for HA partitioner operations.
pub type Result<T> = std::result::Result<T, HaError>;

/// Failures registering with or watching the membership catalog.
#[derive(Error, Debug)]
pub enum HaError {
    /// This replica's own registration failed.
    #[error("failed to register member '{member_id}' in service '{service}': {reason}")]
    RegistrationFailed {
        /// The member ID that failed to register.
        member_id: String,
        /// Catalog service name.
        service: String,
        /// Why registration failed.
        reason: String,
    },

    /// Deregistration on shutdown failed (best-effort; the catalog's own
    /// health check will eventually time the member out).
    #[error("failed to deregister member '{member_id}' from service '{service}': {reason}")]
    DeregistrationFailed {
        /// The member ID that failed to deregister.
        member_id: String,
        /// Catalog service name.
        service: String,
        /// Why deregistration failed.
        reason: String,
    },

    /// The membership watch stream ended or errored.
    #[error("membership watch for service '{service}' failed: {reason}")]
    WatchFailed {
        /// Catalog service name.
        service: String,
        /// Why the watch failed.
        reason: String,
    },
}
