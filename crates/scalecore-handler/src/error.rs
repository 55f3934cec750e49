//! Error kinds for the policy handler (§4.5, §7).

use thiserror::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, HandlerError>;

/// Errors that stop a handler's `run` loop outright. Per-tick failures
/// (a bad plugin call, a validation failure, a target that isn't ready)
/// are logged and skip that tick instead of surfacing here.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The policy could not be fetched when the handler started.
    #[error("policy {id} could not be loaded at handler start: {source}")]
    InitialFetchFailed {
        /// The policy ID the handler was started for.
        id: String,
        /// Underlying source error.
        #[source]
        source: scalecore_policy::PolicyError,
    },

    /// The policy did not exist when the handler started.
    #[error("policy {id} does not exist")]
    PolicyNotFound {
        /// The policy ID the handler was started for.
        id: String,
    },
}
