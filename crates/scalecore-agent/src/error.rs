//! Error kinds for agent startup (§4, §6).

use thiserror::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can stop the agent from starting. Once running, per-tick
/// and per-evaluation failures are handled inside the manager, handler,
/// and worker layers instead of surfacing here.
#[derive(Error, Debug)]
pub enum AgentError {
    /// A configured APM/target/strategy instance failed to launch.
    #[error("failed to load configured plugin instances: {0}")]
    PluginLoad(#[source] scalecore_plugin::PluginError),

    /// This replica failed to join the HA membership catalog.
    #[error("failed to join HA membership catalog: {0}")]
    Ha(#[source] scalecore_ha::HaError),

    /// A source or feature was enabled in config without the external
    /// collaborator it depends on being supplied to [`crate::Agent::new`].
    #[error("{feature} is enabled but no {collaborator} was supplied")]
    MissingCollaborator {
        /// The config feature that required the collaborator.
        feature: &'static str,
        /// The collaborator that was missing.
        collaborator: &'static str,
    },

    /// `policy.file_source` is enabled but `policy.dir` is unset.
    #[error("policy.file_source is enabled but policy.dir is not configured")]
    MissingPolicyDir,

    /// No policy source is enabled; the agent would discover nothing.
    #[error("no policy source is enabled in configuration")]
    NoPolicySourceEnabled,
}
