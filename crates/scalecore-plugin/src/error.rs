//! Plugin fleet error kinds (§7: "Plugin launch / config errors").

use thiserror::Error;

/// Result type for plugin fleet operations.
pub type Result<T> = std::result::Result<T, PluginError>;

/// A single plugin's failure to launch, configure, or respond.
#[derive(Error, Debug)]
pub enum PluginError {
    /// The external process could not be spawned.
    #[error("plugin {name} ({kind}): failed to launch: {reason}")]
    LaunchFailed {
        /// Configured instance name.
        name: String,
        /// Configured plugin kind.
        kind: &'static str,
        /// Why the launch failed.
        reason: String,
    },

    /// The handshake cookie or protocol version did not match.
    #[error("plugin {name}: handshake failed: {reason}")]
    HandshakeFailed {
        /// Configured instance name.
        name: String,
        /// Why the handshake failed.
        reason: String,
    },

    /// `PluginInfo()` didn't match the configured `(name, type)`.
    #[error("plugin {name}: reported identity ({reported_name}, {reported_kind}) does not match configured ({name}, {expected_kind})")]
    IdentityMismatch {
        /// Configured instance name.
        name: String,
        /// Configured kind.
        expected_kind: &'static str,
        /// Kind the plugin actually reported.
        reported_kind: String,
        /// Name the plugin actually reported.
        reported_name: String,
    },

    /// `SetConfig` failed after a successful launch.
    #[error("plugin {name}: SetConfig failed: {reason}")]
    ConfigFailed {
        /// Configured instance name.
        name: String,
        /// Why configuration failed.
        reason: String,
    },

    /// The RPC call itself failed (transport error or plugin-reported
    /// error), surfaced to callers as a check failure per §7.
    #[error("plugin {name}: RPC call '{method}' failed: {reason}")]
    CallFailed {
        /// Configured instance name.
        name: String,
        /// RPC method invoked.
        method: String,
        /// Failure reason.
        reason: String,
    },

    /// No plugin is registered under this name for the requested kind.
    #[error("no {kind} plugin named '{name}' is available")]
    NotFound {
        /// Requested instance name.
        name: String,
        /// Requested kind.
        kind: &'static str,
    },

    /// A plugin is registered under this name, but as a different kind.
    #[error("plugin '{name}' is a {actual_kind}, not a {requested_kind}")]
    WrongType {
        /// Requested instance name.
        name: String,
        /// Kind the caller asked for.
        requested_kind: &'static str,
        /// Kind actually registered.
        actual_kind: &'static str,
    },

    /// `Load` or `Reload` failed for one or more instances; successful
    /// launches remain active (§4.1).
    #[error("{0} of {1} plugin(s) failed to launch: {2:?}")]
    Multi(usize, usize, Vec<PluginError>),
}
