//! Error kinds for policy source adapters (§4.2, §7).

use std::path::PathBuf;

use thiserror::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, PolicyError>;

/// Errors a policy source can surface. Per §7, a source-level error is
/// logged by the manager and the source's monitor loop keeps retrying
/// (back off, don't crash); `NotFound` is the one variant a policy
/// handler treats as a terminal "stop this handler" signal.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// The backing collaborator (Nomad API, filesystem) could not be
    /// reached for this poll/long-poll cycle.
    #[error("policy source '{source}' unavailable: {reason}")]
    SourceUnavailable {
        /// Source name (`"nomad"`, `"file"`).
        source: String,
        /// Human-readable cause.
        reason: String,
    },

    /// The requested policy ID no longer exists at the source.
    #[error("policy {id} not found")]
    NotFound {
        /// The missing policy ID.
        id: String,
    },

    /// A policy read from a source failed structural validation after
    /// canonicalization.
    #[error("invalid policy: {0}")]
    Invalid(#[from] scalecore_core::CoreError),

    /// A filesystem operation on the file source's watched directory
    /// failed.
    #[error("file source io error at {path}: {source}")]
    Io {
        /// The path being operated on.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A policy file's contents did not parse as JSON.
    #[error("failed to parse policy file {path}: {source}")]
    Parse {
        /// The offending file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}
