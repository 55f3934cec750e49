//! Error kinds shared across the policy evaluation pipeline.

use thiserror::Error;

/// Result type for core data-model operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while validating or canonicalizing core data-model values.
///
/// These correspond to the "policy validation error" kind in the error
/// handling design: they are reported at the source or by a handler on
/// each tick, but never crash the process.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// `Min > Max`.
    #[error("invalid policy {id}: min ({min}) must be <= max ({max})")]
    InvalidBounds {
        /// Offending policy ID.
        id: String,
        /// Configured minimum.
        min: i64,
        /// Configured maximum.
        max: i64,
    },

    /// `EvaluationInterval <= 0`.
    #[error("invalid policy {id}: evaluation_interval must be > 0")]
    InvalidEvaluationInterval {
        /// Offending policy ID.
        id: String,
    },

    /// A check is missing a field that canonicalization could not fill in.
    #[error("invalid policy {id}: check '{check}' is missing {field}")]
    MissingCheckField {
        /// Offending policy ID.
        id: String,
        /// Offending check name.
        check: String,
        /// The missing field.
        field: String,
    },

    /// The policy's target block has no configured name.
    #[error("invalid policy {id}: target has no name")]
    MissingTarget {
        /// Offending policy ID.
        id: String,
    },
}
