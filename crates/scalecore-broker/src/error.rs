//! Error kinds for the eval broker (§4.6, §7).

use thiserror::Error;
use uuid::Uuid;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors internal to the broker's requeue/drop path. `Ack`/`Nack`
/// themselves are infallible from a caller's perspective (§4.6: unknown
/// IDs and worker mismatches are silently ignored); this variant only
/// surfaces from the reaper's internal bookkeeping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// An evaluation expected to still be unacked was not found.
    #[error("evaluation {id} is not currently outstanding")]
    NotOutstanding {
        /// The evaluation ID in question.
        id: Uuid,
    },
}
