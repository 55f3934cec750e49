//! The Policy Handler (§4.5): the per-policy task that ticks on
//! `evaluation_interval`, gates on target readiness and cooldown, and
//! enqueues evaluations onto the broker.

#![forbid(unsafe_code)]

pub mod error;
pub mod handler;

pub use error::{HandlerError, Result};
pub use handler::PolicyHandler;
