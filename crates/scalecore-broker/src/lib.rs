//! The Eval Broker (§4.6): FIFO evaluation queues between policy
//! handlers and workers, one queue per `PolicyType`, with ack/nack
//! redelivery, an ack-timeout reaper, and policy-ID collapsing.

#![forbid(unsafe_code)]

pub mod broker;
pub mod error;

pub use broker::EvalBroker;
pub use error::{BrokerError, Result};
