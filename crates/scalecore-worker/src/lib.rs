//! Workers (§4.7): dequeue evaluations, run checks, reduce group
//! actions, and drive `Target.Scale`; cluster scale-in node selection
//! (§4.8).

#![forbid(unsafe_code)]

pub mod error;
pub mod pool;
pub mod scale_in;
pub mod worker;

pub use error::{NodeNotReady, Result, ScaleInError};
pub use pool::WorkerPool;
pub use scale_in::{drain_and_terminate, select_nodes, NodeDrainer, NodeInfo, NodeState, SelectionStrategy};
pub use worker::Worker;
