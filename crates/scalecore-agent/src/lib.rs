//! The agent (§4, §6): wires the plugin fleet, policy sources, policy
//! manager, HA partitioner, and worker pools into one running
//! autoscaling control plane.
//!
//! This crate is a library only. Reading a config file from disk,
//! parsing HCL, and merging command-line flags into an [`AgentConfig`]
//! are a named-but-external collaborator this crate does not implement
//! (§1, §6) — callers build the config value themselves and hand it to
//! [`Agent::new`].

#![forbid(unsafe_code)]

pub mod agent;
pub mod error;

pub use agent::Agent;
pub use error::{AgentError, Result};
pub use scalecore_core::config::AgentConfig;
