//! Shared data model, error kinds, clock, and config schema for the
//! scalecore autoscaling control plane.
//!
//! This crate has no I/O and no `tokio` dependency: every other
//! `scalecore-*` crate builds on these plain value types.

#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod error;
pub mod eval;
pub mod policy;
pub mod target;

pub use clock::{Clock, SharedClock, SystemClock};
pub use error::{CoreError, Result};
pub use eval::{meta_keys, Direction, ScalingAction, ScalingEvaluation};
pub use policy::{
    OnError, PolicyTarget, PolicyType, ScalingPolicy, ScalingPolicyCheck, StrategyRef,
};
pub use target::{
    PoolIdentifier, TargetStatus, DEFAULT_POOL_SENTINEL, LAST_DIRECTION_KEY, LAST_EVENT_KEY,
};
