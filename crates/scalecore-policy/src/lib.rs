//! Policy sources (§4.2): adapters that discover `ScalingPolicy` values
//! from Nomad's scaling-policy API or a watched directory of policy
//! files, canonicalize them (fill defaults, apply mutators), and stream
//! their IDs and contents to the policy manager.

#![forbid(unsafe_code)]

pub mod canonicalize;
pub mod error;
pub mod file;
pub mod mutators;
pub mod nomad;
pub mod source;

pub use canonicalize::{canonicalize, PolicyDefaults};
pub use error::{PolicyError, Result};
pub use file::FileSource;
pub use nomad::{NomadApiClient, NomadPolicyStub, NomadSource};
pub use source::PolicySource;
