//! HA Partitioner (§4.3): when multiple agent replicas run against the
//! same policy sources, each should evaluate a disjoint subset with the
//! union covering every policy. This crate owns the membership catalog
//! contract, the consistent-hash ring, and `FilterPolicies`; it does not
//! implement a concrete catalog backend (Consul, Nomad service
//! discovery, ...) beyond the in-memory one used by its own tests.

#![forbid(unsafe_code)]

pub mod catalog;
pub mod error;
pub mod partitioner;
pub mod ring;

pub use catalog::{InMemoryCatalog, ServiceCatalog};
pub use error::{HaError, Result};
pub use partitioner::HaPartitioner;
pub use ring::HashRing;
