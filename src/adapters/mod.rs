//! Infrastructure Adapters
//!
//! Concrete implementations of the domain ports:
//!
//! - [`cluster_pair`] - ClusterPair-CRD-backed registry resolving
//!   destination-cluster readiness and credentials
//! - [`driver`] - volume driver for deployments without a storage backend
//! - [`rules`] - rule executor for deployments without a rule engine
//! - [`testing`] - in-memory fakes shared by unit and pipeline tests

pub mod cluster_pair;
pub mod driver;
pub mod rules;
pub mod testing;

pub use cluster_pair::KubeClusterPairRegistry;
pub use driver::ResourceOnlyDriver;
pub use rules::NoopRuleExecutor;
