//! Migration Operator
//!
//! A Kubernetes operator that migrates application workloads — their
//! persistent volumes and their resource manifests — from this cluster to
//! a paired destination cluster.
//!
//! # Architecture
//!
//! A user declares intent by creating a Migration; the controller drives
//! it through a staged state machine:
//!
//! ```text
//! Initial ──► PreExecRule ──► Volumes ──► Applications ──► Final
//! ```
//!
//! Volume copy is delegated to a pluggable [`domain::ports::VolumeDriver`],
//! pre/post hooks to a [`domain::ports::RuleExecutor`], and destination
//! credentials to a [`domain::ports::ClusterPairRegistry`]. The resource
//! path discovers migratable kinds dynamically, rewrites their manifests
//! to be portable, and re-creates them remotely.
//!
//! # Modules
//!
//! - [`adapters`] - Infrastructure adapters implementing domain ports
//! - [`controller`] - Reconciliation loop for Migration resources
//! - [`crd`] - Custom Resource Definitions for Kubernetes
//! - [`domain`] - Domain layer with ports (DDD)
//! - [`error`] - Error types
//! - [`migrator`] - Staged migration pipeline
//! - [`unstructured`] - Typed accessors over schema-free API objects

pub mod adapters;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod migrator;
pub mod unstructured;

// Re-export commonly used types
pub use controller::{ControllerContext, MIGRATION_FINALIZER};
pub use crd::{ClusterPair, Migration, MigrationSpec, MigrationStage, MigrationStatus};
pub use domain::ports::{
    ClusterPairRegistry, RuleExecutor, RulePhase, TerminationSignal, VolumeDriver,
};
pub use error::{Error, Result};
