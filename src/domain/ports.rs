//! Domain Ports (Port/Adapter Pattern)
//!
//! The reconciler depends on three external capabilities, modeled as
//! traits so that infrastructure adapters (and test fakes) can be
//! injected at construction:
//!
//! - [`VolumeDriver`] - performs the storage-level volume copy and owns
//!   PVC identity
//! - [`RuleExecutor`] - runs user-defined pre/post hooks inside source
//!   namespaces
//! - [`ClusterPairRegistry`] - resolves a cluster pair name to readiness
//!   and destination-cluster credentials

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::DynamicObject;
use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::crd::{Migration, PairStatus, VolumeInfo};
use crate::error::Result;

// =============================================================================
// Termination Signal
// =============================================================================

/// One-shot stop capability for a background helper started by a rule.
///
/// Firing is idempotent and level-triggered: a helper that subscribes
/// after the signal fired observes it immediately, and firing twice is a
/// no-op. Clones share the same underlying signal.
#[derive(Debug, Clone, Default)]
pub struct TerminationSignal {
    token: CancellationToken,
}

impl TerminationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the helper. Safe to call any number of times.
    pub fn fire(&self) {
        self.token.cancel();
    }

    /// Whether the signal has been fired.
    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal fires; resolves immediately if it already has.
    pub async fn fired(&self) {
        self.token.cancelled().await;
    }
}

// =============================================================================
// Volume Driver Port
// =============================================================================

/// Port for the pluggable storage driver performing volume migration.
///
/// `start_migration` is asynchronous and long-running on the driver side:
/// it returns the initial per-volume state and the controller polls
/// `get_migration_status` across resyncs until every volume settles.
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Begin migrating all driver-owned volumes covered by the Migration.
    /// An empty list means the driver found nothing to move.
    async fn start_migration(&self, migration: &Migration) -> Result<Vec<VolumeInfo>>;

    /// Refresh per-volume migration progress.
    async fn get_migration_status(&self, migration: &Migration) -> Result<Vec<VolumeInfo>>;

    /// Abort any outstanding volume work for the Migration.
    async fn cancel_migration(&self, migration: &Migration) -> Result<()>;

    /// Whether the driver is responsible for the given claim.
    fn owns_pvc(&self, pvc: &PersistentVolumeClaim) -> bool;

    /// Driver-specific rewrite of a PersistentVolume manifest bound for
    /// the destination cluster (volume handles, topology, ...).
    async fn update_migrated_persistent_volume_spec(
        &self,
        object: DynamicObject,
    ) -> Result<DynamicObject>;
}

// =============================================================================
// Rule Executor Port
// =============================================================================

/// Which side of the volume cutover a rule runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulePhase {
    Pre,
    Post,
}

impl std::fmt::Display for RulePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RulePhase::Pre => write!(f, "Pre"),
            RulePhase::Post => write!(f, "Post"),
        }
    }
}

/// Port for the engine executing named pre/post rules.
#[async_trait]
pub trait RuleExecutor: Send + Sync {
    /// Whether the named rule resolves in the given namespace.
    async fn rule_exists(&self, name: &str, namespace: &str) -> Result<bool>;

    /// Execute the named rule in the given namespace. A rule that forks a
    /// background helper returns the helper's termination signal; the
    /// caller owns firing it.
    async fn execute_rule(
        &self,
        name: &str,
        phase: RulePhase,
        migration: &Migration,
        namespace: &str,
    ) -> Result<Option<TerminationSignal>>;

    /// Recover orphaned rule state for a Migration after a controller
    /// restart.
    async fn perform_rule_recovery(&self, migration: &Migration) -> Result<()>;
}

// =============================================================================
// Cluster Pair Registry Port
// =============================================================================

/// Port resolving a cluster pair name to readiness and credentials.
#[async_trait]
pub trait ClusterPairRegistry: Send + Sync {
    /// Readiness of the storage (volume driver) pairing.
    async fn storage_status(&self, name: &str, namespace: &str) -> Result<PairStatus>;

    /// Readiness of the scheduler (resource apply) pairing.
    async fn scheduler_status(&self, name: &str, namespace: &str) -> Result<PairStatus>;

    /// Client for the destination cluster.
    async fn scheduler_client(&self, name: &str, namespace: &str) -> Result<Client>;
}

// =============================================================================
// Tests
// =============================================================================
