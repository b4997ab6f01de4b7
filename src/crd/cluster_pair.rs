//! ClusterPair Custom Resource Definition
//!
//! A ClusterPair binds this cluster to a destination cluster. Its status
//! carries the readiness of the two migration components (storage and
//! scheduler) and its spec points at the credentials used to reach the
//! destination.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// ClusterPair CRD
// =============================================================================

/// ClusterPair names a destination cluster and how to reach it.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "stork.libopenstorage.org",
    version = "v1alpha1",
    kind = "ClusterPair",
    plural = "clusterpairs",
    shortname = "cp",
    status = "ClusterPairStatus",
    printcolumn = r#"{"name": "Storage", "type": "string", "jsonPath": ".status.storageStatus"}"#,
    printcolumn = r#"{"name": "Scheduler", "type": "string", "jsonPath": ".status.schedulerStatus"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPairSpec {
    /// Name of a Secret in the ClusterPair's namespace whose `kubeconfig`
    /// key holds credentials for the destination cluster.
    pub kubeconfig_secret: String,

    /// Driver-specific pairing options, passed through opaquely.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Observed pairing state
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPairStatus {
    /// Readiness of the storage (volume driver) pairing
    #[serde(default)]
    pub storage_status: PairStatus,

    /// Readiness of the scheduler (resource apply) pairing
    #[serde(default)]
    pub scheduler_status: PairStatus,
}

/// Readiness of one component of a cluster pair
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum PairStatus {
    #[default]
    Pending,
    Ready,
    NotReady,
    Error,
}

impl PairStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, PairStatus::Ready)
    }
}

impl std::fmt::Display for PairStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairStatus::Pending => write!(f, "Pending"),
            PairStatus::Ready => write!(f, "Ready"),
            PairStatus::NotReady => write!(f, "NotReady"),
            PairStatus::Error => write!(f, "Error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_status_readiness() {
        assert!(PairStatus::Ready.is_ready());
        assert!(!PairStatus::Pending.is_ready());
        assert!(!PairStatus::NotReady.is_ready());
        assert!(!PairStatus::Error.is_ready());
    }

    #[test]
    fn test_status_defaults_to_pending() {
        let status = ClusterPairStatus::default();
        assert_eq!(status.storage_status, PairStatus::Pending);
        assert_eq!(status.scheduler_status, PairStatus::Pending);
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = ClusterPairStatus {
            storage_status: PairStatus::Ready,
            scheduler_status: PairStatus::NotReady,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["storageStatus"], "Ready");
        assert_eq!(json["schedulerStatus"], "NotReady");
    }
}
