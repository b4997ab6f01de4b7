//! Migration Custom Resource Definition
//!
//! Defines the schema for Migration resources that declare the intent to
//! move a set of application workloads (volumes and resource manifests)
//! from this cluster to a paired destination cluster.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotation carrying the pre-migration replica count of a workload that
/// was scaled to zero on the destination cluster.
pub const MIGRATION_REPLICAS_ANNOTATION: &str = "stork.libopenstorage.org/migrationReplicas";

// =============================================================================
// Migration CRD
// =============================================================================

/// Migration declares what to move and where.
///
/// When a Migration is created, the operator will:
/// 1. Run the optional pre-exec rule in every source namespace
/// 2. Delegate volume data copy to the configured volume driver
/// 3. Collect, transform, and re-create resource manifests on the
///    destination cluster resolved through the named ClusterPair
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "stork.libopenstorage.org",
    version = "v1alpha1",
    kind = "Migration",
    plural = "migrations",
    shortname = "mig",
    status = "MigrationStatus",
    printcolumn = r#"{"name": "Cluster Pair", "type": "string", "jsonPath": ".spec.clusterPair"}"#,
    printcolumn = r#"{"name": "Stage", "type": "string", "jsonPath": ".status.stage"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.status"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSpec {
    /// Name of the ClusterPair that resolves the destination cluster.
    /// Must not be empty.
    pub cluster_pair: String,

    /// Source namespaces to migrate. Outside the admin namespace a
    /// Migration may only list its own namespace.
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Label selector restricting which objects are migrated.
    /// Cluster-scoped PersistentVolumes are matched through their claim.
    #[serde(default)]
    pub selectors: Option<BTreeMap<String, String>>,

    /// Migrate persistent volumes through the volume driver. Default true.
    #[serde(default)]
    pub include_volumes: Option<bool>,

    /// Migrate resource manifests to the destination cluster. Default true.
    #[serde(default)]
    pub include_resources: Option<bool>,

    /// Keep workload replica counts on the destination. When false
    /// (default) Deployments and StatefulSets are scaled to zero and the
    /// original count is recorded in an annotation.
    #[serde(default)]
    pub start_applications: Option<bool>,

    /// Rule executed in each source namespace before volume cutover.
    #[serde(default)]
    pub pre_exec_rule: Option<String>,

    /// Rule executed in each source namespace after volume cutover.
    #[serde(default)]
    pub post_exec_rule: Option<String>,
}

impl MigrationSpec {
    /// Whether volumes are migrated (unset defaults to true).
    pub fn wants_volumes(&self) -> bool {
        self.include_volumes.unwrap_or(true)
    }

    /// Whether resource manifests are migrated (unset defaults to true).
    pub fn wants_resources(&self) -> bool {
        self.include_resources.unwrap_or(true)
    }

    /// Whether applications keep their replica counts (unset defaults to false).
    pub fn starts_applications(&self) -> bool {
        self.start_applications.unwrap_or(false)
    }

    /// Pre-exec rule name, treating an empty string as unset.
    pub fn pre_exec_rule(&self) -> Option<&str> {
        self.pre_exec_rule.as_deref().filter(|r| !r.is_empty())
    }

    /// Post-exec rule name, treating an empty string as unset.
    pub fn post_exec_rule(&self) -> Option<&str> {
        self.post_exec_rule.as_deref().filter(|r| !r.is_empty())
    }

    /// Selectors rendered as a label-selector string, None when unset or empty.
    pub fn label_selector(&self) -> Option<String> {
        let selectors = self.selectors.as_ref()?;
        if selectors.is_empty() {
            return None;
        }
        Some(
            selectors
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

// =============================================================================
// Status
// =============================================================================

/// Observed state of a Migration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    /// Coarse-grained lifecycle stage
    #[serde(default)]
    pub stage: MigrationStage,

    /// Outcome of the current stage
    #[serde(default)]
    pub status: MigrationStatusValue,

    /// Per-volume progress reported by the volume driver. Unset until the
    /// driver accepts the migration start; an accepted start with nothing
    /// to copy is an empty list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeInfo>>,

    /// Per-manifest outcome of the resource migration
    #[serde(default)]
    pub resources: Vec<ResourceInfo>,
}

/// Migration lifecycle stage. Monotonic, except that a rule or readiness
/// failure while in Volumes may reset to Initial so the pre-exec rule
/// reruns on the next pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MigrationStage {
    #[default]
    Initial,
    PreExecRule,
    Volumes,
    Applications,
    Final,
}

impl std::fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStage::Initial => write!(f, "Initial"),
            MigrationStage::PreExecRule => write!(f, "PreExecRule"),
            MigrationStage::Volumes => write!(f, "Volumes"),
            MigrationStage::Applications => write!(f, "Applications"),
            MigrationStage::Final => write!(f, "Final"),
        }
    }
}

/// Status of the Migration as a whole and of each volume/resource item.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MigrationStatusValue {
    #[default]
    Initial,
    Pending,
    InProgress,
    Successful,
    PartialSuccess,
    Failed,
}

impl std::fmt::Display for MigrationStatusValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStatusValue::Initial => write!(f, "Initial"),
            MigrationStatusValue::Pending => write!(f, "Pending"),
            MigrationStatusValue::InProgress => write!(f, "InProgress"),
            MigrationStatusValue::Successful => write!(f, "Successful"),
            MigrationStatusValue::PartialSuccess => write!(f, "PartialSuccess"),
            MigrationStatusValue::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress of a single volume, produced by the volume driver
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    /// Driver-specific volume identity
    pub volume: String,

    /// Namespace of the claim
    pub namespace: String,

    /// Name of the PersistentVolumeClaim bound to the volume
    pub persistent_volume_claim: String,

    /// Driver-reported migration status
    #[serde(default)]
    pub status: MigrationStatusValue,

    /// Human-readable detail for the current status
    #[serde(default)]
    pub reason: String,
}

/// Outcome of migrating a single resource manifest
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    /// API group, "core" for the unnamed group
    pub group: String,

    /// API version within the group
    pub version: String,

    /// Resource kind
    pub kind: String,

    /// Object name
    pub name: String,

    /// Object namespace, empty for cluster-scoped kinds
    #[serde(default)]
    pub namespace: String,

    /// Apply outcome
    #[serde(default)]
    pub status: MigrationStatusValue,

    /// Human-readable detail for the current status
    #[serde(default)]
    pub reason: String,
}

/// The unnamed core API group is represented as "core" in ResourceInfo.
pub fn normalize_group(group: &str) -> &str {
    if group.is_empty() {
        "core"
    } else {
        group
    }
}

impl ResourceInfo {
    /// Identity match over the full (group, version, kind, namespace, name)
    /// tuple, normalising a blank wire group to "core".
    pub fn matches(&self, group: &str, version: &str, kind: &str, namespace: &str, name: &str) -> bool {
        self.group == normalize_group(group)
            && self.version == version
            && self.kind == kind
            && self.namespace == namespace
            && self.name == name
    }
}

// =============================================================================
// Tests
// =============================================================================
