//! Resource Discovery & Filter
//!
//! Walks every discovered API group, selects the migratable kinds, and
//! filters instances by label selector, ownership, and kind-specific
//! rules. Admitted objects are recorded in the Migration's status before
//! anything is applied remotely.

use std::collections::{BTreeMap, HashSet};

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{Api, DynamicObject, ListParams, TypeMeta};
use kube::discovery::{ApiCapabilities, ApiResource, Discovery, Scope};
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{info, instrument};

use crate::controller::ControllerContext;
use crate::crd::{normalize_group, Migration, MigrationStage, MigrationStatusValue, ResourceInfo};
use crate::error::{Error, Result};
use crate::migrator::{self, apply, gvk_of, to_typed, transform, ACTION_RESOURCES};
use crate::unstructured;

/// Kinds eligible for migration.
const MIGRATABLE_KINDS: [&str; 7] = [
    "PersistentVolumeClaim",
    "PersistentVolume",
    "Deployment",
    "StatefulSet",
    "ConfigMap",
    "Service",
    "Secret",
];

/// The legacy extensions group only mirrors kinds served from their
/// preferred groups; walking it would duplicate Deployments.
const SKIPPED_GROUPS: [&str; 1] = ["extensions"];

const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

/// Drive the Applications stage: discover, transform, and apply.
#[instrument(skip(ctx, migration), fields(migration = %migration.name_any()))]
pub async fn migrate_resources(ctx: &ControllerContext, migration: &mut Migration) -> Result<()> {
    let own_namespace = migration.namespace().unwrap_or_default();
    let pair = migration.spec.cluster_pair.clone();

    let scheduler = ctx.pairs.scheduler_status(&pair, &own_namespace).await?;
    if !scheduler.is_ready() {
        return Err(Error::PairNotReady {
            pair,
            component: "scheduler".to_string(),
        });
    }

    let objects = collect_resources(ctx, migration).await?;

    let mut infos = std::mem::take(&mut migrator::status_mut(migration).resources);
    let prepared =
        transform::prepare_resources(ctx.driver.as_ref(), &migration.spec, objects, &mut infos)
            .await;
    migrator::status_mut(migration).resources = infos;

    apply::apply_resources(ctx, migration, prepared).await?;

    let all_successful = migration
        .status
        .as_ref()
        .map(|s| {
            s.resources
                .iter()
                .all(|r| r.status == MigrationStatusValue::Successful)
        })
        .unwrap_or(true);
    let outcome = if all_successful {
        MigrationStatusValue::Successful
    } else {
        MigrationStatusValue::PartialSuccess
    };

    migrator::set_state(migration, MigrationStage::Final, outcome);
    ctx.update_status(migration).await?;

    let event_type = if all_successful {
        EventType::Normal
    } else {
        EventType::Warning
    };
    ctx.record(
        migration,
        event_type,
        outcome,
        ACTION_RESOURCES,
        format!("Resource migration finished with status {}", outcome),
    )
    .await;
    Ok(())
}

// =============================================================================
// Discovery
// =============================================================================

/// Walk all API groups and collect admitted objects. The growing
/// resource list is persisted after each group so progress is visible;
/// a retried walk rebuilds the list from scratch.
async fn collect_resources(
    ctx: &ControllerContext,
    migration: &mut Migration,
) -> Result<Vec<DynamicObject>> {
    // A fresh discovery run is the cache refresh
    let discovery = Discovery::new(ctx.client.clone()).run().await?;

    migrator::status_mut(migration).resources.clear();
    let mut objects = Vec::new();

    for group in discovery.groups() {
        if SKIPPED_GROUPS.contains(&group.name()) {
            continue;
        }

        // The same object surfaces once per served version of its group
        let mut seen_uids: HashSet<String> = HashSet::new();
        let mut group_objects = Vec::new();

        let versions: Vec<String> = group.versions().map(|v| v.to_string()).collect();
        for version in &versions {
            for (ar, caps) in group.versioned_resources(version) {
                if !MIGRATABLE_KINDS.contains(&ar.kind.as_str()) {
                    continue;
                }
                list_kind(ctx, migration, &ar, &caps, &mut seen_uids, &mut group_objects).await?;
            }
        }

        if group_objects.is_empty() {
            continue;
        }

        {
            let status = migrator::status_mut(migration);
            for object in &group_objects {
                let gvk = gvk_of(object)?;
                status.resources.push(ResourceInfo {
                    group: normalize_group(&gvk.group).to_string(),
                    version: gvk.version,
                    kind: gvk.kind,
                    name: object.name_any(),
                    namespace: object.namespace().unwrap_or_default(),
                    status: MigrationStatusValue::InProgress,
                    reason: String::new(),
                });
            }
        }
        ctx.update_status(migration).await?;
        objects.extend(group_objects);
    }

    info!(count = objects.len(), "Collected objects for migration");
    Ok(objects)
}

async fn list_kind(
    ctx: &ControllerContext,
    migration: &Migration,
    ar: &ApiResource,
    caps: &ApiCapabilities,
    seen_uids: &mut HashSet<String>,
    out: &mut Vec<DynamicObject>,
) -> Result<()> {
    // PersistentVolumes are cluster-scoped and unlabeled: list them all
    // and filter through their claims instead of the label selector
    if ar.kind == "PersistentVolume" {
        let api: Api<DynamicObject> = Api::all_with(ctx.client.clone(), ar);
        for mut object in api.list(&ListParams::default()).await? {
            stamp_types(&mut object, ar);
            if remember_uid(seen_uids, &object)
                && admit_persistent_volume(ctx, migration, &object).await?
            {
                out.push(object);
            }
        }
        return Ok(());
    }

    let mut params = ListParams::default();
    if let Some(selector) = migration.spec.label_selector() {
        params = params.labels(&selector);
    }

    for namespace in &migration.spec.namespaces {
        let api: Api<DynamicObject> = if matches!(caps.scope, Scope::Namespaced) {
            Api::namespaced_with(ctx.client.clone(), namespace, ar)
        } else {
            Api::all_with(ctx.client.clone(), ar)
        };
        for mut object in api.list(&params).await? {
            stamp_types(&mut object, ar);
            if !remember_uid(seen_uids, &object) {
                continue;
            }
            if admit_object(ctx, &object).await? {
                out.push(object);
            }
        }
    }
    Ok(())
}

/// List items come back without their own type metadata; stamp it from
/// the resource they were listed under.
fn stamp_types(object: &mut DynamicObject, ar: &ApiResource) {
    object.types = Some(TypeMeta {
        api_version: ar.api_version.clone(),
        kind: ar.kind.clone(),
    });
}

fn remember_uid(seen: &mut HashSet<String>, object: &DynamicObject) -> bool {
    match &object.metadata.uid {
        Some(uid) => seen.insert(uid.clone()),
        None => true,
    }
}

// =============================================================================
// Per-Kind Admission
// =============================================================================

async fn admit_object(ctx: &ControllerContext, object: &DynamicObject) -> Result<bool> {
    let kind = object
        .types
        .as_ref()
        .map(|t| t.kind.as_str())
        .unwrap_or_default();
    match kind {
        "Service" => Ok(admit_service(object)),
        "Secret" => Ok(admit_secret(object)),
        "PersistentVolumeClaim" => admit_claim(ctx, object).await,
        _ => Ok(true),
    }
}

/// The API server's own `kubernetes` Service must never be migrated.
fn admit_service(object: &DynamicObject) -> bool {
    object.name_any() != "kubernetes"
}

/// Service-account tokens are cluster-local credentials.
fn admit_secret(object: &DynamicObject) -> bool {
    unstructured::get_str(&object.data, &["type"]) != Some(SERVICE_ACCOUNT_TOKEN_TYPE)
}

/// A claim migrates when it is bound and the volume driver owns it.
async fn admit_claim(ctx: &ControllerContext, object: &DynamicObject) -> Result<bool> {
    if unstructured::get_str(&object.data, &["status", "phase"]) != Some("Bound") {
        return Ok(false);
    }
    let pvc: PersistentVolumeClaim = to_typed(object)?;
    Ok(ctx.driver.owns_pvc(&pvc))
}

/// A volume migrates when it is bound to a driver-owned claim in one of
/// the target namespaces and the claim passes the selector whitelist.
async fn admit_persistent_volume(
    ctx: &ControllerContext,
    migration: &Migration,
    object: &DynamicObject,
) -> Result<bool> {
    if unstructured::get_str(&object.data, &["status", "phase"]) != Some("Bound") {
        return Ok(false);
    }
    let Some((claim_namespace, claim_name)) = pv_claim_target(object) else {
        return Ok(false);
    };
    if !migration.spec.namespaces.contains(&claim_namespace) {
        return Ok(false);
    }

    let api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), &claim_namespace);
    let Some(pvc) = api.get_opt(&claim_name).await? else {
        return Ok(false);
    };
    if !ctx.driver.owns_pvc(&pvc) {
        return Ok(false);
    }
    Ok(claim_matches_selectors(
        pvc.metadata.labels.as_ref(),
        migration.spec.selectors.as_ref(),
    ))
}

/// Namespace and name of the claim a volume is bound to.
pub(crate) fn pv_claim_target(object: &DynamicObject) -> Option<(String, String)> {
    let namespace = unstructured::get_str(&object.data, &["spec", "claimRef", "namespace"])?;
    let name = unstructured::get_str(&object.data, &["spec", "claimRef", "name"])?;
    Some((namespace.to_string(), name.to_string()))
}

/// Whitelist check mirroring the label selector for claims reached via
/// their volume: a claim without labels fails when any selector is set.
pub(crate) fn claim_matches_selectors(
    labels: Option<&BTreeMap<String, String>>,
    selectors: Option<&BTreeMap<String, String>>,
) -> bool {
    let Some(selectors) = selectors.filter(|s| !s.is_empty()) else {
        return true;
    };
    let Some(labels) = labels.filter(|l| !l.is_empty()) else {
        return false;
    };
    selectors
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::dynamic_object;
    use serde_json::json;

    #[test]
    fn test_kind_allow_list() {
        for kind in ["Deployment", "StatefulSet", "ConfigMap", "Service", "Secret"] {
            assert!(MIGRATABLE_KINDS.contains(&kind));
        }
        assert!(!MIGRATABLE_KINDS.contains(&"Pod"));
        assert!(!MIGRATABLE_KINDS.contains(&"ReplicaSet"));
    }

    #[test]
    fn test_extensions_group_is_skipped() {
        // Deployments are only taken from their preferred group
        assert!(SKIPPED_GROUPS.contains(&"extensions"));
        assert!(!SKIPPED_GROUPS.contains(&"apps"));
    }

    #[test]
    fn test_kubernetes_service_is_excluded() {
        let api_server = dynamic_object("v1", "Service", Some("default"), "kubernetes", json!({}));
        assert!(!admit_service(&api_server));

        let user_service = dynamic_object("v1", "Service", Some("team-a"), "db", json!({}));
        assert!(admit_service(&user_service));
    }

    #[test]
    fn test_service_account_tokens_are_excluded() {
        let token = dynamic_object(
            "v1",
            "Secret",
            Some("team-a"),
            "default-token-abc12",
            json!({"type": "kubernetes.io/service-account-token"}),
        );
        assert!(!admit_secret(&token));

        let opaque = dynamic_object(
            "v1",
            "Secret",
            Some("team-a"),
            "db-credentials",
            json!({"type": "Opaque"}),
        );
        assert!(admit_secret(&opaque));
    }

    #[test]
    fn test_pv_claim_target_extraction() {
        let bound = dynamic_object(
            "v1",
            "PersistentVolume",
            None,
            "pv-1",
            json!({"spec": {"claimRef": {"namespace": "team-a", "name": "data"}}}),
        );
        assert_eq!(
            pv_claim_target(&bound),
            Some(("team-a".to_string(), "data".to_string()))
        );

        let unbound = dynamic_object("v1", "PersistentVolume", None, "pv-2", json!({"spec": {}}));
        assert_eq!(pv_claim_target(&unbound), None);
    }

    #[test]
    fn test_claim_selector_whitelist() {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "db".to_string());
        let mut selectors = BTreeMap::new();
        selectors.insert("app".to_string(), "db".to_string());

        // No selectors: everything passes
        assert!(claim_matches_selectors(Some(&labels), None));
        assert!(claim_matches_selectors(None, None));

        // Matching labels pass
        assert!(claim_matches_selectors(Some(&labels), Some(&selectors)));

        // A claim with no labels fails when any selector is set
        assert!(!claim_matches_selectors(None, Some(&selectors)));
        let empty = BTreeMap::new();
        assert!(!claim_matches_selectors(Some(&empty), Some(&selectors)));

        // Mismatched labels fail
        let mut other = BTreeMap::new();
        other.insert("app".to_string(), "web".to_string());
        assert!(!claim_matches_selectors(Some(&other), Some(&selectors)));
    }

    #[test]
    fn test_uid_deduplication() {
        let mut seen = HashSet::new();

        let mut object = dynamic_object("apps/v1", "Deployment", Some("team-a"), "web", json!({}));
        object.metadata.uid = Some("uid-1".to_string());

        assert!(remember_uid(&mut seen, &object));
        // Same object surfacing through another version is dropped
        assert!(!remember_uid(&mut seen, &object));

        // An object without a UID is never deduplicated
        let no_uid = dynamic_object("apps/v1", "Deployment", Some("team-a"), "web2", json!({}));
        assert!(remember_uid(&mut seen, &no_uid));
        assert!(remember_uid(&mut seen, &no_uid));
    }
}
