//! Resource Transformer
//!
//! Rewrites collected manifests so the destination cluster accepts them:
//! cluster-local state is stripped, volume objects are handed to the
//! driver for backend-specific rewrites, and workloads are scaled to zero
//! unless the Migration asks for applications to be started.

use kube::api::{DynamicObject, ObjectMeta};
use kube::ResourceExt;
use tracing::warn;

use crate::crd::{
    MigrationSpec, MigrationStatusValue, ResourceInfo, MIGRATION_REPLICAS_ANNOTATION,
};
use crate::domain::ports::VolumeDriver;
use crate::error::{Error, Result};
use crate::migrator::gvk_of;
use crate::unstructured;

/// Prepare every collected object for the destination cluster.
///
/// A failure in one object's preparation marks only that object's
/// ResourceInfo as Failed; the other objects continue. Failed objects are
/// dropped from the returned apply list.
pub async fn prepare_resources(
    driver: &dyn VolumeDriver,
    spec: &MigrationSpec,
    objects: Vec<DynamicObject>,
    infos: &mut [ResourceInfo],
) -> Vec<DynamicObject> {
    let mut prepared = Vec::with_capacity(objects.len());
    for object in objects {
        let gvk = gvk_of(&object).ok();
        let name = object.name_any();
        let namespace = object.namespace().unwrap_or_default();
        match prepare_object(driver, spec, object).await {
            Ok(object) => prepared.push(object),
            Err(err) => {
                warn!(object = %name, error = %err, "Failed to prepare object");
                if let Some(gvk) = gvk {
                    mark_preparation_failed(infos, &gvk, &namespace, &name, &err);
                }
            }
        }
    }
    prepared
}

async fn prepare_object(
    driver: &dyn VolumeDriver,
    spec: &MigrationSpec,
    mut object: DynamicObject,
) -> Result<DynamicObject> {
    let gvk = gvk_of(&object)?;

    unstructured::remove(&mut object.data, &["status"]);

    match gvk.kind.as_str() {
        "PersistentVolume" => {
            unstructured::remove(&mut object.data, &["spec", "claimRef"]);
            unstructured::remove(&mut object.data, &["spec", "storageClassName"]);
            object = driver.update_migrated_persistent_volume_spec(object).await?;
        }
        "Service" => prepare_service(&mut object),
        "Deployment" | "StatefulSet" => {
            if !spec.starts_applications() {
                suspend_workload(&mut object)?;
            }
        }
        _ => {}
    }

    prune_metadata(&mut object.metadata);
    Ok(object)
}

/// Drop the allocated clusterIP so the destination assigns its own.
/// Headless services ("None") keep the literal value.
fn prepare_service(object: &mut DynamicObject) {
    match unstructured::get_str(&object.data, &["spec", "clusterIP"]) {
        Some("None") | None => {}
        Some(_) => {
            unstructured::remove(&mut object.data, &["spec", "clusterIP"]);
        }
    }
}

/// Record the replica count in an annotation and scale the workload to
/// zero so it does not start on the destination until activated.
fn suspend_workload(object: &mut DynamicObject) -> Result<()> {
    let replicas = unstructured::get_int(&object.data, &["spec", "replicas"])
        .map_err(|err| Error::ResourcePreparation {
            name: object.name_any(),
            reason: err.to_string(),
        })?
        // The API server defaults an absent replicas field to one
        .unwrap_or(1);

    object
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(
            MIGRATION_REPLICAS_ANNOTATION.to_string(),
            replicas.to_string(),
        );
    unstructured::set(&mut object.data, &["spec", "replicas"], 0.into());
    Ok(())
}

/// Keep only the metadata the destination cluster should see.
fn prune_metadata(metadata: &mut ObjectMeta) {
    *metadata = ObjectMeta {
        name: metadata.name.take(),
        namespace: metadata.namespace.take(),
        labels: metadata.labels.take(),
        annotations: metadata.annotations.take(),
        ..Default::default()
    };
}

fn mark_preparation_failed(
    infos: &mut [ResourceInfo],
    gvk: &kube::core::GroupVersionKind,
    namespace: &str,
    name: &str,
    err: &Error,
) {
    for info in infos.iter_mut() {
        if info.matches(&gvk.group, &gvk.version, &gvk.kind, namespace, name) {
            info.status = MigrationStatusValue::Failed;
            info.reason = err.to_string();
            return;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
