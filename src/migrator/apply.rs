//! Resource Applier
//!
//! Re-creates prepared manifests on the destination cluster through its
//! dynamic API. Namespaces are pre-created first, carrying over labels
//! and annotations. Conflicting objects are replaced by delete-and-create,
//! except volume-bearing kinds which are never deleted remotely.

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, DynamicObject, ObjectMeta, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::runtime::events::EventType;
use kube::{Client, ResourceExt};
use tracing::{info, warn};

use crate::controller::ControllerContext;
use crate::crd::{Migration, MigrationStatusValue};
use crate::error::{Error, Result};
use crate::migrator::{self, gvk_of, ACTION_RESOURCES};

/// Sentinel in the port allocator's failure when a Service with a fixed
/// nodePort already exists on the destination.
const PORT_ALLOCATED_ERR: &str = "provided port is already allocated";

/// Apply every prepared object on the destination cluster, recording the
/// per-object outcome in the matching ResourceInfo.
pub async fn apply_resources(
    ctx: &ControllerContext,
    migration: &mut Migration,
    objects: Vec<DynamicObject>,
) -> Result<()> {
    let own_namespace = migration.namespace().unwrap_or_default();
    let remote = ctx
        .pairs
        .scheduler_client(&migration.spec.cluster_pair, &own_namespace)
        .await?;

    create_namespaces(ctx, &remote, migration).await?;

    for object in &objects {
        let gvk = gvk_of(object)?;
        let name = object.name_any();
        let namespace = object.namespace().unwrap_or_default();

        let outcome = apply_object(&remote, &gvk, object).await;

        {
            let status = migrator::status_mut(migration);
            if let Some(entry) = status.resources.iter_mut().find(|r| {
                r.matches(&gvk.group, &gvk.version, &gvk.kind, &namespace, &name)
            }) {
                match &outcome {
                    Ok(()) => {
                        entry.status = MigrationStatusValue::Successful;
                        entry.reason.clear();
                    }
                    Err(err) => {
                        entry.status = MigrationStatusValue::Failed;
                        entry.reason = err.to_string();
                    }
                }
            }
        }

        match outcome {
            Ok(()) => {
                ctx.record(
                    migration,
                    EventType::Normal,
                    MigrationStatusValue::Successful,
                    ACTION_RESOURCES,
                    format!("Applied {} {}/{}", gvk.kind, namespace, name),
                )
                .await;
            }
            Err(err) => {
                warn!(object = %name, error = %err, "Failed to apply object");
                ctx.record(
                    migration,
                    EventType::Warning,
                    MigrationStatusValue::Failed,
                    ACTION_RESOURCES,
                    format!("Failed to apply {} {}/{}: {}", gvk.kind, namespace, name, err),
                )
                .await;
            }
        }
    }

    ctx.update_status(migration).await?;
    info!(count = objects.len(), "Applied objects on destination cluster");
    Ok(())
}

/// Pre-create the target namespaces on the destination, carrying over
/// labels and annotations from the source. Existing namespaces are fine.
async fn create_namespaces(
    ctx: &ControllerContext,
    remote: &Client,
    migration: &Migration,
) -> Result<()> {
    let local: Api<Namespace> = Api::all(ctx.client.clone());
    let destination: Api<Namespace> = Api::all(remote.clone());

    for name in &migration.spec.namespaces {
        let source = local.get(name).await?;
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: source.metadata.labels.clone(),
                annotations: source.metadata.annotations.clone(),
                ..Default::default()
            },
            ..Default::default()
        };
        match destination.create(&PostParams::default(), &namespace).await {
            Ok(_) => {}
            Err(kube::Error::Api(response)) if response.reason == "AlreadyExists" => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Create one object remotely, replacing a conflicting object for
/// non-volume kinds.
async fn apply_object(
    remote: &Client,
    gvk: &GroupVersionKind,
    object: &DynamicObject,
) -> Result<()> {
    let ar = ApiResource::from_gvk_with_plural(gvk, &plural_of(&gvk.kind));
    let name = object.name_any();

    let api: Api<DynamicObject> = match object.namespace() {
        Some(namespace) => Api::namespaced_with(remote.clone(), &namespace, &ar),
        None => Api::all_with(remote.clone(), &ar),
    };

    match api.create(&PostParams::default(), object).await {
        Ok(_) => Ok(()),
        Err(err) if is_already_present(&err) => {
            if is_volume_kind(&gvk.kind) {
                // Never delete volume-bearing resources on the destination
                return Ok(());
            }
            if let Err(delete_err) = api.delete(&name, &DeleteParams::default()).await {
                if !is_not_found(&delete_err) {
                    warn!(object = %name, error = %delete_err, "Failed to delete existing object");
                    return Err(Error::Apply {
                        name,
                        reason: delete_err.to_string(),
                    });
                }
            }
            match api.create(&PostParams::default(), object).await {
                Ok(_) => Ok(()),
                Err(create_err) => Err(Error::Apply {
                    name,
                    reason: create_err.to_string(),
                }),
            }
        }
        Err(err) => Err(Error::Apply {
            name,
            reason: err.to_string(),
        }),
    }
}

/// Dynamic resource name for a kind.
pub(crate) fn plural_of(kind: &str) -> String {
    format!("{}s", kind.to_lowercase())
}

pub(crate) fn is_volume_kind(kind: &str) -> bool {
    matches!(kind, "PersistentVolume" | "PersistentVolumeClaim")
}

/// The object (or its port) is already there: an AlreadyExists response,
/// or the port allocator's sentinel for Services with fixed nodePorts.
pub(crate) fn is_already_present(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(response) => {
            response.reason == "AlreadyExists" || response.message.contains(PORT_ALLOCATED_ERR)
        }
        _ => false,
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

// =============================================================================
// Tests
// =============================================================================
