//! Staged Migration Pipeline
//!
//! The reconciler drives these stages in order:
//!
//! - [`rules`] - pre/post rule orchestration and startup recovery
//! - [`volumes`] - volume copy through the volume driver
//! - [`resources`] - discovery and filtering of migratable manifests
//! - [`transform`] - rewriting manifests to be portable
//! - [`apply`] - re-creating manifests on the destination cluster

pub mod apply;
pub mod resources;
pub mod rules;
pub mod transform;
pub mod volumes;

use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use serde::de::DeserializeOwned;

use crate::crd::{Migration, MigrationStage, MigrationStatus, MigrationStatusValue};
use crate::error::{Error, Result};

/// Event action names, one per stage of the pipeline.
pub(crate) const ACTION_VALIDATE: &str = "ValidateMigration";
pub(crate) const ACTION_PRE_EXEC: &str = "RunPreExecRule";
pub(crate) const ACTION_VOLUMES: &str = "MigrateVolumes";
pub(crate) const ACTION_RESOURCES: &str = "MigrateResources";

/// GroupVersionKind of a dynamic object, from its type metadata.
pub fn gvk_of(object: &DynamicObject) -> Result<GroupVersionKind> {
    let types = object
        .types
        .as_ref()
        .ok_or_else(|| Error::Internal("object has no type metadata".to_string()))?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), types.api_version.clone()),
    };
    Ok(GroupVersionKind {
        group,
        version,
        kind: types.kind.clone(),
    })
}

/// View a dynamic object through a typed API struct.
pub fn to_typed<T: DeserializeOwned>(object: &DynamicObject) -> Result<T> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Mutable status, created on first touch.
pub(crate) fn status_mut(migration: &mut Migration) -> &mut MigrationStatus {
    migration.status.get_or_insert_with(Default::default)
}

/// Current stage, Initial when status is unset.
pub(crate) fn current_stage(migration: &Migration) -> MigrationStage {
    migration
        .status
        .as_ref()
        .map(|s| s.stage)
        .unwrap_or_default()
}

/// Current status value, Initial when status is unset.
pub(crate) fn current_status(migration: &Migration) -> MigrationStatusValue {
    migration
        .status
        .as_ref()
        .map(|s| s.status)
        .unwrap_or_default()
}

/// Set stage and status together.
pub(crate) fn set_state(
    migration: &mut Migration,
    stage: MigrationStage,
    status: MigrationStatusValue,
) {
    let current = status_mut(migration);
    current.stage = stage;
    current.status = status;
}
