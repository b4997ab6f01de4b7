//! Volume Migration Phase
//!
//! Delegates the data copy to the volume driver and polls its status
//! across resyncs. The driver's work is long-running; a single
//! reconciliation either starts it, observes it, or fans the final
//! per-volume state into the Migration.

use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::warn;

use crate::controller::ControllerContext;
use crate::crd::{Migration, MigrationStage, MigrationStatusValue, VolumeInfo};
use crate::error::{Error, Result};
use crate::migrator::{self, resources, rules, ACTION_VOLUMES};

/// Drive the Volumes stage for one reconciliation pass.
pub async fn migrate_volumes(ctx: &ControllerContext, migration: &mut Migration) -> Result<()> {
    if !migration.spec.wants_volumes() {
        // Nothing for the driver to do; hand over to the resource phase
        migrator::set_state(
            migration,
            MigrationStage::Applications,
            MigrationStatusValue::Initial,
        );
        ctx.update_status(migration).await?;
        return finish_or_apply(ctx, migration).await;
    }

    let first_entry = migration
        .status
        .as_ref()
        .map(|s| s.volumes.is_none())
        .unwrap_or(true);

    if first_entry {
        start_volume_migration(ctx, migration).await?;
    }

    let volumes: Vec<VolumeInfo> = migration
        .status
        .as_ref()
        .and_then(|s| s.volumes.clone())
        .unwrap_or_default();

    if !volumes.is_empty() {
        let refreshed = ctx.driver.get_migration_status(migration).await?;
        migrator::status_mut(migration).volumes = Some(refreshed.clone());
        ctx.update_status(migration).await?;

        for volume in &refreshed {
            match volume.status {
                MigrationStatusValue::Successful => {
                    ctx.record(
                        migration,
                        EventType::Normal,
                        MigrationStatusValue::Successful,
                        ACTION_VOLUMES,
                        format!("Volume {} migrated successfully", volume.volume),
                    )
                    .await;
                }
                MigrationStatusValue::Failed => {
                    ctx.record(
                        migration,
                        EventType::Warning,
                        MigrationStatusValue::Failed,
                        ACTION_VOLUMES,
                        format!("Volume {} migration failed: {}", volume.volume, volume.reason),
                    )
                    .await;
                }
                _ => {}
            }
        }

        let summary = classify_volumes(&refreshed);
        if summary.any_in_progress {
            // Wait for the next resync
            return Ok(());
        }
        if summary.any_failed {
            // A failed volume fails the Migration, but sibling volume
            // migrations are left to finish on the driver side
            ctx.signals.fire(migration);
            migrator::set_state(migration, MigrationStage::Final, MigrationStatusValue::Failed);
            ctx.update_status(migration).await?;
            return Ok(());
        }
    }

    finish_or_apply(ctx, migration).await
}

/// First entry: check storage readiness, start the driver, fire the
/// pre-rule helper signals, and run the post rule.
async fn start_volume_migration(
    ctx: &ControllerContext,
    migration: &mut Migration,
) -> Result<()> {
    let own_namespace = migration.namespace().unwrap_or_default();
    let pair = migration.spec.cluster_pair.clone();

    let storage = ctx.pairs.storage_status(&pair, &own_namespace).await?;
    if !storage.is_ready() {
        if migration.spec.pre_exec_rule().is_some() {
            // Regress so the pre rule reruns once the pair is ready; the
            // helpers it started must not linger in the meantime
            ctx.signals.fire(migration);
            migrator::set_state(
                migration,
                MigrationStage::Initial,
                MigrationStatusValue::Initial,
            );
            ctx.update_status(migration).await?;
        }
        return Err(Error::PairNotReady {
            pair,
            component: "storage".to_string(),
        });
    }

    // A driver with nothing to copy still counts as an accepted start
    let volumes = ctx.driver.start_migration(migration).await?;
    migrator::status_mut(migration).volumes = Some(volumes);
    migrator::set_state(
        migration,
        MigrationStage::Volumes,
        MigrationStatusValue::InProgress,
    );
    ctx.update_status(migration).await?;

    // The driver accepted the cutover; the pre-rule helpers are done
    ctx.signals.fire(migration);

    if migration.spec.post_exec_rule().is_some() {
        if let Err(err) = rules::run_post_exec_rule(ctx.rules.as_ref(), migration).await {
            if let Err(cancel_err) = ctx.driver.cancel_migration(migration).await {
                warn!(error = %cancel_err, "Failed to cancel volume migration");
            }
            migrator::set_state(migration, MigrationStage::Final, MigrationStatusValue::Failed);
            ctx.update_status(migration).await?;
            return Err(err);
        }
    }
    Ok(())
}

/// Volumes settled (or there were none): either run the resource phase or
/// finish the Migration.
async fn finish_or_apply(ctx: &ControllerContext, migration: &mut Migration) -> Result<()> {
    if migration.spec.wants_resources() {
        if migrator::current_stage(migration) != MigrationStage::Applications {
            migrator::set_state(
                migration,
                MigrationStage::Applications,
                MigrationStatusValue::InProgress,
            );
            ctx.update_status(migration).await?;
        }
        resources::migrate_resources(ctx, migration).await
    } else {
        migrator::set_state(
            migration,
            MigrationStage::Final,
            MigrationStatusValue::Successful,
        );
        ctx.update_status(migration).await?;
        ctx.record(
            migration,
            EventType::Normal,
            MigrationStatusValue::Successful,
            ACTION_VOLUMES,
            "Volume migration complete".to_string(),
        )
        .await;
        Ok(())
    }
}

// =============================================================================
// Classification
// =============================================================================

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct VolumeSummary {
    pub any_in_progress: bool,
    pub any_failed: bool,
}

/// Fold driver-reported volume states into what the stage should do next.
/// Anything not yet Successful or Failed counts as in progress.
pub(crate) fn classify_volumes(volumes: &[VolumeInfo]) -> VolumeSummary {
    let mut summary = VolumeSummary::default();
    for volume in volumes {
        match volume.status {
            MigrationStatusValue::Successful => {}
            MigrationStatusValue::Failed => summary.any_failed = true,
            _ => summary.any_in_progress = true,
        }
    }
    summary
}
