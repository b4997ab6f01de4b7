//! Migration Controller
//!
//! Reconciliation logic for Migration resources. Each event advances the
//! Migration through its stages (Initial, PreExecRule, Volumes,
//! Applications, Final), persisting status before falling through so a
//! crashed controller resumes from a valid state on the next resync.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::runtime::finalizer::{finalizer, Event as Finalizer};
use kube::runtime::watcher::Config;
use kube::{Client, Resource, ResourceExt};
use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec};
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{Migration, MigrationStage, MigrationStatusValue};
use crate::domain::ports::{ClusterPairRegistry, RuleExecutor, TerminationSignal, VolumeDriver};
use crate::error::{Error, Result};
use crate::migrator::{
    self, resources, rules, volumes, ACTION_PRE_EXEC, ACTION_RESOURCES, ACTION_VALIDATE,
    ACTION_VOLUMES,
};

/// Finalizer guaranteeing the volume driver is cancelled exactly once on
/// deletion.
pub const MIGRATION_FINALIZER: &str = "stork.libopenstorage.org/migration-finalizer";

static RECONCILES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!(
        "migration_operator_reconciles_total",
        "Total number of Migration reconciliations"
    )
    .expect("reconcile counter can be registered")
});

static MIGRATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!(
        "migration_operator_migrations_total",
        "Migrations that reached a terminal stage",
        &["status"]
    )
    .expect("migration counter can be registered")
});

// =============================================================================
// Termination Signal Registry
// =============================================================================

/// Holds the termination signals of background helpers forked by pre-exec
/// rules, keyed per Migration. Signals survive across reconciliations and
/// are fired by the volume stage or on deletion.
#[derive(Debug, Default)]
pub struct SignalRegistry {
    signals: DashMap<String, Vec<TerminationSignal>>,
}

impl SignalRegistry {
    fn key(migration: &Migration) -> String {
        format!(
            "{}/{}",
            migration.namespace().unwrap_or_default(),
            migration.name_any()
        )
    }

    /// Retain signals for later firing.
    pub fn hold(&self, migration: &Migration, signals: Vec<TerminationSignal>) {
        if signals.is_empty() {
            return;
        }
        self.signals
            .entry(Self::key(migration))
            .or_default()
            .extend(signals);
    }

    /// Fire and release every signal held for the Migration. Idempotent.
    pub fn fire(&self, migration: &Migration) {
        if let Some((_, signals)) = self.signals.remove(&Self::key(migration)) {
            for signal in &signals {
                signal.fire();
            }
        }
    }
}

// =============================================================================
// Controller Context
// =============================================================================

/// Shared context for the controller
pub struct ControllerContext {
    /// Kubernetes client for the source cluster
    pub client: Client,

    /// Storage driver performing the volume copy
    pub driver: Arc<dyn VolumeDriver>,

    /// Engine executing pre/post rules
    pub rules: Arc<dyn RuleExecutor>,

    /// Registry resolving cluster pairs
    pub pairs: Arc<dyn ClusterPairRegistry>,

    /// Namespace whose Migrations may span arbitrary namespaces
    pub admin_namespace: String,

    /// Requeue period for long-running stages
    pub resync: Duration,

    /// Termination signals held between reconciliations
    pub signals: SignalRegistry,

    recorder: Recorder,
}

impl ControllerContext {
    /// Create a new controller context
    pub fn new(
        client: Client,
        driver: Arc<dyn VolumeDriver>,
        rules: Arc<dyn RuleExecutor>,
        pairs: Arc<dyn ClusterPairRegistry>,
        admin_namespace: impl Into<String>,
        resync: Duration,
    ) -> Arc<Self> {
        let reporter = Reporter {
            controller: "migration-operator".into(),
            instance: None,
        };
        let recorder = Recorder::new(client.clone(), reporter);
        Arc::new(Self {
            client,
            driver,
            rules,
            pairs,
            admin_namespace: admin_namespace.into(),
            resync,
            signals: SignalRegistry::default(),
            recorder,
        })
    }

    /// Persist the Migration's status subresource.
    pub async fn update_status(&self, migration: &Migration) -> Result<()> {
        let namespace = migration
            .namespace()
            .ok_or_else(|| Error::Internal("Migration has no namespace".to_string()))?;
        let api: Api<Migration> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({ "status": migration.status });
        api.patch_status(
            &migration.name_any(),
            &PatchParams::apply("migration-operator"),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    /// Record an event on the Migration. Event failures are logged, never
    /// propagated.
    pub async fn record(
        &self,
        migration: &Migration,
        type_: EventType,
        reason: MigrationStatusValue,
        action: &str,
        note: String,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: action.to_string(),
            secondary: None,
        };
        if let Err(err) = self
            .recorder
            .publish(&event, &migration.object_ref(&()))
            .await
        {
            warn!(error = %err, "Failed to publish event");
        }
    }
}

// =============================================================================
// Controller Loop
// =============================================================================

/// Run the Migration controller
pub async fn run(ctx: Arc<ControllerContext>) -> Result<()> {
    let migrations: Api<Migration> = Api::all(ctx.client.clone());

    // Check if CRD exists
    if let Err(e) = migrations.list(&ListParams::default().limit(1)).await {
        error!(
            "Migration CRD not found: {}. Please install the CRD first.",
            e
        );
        return Err(Error::Kube(e));
    }

    // Clean up rule state orphaned by a previous controller instance
    if let Err(err) = rules::recover(ctx.rules.as_ref(), &ctx.client).await {
        warn!(error = %err, "Rule recovery reported errors at startup");
    }

    info!("Starting Migration controller");

    Controller::new(migrations, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => debug!("Reconciled {:?}", o),
                Err(e) => error!("Reconcile failed: {:?}", e),
            }
        })
        .await;

    info!("Controller shutdown complete");
    Ok(())
}

/// Reconcile a Migration resource
#[instrument(skip(migration, ctx), fields(migration = %migration.name_any()))]
async fn reconcile(
    migration: Arc<Migration>,
    ctx: Arc<ControllerContext>,
) -> std::result::Result<Action, Error> {
    RECONCILES_TOTAL.inc();

    let namespace = migration
        .namespace()
        .ok_or_else(|| Error::Internal("Migration has no namespace".to_string()))?;
    let api: Api<Migration> = Api::namespaced(ctx.client.clone(), &namespace);

    let ctx_for_handler = ctx.clone();
    finalizer(&api, MIGRATION_FINALIZER, migration, |event| async move {
        match event {
            Finalizer::Apply(migration) => apply(migration, ctx_for_handler).await,
            Finalizer::Cleanup(migration) => cleanup(migration, ctx_for_handler).await,
        }
    })
    .await
    .map_err(|err| match err {
        kube::runtime::finalizer::Error::ApplyFailed(err)
        | kube::runtime::finalizer::Error::CleanupFailed(err) => err,
        other => Error::Internal(other.to_string()),
    })
}

/// Advance a live Migration through its stages.
async fn apply(
    migration: Arc<Migration>,
    ctx: Arc<ControllerContext>,
) -> std::result::Result<Action, Error> {
    let mut migration = (*migration).clone();

    let stage = migrator::current_stage(&migration);
    if stage == MigrationStage::Final {
        // Terminal: subsequent events are no-ops
        return Ok(Action::await_change());
    }

    if let Err(err) = validate_admission(&migration, &ctx.admin_namespace) {
        ctx.record(
            &migration,
            EventType::Warning,
            MigrationStatusValue::Failed,
            ACTION_VALIDATE,
            err.to_string(),
        )
        .await;
        return Ok(Action::requeue(ctx.resync));
    }

    info!(
        "Reconciling Migration {} at stage {}",
        migration.name_any(),
        stage
    );

    let outcome = match stage {
        MigrationStage::Initial => handle_initial(&ctx, &mut migration).await,
        MigrationStage::PreExecRule => handle_pre_exec_rule(&ctx, &mut migration).await,
        MigrationStage::Volumes => volumes::migrate_volumes(&ctx, &mut migration).await,
        MigrationStage::Applications => resources::migrate_resources(&ctx, &mut migration).await,
        MigrationStage::Final => return Ok(Action::await_change()),
    };

    let action = stage_action(stage);
    match outcome {
        Ok(()) => {}
        Err(err) if err.is_user_error() => {
            // User must fix the spec or wait for the pair; do not back off
            ctx.record(
                &migration,
                EventType::Warning,
                MigrationStatusValue::Failed,
                action,
                err.to_string(),
            )
            .await;
        }
        Err(err) => {
            ctx.record(
                &migration,
                EventType::Warning,
                MigrationStatusValue::Failed,
                action,
                err.to_string(),
            )
            .await;
            return Err(err);
        }
    }

    if migrator::current_stage(&migration) == MigrationStage::Final {
        MIGRATIONS_TOTAL
            .with_label_values(&[&migrator::current_status(&migration).to_string()])
            .inc();
        Ok(Action::await_change())
    } else {
        Ok(Action::requeue(ctx.resync))
    }
}

/// Cancel driver work for a deleted Migration. The finalizer retries this
/// until it succeeds, then removes itself, so cancellation runs exactly
/// once.
async fn cleanup(
    migration: Arc<Migration>,
    ctx: Arc<ControllerContext>,
) -> std::result::Result<Action, Error> {
    info!("Cancelling deleted Migration {}", migration.name_any());
    ctx.signals.fire(&migration);
    ctx.driver.cancel_migration(&migration).await?;
    Ok(Action::await_change())
}

fn stage_action(stage: MigrationStage) -> &'static str {
    match stage {
        MigrationStage::Initial => ACTION_VALIDATE,
        MigrationStage::PreExecRule => ACTION_PRE_EXEC,
        MigrationStage::Volumes => ACTION_VOLUMES,
        MigrationStage::Applications => ACTION_RESOURCES,
        MigrationStage::Final => ACTION_VALIDATE,
    }
}

// =============================================================================
// Admission
// =============================================================================

/// Namespace-scope policy and required fields. Violations stop processing
/// without moving the Migration to Final; the user may correct the spec.
pub(crate) fn validate_admission(migration: &Migration, admin_namespace: &str) -> Result<()> {
    if migration.spec.cluster_pair.is_empty() {
        return Err(Error::Validation {
            reason: "clusterPair cannot be empty".to_string(),
        });
    }

    let own_namespace = migration.namespace().unwrap_or_default();
    if own_namespace != admin_namespace {
        for namespace in &migration.spec.namespaces {
            if namespace != &own_namespace {
                return Err(Error::Validation {
                    reason: format!(
                        "migration in namespace {} cannot migrate namespace {}; \
                         only migrations in the admin namespace may span namespaces",
                        own_namespace, namespace
                    ),
                });
            }
        }
    }
    Ok(())
}

// =============================================================================
// Stage Handlers
// =============================================================================

/// Initial stage: verify every listed namespace exists and every named
/// rule resolves, then fall through to the pre-exec rule stage.
async fn handle_initial(ctx: &ControllerContext, migration: &mut Migration) -> Result<()> {
    let namespaces: Api<Namespace> = Api::all(ctx.client.clone());
    for namespace in migration.spec.namespaces.clone() {
        if namespaces.get_opt(&namespace).await?.is_none() {
            migrator::set_state(migration, MigrationStage::Final, MigrationStatusValue::Failed);
            ctx.update_status(migration).await?;
            return Err(Error::Validation {
                reason: format!("namespace {} does not exist", namespace),
            });
        }
    }

    let own_namespace = migration.namespace().unwrap_or_default();
    for rule in [
        migration.spec.pre_exec_rule(),
        migration.spec.post_exec_rule(),
    ]
    .into_iter()
    .flatten()
    {
        if !ctx.rules.rule_exists(rule, &own_namespace).await? {
            return Err(Error::RuleNotFound {
                name: rule.to_string(),
                namespace: own_namespace.clone(),
            });
        }
    }

    handle_pre_exec_rule(ctx, migration).await
}

/// PreExecRule stage: launch the pre rule in every namespace, retaining
/// helper termination signals for the volume stage to fire. On failure the
/// stage resets to Initial so the rule reruns on the next pass.
async fn handle_pre_exec_rule(ctx: &ControllerContext, migration: &mut Migration) -> Result<()> {
    if migration.spec.pre_exec_rule().is_none() {
        migrator::set_state(migration, MigrationStage::Volumes, MigrationStatusValue::Pending);
        return volumes::migrate_volumes(ctx, migration).await;
    }

    if migrator::current_stage(migration) == MigrationStage::Initial {
        migrator::set_state(
            migration,
            MigrationStage::PreExecRule,
            MigrationStatusValue::Pending,
        );
    }

    match migrator::current_status(migration) {
        MigrationStatusValue::Pending => {
            migrator::set_state(
                migration,
                MigrationStage::PreExecRule,
                MigrationStatusValue::InProgress,
            );
            ctx.update_status(migration).await?;
        }
        MigrationStatusValue::InProgress => {
            ctx.record(
                migration,
                EventType::Normal,
                MigrationStatusValue::InProgress,
                ACTION_PRE_EXEC,
                "Waiting for pre-exec rule to complete".to_string(),
            )
            .await;
        }
        _ => {}
    }

    match rules::run_pre_exec_rule(ctx.rules.as_ref(), migration).await {
        Ok(signals) => {
            ctx.signals.hold(migration, signals);
            let status = migrator::current_status(migration);
            migrator::set_state(migration, MigrationStage::Volumes, status);
        }
        Err(err) => {
            ctx.record(
                migration,
                EventType::Warning,
                MigrationStatusValue::Failed,
                ACTION_PRE_EXEC,
                err.to_string(),
            )
            .await;
            migrator::set_state(migration, MigrationStage::Initial, MigrationStatusValue::Initial);
            ctx.update_status(migration).await?;
            return Ok(());
        }
    }

    volumes::migrate_volumes(ctx, migration).await
}

/// Error policy for the controller
fn error_policy(
    _migration: Arc<Migration>,
    error: &Error,
    _ctx: Arc<ControllerContext>,
) -> Action {
    error!("Reconciliation error: {}", error);
    Action::requeue(Duration::from_secs(60))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::MigrationSpec;

    fn migration(own_namespace: &str, cluster_pair: &str, namespaces: &[&str]) -> Migration {
        let mut migration = Migration::new(
            "m1",
            MigrationSpec {
                cluster_pair: cluster_pair.to_string(),
                namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
                selectors: None,
                include_volumes: None,
                include_resources: None,
                start_applications: None,
                pre_exec_rule: None,
                post_exec_rule: None,
            },
        );
        migration.metadata.namespace = Some(own_namespace.to_string());
        migration
    }

    #[test]
    fn test_empty_cluster_pair_is_rejected() {
        let err = validate_admission(&migration("team-a", "", &["team-a"]), "kube-system")
            .unwrap_err();
        assert!(err.is_user_error());
    }

    #[test]
    fn test_own_namespace_is_allowed() {
        assert!(
            validate_admission(&migration("team-a", "pair-x", &["team-a"]), "kube-system").is_ok()
        );
    }

    #[test]
    fn test_foreign_namespace_is_rejected_outside_admin() {
        let err = validate_admission(&migration("team-a", "pair-x", &["team-b"]), "kube-system")
            .unwrap_err();
        assert!(err.is_user_error());
        assert!(err.to_string().contains("team-b"));
    }

    #[test]
    fn test_admin_namespace_may_span_namespaces() {
        assert!(validate_admission(
            &migration("kube-system", "pair-x", &["team-a", "team-b"]),
            "kube-system"
        )
        .is_ok());
    }

    #[test]
    fn test_signal_registry_fires_and_clears() {
        let registry = SignalRegistry::default();
        let migration = migration("team-a", "pair-x", &["team-a"]);

        let first = TerminationSignal::new();
        let second = TerminationSignal::new();
        registry.hold(&migration, vec![first.clone(), second.clone()]);

        registry.fire(&migration);
        assert!(first.is_fired());
        assert!(second.is_fired());

        // Firing again with nothing held is a no-op
        registry.fire(&migration);
    }

    #[test]
    fn test_signal_registry_keys_per_migration() {
        let registry = SignalRegistry::default();
        let one = migration("team-a", "pair-x", &["team-a"]);
        let two = migration("team-b", "pair-x", &["team-b"]);

        let signal = TerminationSignal::new();
        registry.hold(&one, vec![signal.clone()]);

        registry.fire(&two);
        assert!(!signal.is_fired());

        registry.fire(&one);
        assert!(signal.is_fired());
    }

    #[test]
    fn test_stage_actions_cover_all_stages() {
        assert_eq!(stage_action(MigrationStage::Initial), ACTION_VALIDATE);
        assert_eq!(stage_action(MigrationStage::PreExecRule), ACTION_PRE_EXEC);
        assert_eq!(stage_action(MigrationStage::Volumes), ACTION_VOLUMES);
        assert_eq!(stage_action(MigrationStage::Applications), ACTION_RESOURCES);
    }
}
