//! Pre/Post Rule Orchestration
//!
//! Pre rules run once per source namespace before volume cutover and may
//! fork background helpers; each helper hands back a termination signal
//! the volume stage fires once the driver accepts the migration. Post
//! rules run synchronously after cutover. On startup the rule engine's
//! recovery hook runs over every existing Migration so helpers orphaned
//! by a controller crash are cleaned up.

use kube::api::{Api, ListParams};
use kube::Client;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::crd::Migration;
use crate::domain::ports::{RuleExecutor, RulePhase, TerminationSignal};
use crate::error::Result;

/// Run the pre-exec rule in every source namespace.
///
/// Returns the termination signals of any forked helpers. If a namespace
/// fails, every signal already collected is fired before the error
/// propagates, so no helper outlives a failed pre stage.
pub async fn run_pre_exec_rule(
    executor: &dyn RuleExecutor,
    migration: &Migration,
) -> Result<Vec<TerminationSignal>> {
    let Some(rule) = migration.spec.pre_exec_rule() else {
        return Ok(Vec::new());
    };

    let mut signals = Vec::new();
    for namespace in &migration.spec.namespaces {
        match executor
            .execute_rule(rule, RulePhase::Pre, migration, namespace)
            .await
        {
            Ok(Some(signal)) => signals.push(signal),
            Ok(None) => {}
            Err(err) => {
                for signal in &signals {
                    signal.fire();
                }
                return Err(err);
            }
        }
    }
    Ok(signals)
}

/// Run the post-exec rule synchronously in every source namespace.
pub async fn run_post_exec_rule(executor: &dyn RuleExecutor, migration: &Migration) -> Result<()> {
    let Some(rule) = migration.spec.post_exec_rule() else {
        return Ok(());
    };

    for namespace in &migration.spec.namespaces {
        let signal = executor
            .execute_rule(rule, RulePhase::Post, migration, namespace)
            .await?;
        // Post rules have nothing left to guard once they return
        if let Some(signal) = signal {
            signal.fire();
        }
    }
    Ok(())
}

/// Invoke the rule engine's recovery hook on every existing Migration.
///
/// Runs at controller initialization. Failures do not stop the walk;
/// errors are collected and the last one is returned.
pub async fn recover(executor: &dyn RuleExecutor, client: &Client) -> Result<()> {
    let api: Api<Migration> = Api::all(client.clone());
    let migrations = api.list(&ListParams::default()).await?;

    let mut last_err = None;
    for migration in &migrations {
        if let Err(err) = executor.perform_rule_recovery(migration).await {
            warn!(
                migration = %migration.name_any(),
                error = %err,
                "Rule recovery failed"
            );
            last_err = Some(err);
        }
    }
    info!(count = migrations.items.len(), "Rule recovery complete");

    match last_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

// =============================================================================
// Tests
// =============================================================================
