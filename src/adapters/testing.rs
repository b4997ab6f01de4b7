// Allow dead code for test-support APIs not used by the binary
#![allow(dead_code)]

//! In-memory fakes for the domain ports
//!
//! Used by unit tests and the pipeline tests to exercise the staged
//! migration logic without a cluster or a storage backend.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::DynamicObject;
use kube::Client;
use parking_lot::{Mutex, RwLock};

use crate::crd::{Migration, MigrationStatusValue, PairStatus, VolumeInfo};
use crate::domain::ports::{
    ClusterPairRegistry, RuleExecutor, RulePhase, TerminationSignal, VolumeDriver,
};
use crate::error::{Error, Result};
use crate::unstructured;

// =============================================================================
// Fake Volume Driver
// =============================================================================

/// Scriptable volume driver.
///
/// `start_migration` returns a fixed list, `get_migration_status` drains
/// a queue of status snapshots (repeating the last one when the queue is
/// empty), and PV rewrites suffix the CSI volume handle with `-remote`.
#[derive(Debug, Default)]
pub struct FakeDriver {
    owned_pvcs: RwLock<HashSet<String>>,
    start_result: RwLock<Vec<VolumeInfo>>,
    fail_start: RwLock<bool>,
    status_queue: Mutex<VecDeque<Vec<VolumeInfo>>>,
    last_status: Mutex<Vec<VolumeInfo>>,
    cancel_count: Mutex<usize>,
    rewrite_count: Mutex<usize>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a claim as owned by this driver.
    pub fn own_pvc(&self, namespace: &str, name: &str) {
        self.owned_pvcs
            .write()
            .insert(format!("{}/{}", namespace, name));
    }

    pub fn set_start_result(&self, volumes: Vec<VolumeInfo>) {
        *self.start_result.write() = volumes;
    }

    pub fn fail_start_migration(&self) {
        *self.fail_start.write() = true;
    }

    /// Queue a status snapshot returned by one `get_migration_status` call.
    pub fn push_status(&self, volumes: Vec<VolumeInfo>) {
        self.status_queue.lock().push_back(volumes);
    }

    pub fn cancel_count(&self) -> usize {
        *self.cancel_count.lock()
    }

    pub fn rewrite_count(&self) -> usize {
        *self.rewrite_count.lock()
    }
}

/// Shorthand for building driver-reported volume state in tests.
pub fn volume_info(
    volume: &str,
    namespace: &str,
    pvc: &str,
    status: MigrationStatusValue,
) -> VolumeInfo {
    VolumeInfo {
        volume: volume.to_string(),
        namespace: namespace.to_string(),
        persistent_volume_claim: pvc.to_string(),
        status,
        reason: String::new(),
    }
}

#[async_trait]
impl VolumeDriver for FakeDriver {
    async fn start_migration(&self, _migration: &Migration) -> Result<Vec<VolumeInfo>> {
        if *self.fail_start.read() {
            return Err(Error::Driver("start rejected".to_string()));
        }
        Ok(self.start_result.read().clone())
    }

    async fn get_migration_status(&self, _migration: &Migration) -> Result<Vec<VolumeInfo>> {
        let mut queue = self.status_queue.lock();
        match queue.pop_front() {
            Some(volumes) => {
                *self.last_status.lock() = volumes.clone();
                Ok(volumes)
            }
            None => Ok(self.last_status.lock().clone()),
        }
    }

    async fn cancel_migration(&self, _migration: &Migration) -> Result<()> {
        *self.cancel_count.lock() += 1;
        Ok(())
    }

    fn owns_pvc(&self, pvc: &PersistentVolumeClaim) -> bool {
        let namespace = pvc.metadata.namespace.as_deref().unwrap_or_default();
        let name = pvc.metadata.name.as_deref().unwrap_or_default();
        self.owned_pvcs
            .read()
            .contains(&format!("{}/{}", namespace, name))
    }

    async fn update_migrated_persistent_volume_spec(
        &self,
        mut object: DynamicObject,
    ) -> Result<DynamicObject> {
        *self.rewrite_count.lock() += 1;
        if let Some(handle) =
            unstructured::get_str(&object.data, &["spec", "csi", "volumeHandle"])
        {
            let rewritten = format!("{}-remote", handle);
            unstructured::set(
                &mut object.data,
                &["spec", "csi", "volumeHandle"],
                rewritten.into(),
            );
        }
        Ok(object)
    }
}

/// Build a dynamic object the way a discovery listing would return it.
pub fn dynamic_object(
    api_version: &str,
    kind: &str,
    namespace: Option<&str>,
    name: &str,
    data: serde_json::Value,
) -> DynamicObject {
    DynamicObject {
        types: Some(kube::api::TypeMeta {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }),
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespace.map(|ns| ns.to_string()),
            ..Default::default()
        },
        data,
    }
}

// =============================================================================
// Fake Rule Executor
// =============================================================================

/// One recorded rule execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleExecution {
    pub name: String,
    pub phase: RulePhase,
    pub namespace: String,
}

/// Recording rule executor with scriptable failures and helper forking.
#[derive(Debug, Default)]
pub struct FakeRuleExecutor {
    rules: RwLock<HashSet<(String, String)>>,
    executions: RwLock<Vec<RuleExecution>>,
    fail_in_namespace: RwLock<Option<String>>,
    fork_helpers: RwLock<bool>,
    signals: RwLock<Vec<TerminationSignal>>,
    recovered: RwLock<Vec<String>>,
}

impl FakeRuleExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule so it resolves in the given namespace.
    pub fn add_rule(&self, name: &str, namespace: &str) {
        self.rules
            .write()
            .insert((name.to_string(), namespace.to_string()));
    }

    /// Fail any execution targeting the given namespace.
    pub fn fail_in_namespace(&self, namespace: &str) {
        *self.fail_in_namespace.write() = Some(namespace.to_string());
    }

    /// Make every pre-rule execution fork a background helper.
    pub fn fork_helpers(&self) {
        *self.fork_helpers.write() = true;
    }

    pub fn executions(&self) -> Vec<RuleExecution> {
        self.executions.read().clone()
    }

    /// Termination signals handed out so far.
    pub fn signals(&self) -> Vec<TerminationSignal> {
        self.signals.read().clone()
    }

    pub fn recovered(&self) -> Vec<String> {
        self.recovered.read().clone()
    }
}

#[async_trait]
impl RuleExecutor for FakeRuleExecutor {
    async fn rule_exists(&self, name: &str, namespace: &str) -> Result<bool> {
        Ok(self
            .rules
            .read()
            .contains(&(name.to_string(), namespace.to_string())))
    }

    async fn execute_rule(
        &self,
        name: &str,
        phase: RulePhase,
        migration: &Migration,
        namespace: &str,
    ) -> Result<Option<TerminationSignal>> {
        let migration_namespace = migration
            .metadata
            .namespace
            .as_deref()
            .unwrap_or_default();
        if !self.rule_exists(name, migration_namespace).await? {
            return Err(Error::RuleNotFound {
                name: name.to_string(),
                namespace: migration_namespace.to_string(),
            });
        }
        if self.fail_in_namespace.read().as_deref() == Some(namespace) {
            return Err(Error::Rule(format!(
                "rule {} failed in namespace {}",
                name, namespace
            )));
        }

        self.executions.write().push(RuleExecution {
            name: name.to_string(),
            phase,
            namespace: namespace.to_string(),
        });

        if phase == RulePhase::Pre && *self.fork_helpers.read() {
            let signal = TerminationSignal::new();
            self.signals.write().push(signal.clone());
            return Ok(Some(signal));
        }
        Ok(None)
    }

    async fn perform_rule_recovery(&self, migration: &Migration) -> Result<()> {
        let name = migration
            .metadata
            .name
            .clone()
            .unwrap_or_default();
        self.recovered.write().push(name);
        Ok(())
    }
}

// =============================================================================
// Fake Cluster Pair Registry
// =============================================================================

/// Registry with settable readiness. There is no destination cluster in
/// tests, so `scheduler_client` always fails.
#[derive(Debug)]
pub struct FakeClusterPairRegistry {
    storage: RwLock<PairStatus>,
    scheduler: RwLock<PairStatus>,
}

impl Default for FakeClusterPairRegistry {
    fn default() -> Self {
        Self {
            storage: RwLock::new(PairStatus::Ready),
            scheduler: RwLock::new(PairStatus::Ready),
        }
    }
}

impl FakeClusterPairRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_storage_status(&self, status: PairStatus) {
        *self.storage.write() = status;
    }

    pub fn set_scheduler_status(&self, status: PairStatus) {
        *self.scheduler.write() = status;
    }
}

#[async_trait]
impl ClusterPairRegistry for FakeClusterPairRegistry {
    async fn storage_status(&self, _name: &str, _namespace: &str) -> Result<PairStatus> {
        Ok(*self.storage.read())
    }

    async fn scheduler_status(&self, _name: &str, _namespace: &str) -> Result<PairStatus> {
        Ok(*self.scheduler.read())
    }

    async fn scheduler_client(&self, _name: &str, _namespace: &str) -> Result<Client> {
        Err(Error::Internal(
            "no destination cluster available in tests".to_string(),
        ))
    }
}
