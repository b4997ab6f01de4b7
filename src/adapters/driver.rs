//! Volume Driver Adapter
//!
//! Default driver for clusters without a storage backend capable of
//! cross-cluster volume copy. It owns no claims, so discovery skips every
//! PVC and PV, and a Migration with `includeVolumes: true` fails loudly
//! instead of silently skipping data.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::DynamicObject;

use crate::crd::{Migration, VolumeInfo};
use crate::domain::ports::VolumeDriver;
use crate::error::{Error, Result};

/// Driver for resource-only deployments.
#[derive(Debug, Clone, Default)]
pub struct ResourceOnlyDriver;

impl ResourceOnlyDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VolumeDriver for ResourceOnlyDriver {
    async fn start_migration(&self, _migration: &Migration) -> Result<Vec<VolumeInfo>> {
        Err(Error::Driver(
            "no volume driver configured; set includeVolumes: false or deploy a storage driver"
                .to_string(),
        ))
    }

    async fn get_migration_status(&self, _migration: &Migration) -> Result<Vec<VolumeInfo>> {
        Err(Error::Driver("no volume driver configured".to_string()))
    }

    async fn cancel_migration(&self, _migration: &Migration) -> Result<()> {
        // Nothing was ever started
        Ok(())
    }

    fn owns_pvc(&self, _pvc: &PersistentVolumeClaim) -> bool {
        false
    }

    async fn update_migrated_persistent_volume_spec(
        &self,
        object: DynamicObject,
    ) -> Result<DynamicObject> {
        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    #[tokio::test]
    async fn test_refuses_volume_migration() {
        let driver = ResourceOnlyDriver::new();
        let migration = Migration::new(
            "m1",
            crate::crd::MigrationSpec {
                cluster_pair: "pair-x".to_string(),
                namespaces: vec![],
                selectors: None,
                include_volumes: None,
                include_resources: None,
                start_applications: None,
                pre_exec_rule: None,
                post_exec_rule: None,
            },
        );

        assert!(driver.start_migration(&migration).await.is_err());
        assert!(driver.cancel_migration(&migration).await.is_ok());
    }

    #[test]
    fn test_owns_no_claims() {
        let driver = ResourceOnlyDriver::new();
        let pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("data".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(!driver.owns_pvc(&pvc));
    }
}
