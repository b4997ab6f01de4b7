//! ClusterPair Registry Adapter
//!
//! Implements the `ClusterPairRegistry` port on top of the ClusterPair
//! CRD: readiness comes from the pair's status subresource and the
//! destination-cluster client is built from the kubeconfig Secret the
//! pair's spec points at.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, instrument};

use crate::crd::{ClusterPair, PairStatus};
use crate::domain::ports::ClusterPairRegistry;
use crate::error::{Error, Result};

/// Key inside the kubeconfig Secret holding the serialized kubeconfig.
const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";

/// CRD-backed cluster pair registry.
#[derive(Clone)]
pub struct KubeClusterPairRegistry {
    client: Client,
}

impl KubeClusterPairRegistry {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_pair(&self, name: &str, namespace: &str) -> Result<ClusterPair> {
        let api: Api<ClusterPair> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }
}

impl std::fmt::Debug for KubeClusterPairRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterPairRegistry").finish()
    }
}

#[async_trait]
impl ClusterPairRegistry for KubeClusterPairRegistry {
    #[instrument(skip(self))]
    async fn storage_status(&self, name: &str, namespace: &str) -> Result<PairStatus> {
        let pair = self.get_pair(name, namespace).await?;
        Ok(pair.status.map(|s| s.storage_status).unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn scheduler_status(&self, name: &str, namespace: &str) -> Result<PairStatus> {
        let pair = self.get_pair(name, namespace).await?;
        Ok(pair.status.map(|s| s.scheduler_status).unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn scheduler_client(&self, name: &str, namespace: &str) -> Result<Client> {
        let pair = self.get_pair(name, namespace).await?;

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get(&pair.spec.kubeconfig_secret).await?;

        let raw = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_SECRET_KEY))
            .ok_or_else(|| {
                Error::Internal(format!(
                    "secret {}/{} has no {} key",
                    namespace, pair.spec.kubeconfig_secret, KUBECONFIG_SECRET_KEY
                ))
            })?;
        let yaml = std::str::from_utf8(&raw.0)
            .map_err(|err| Error::Internal(format!("kubeconfig is not valid UTF-8: {}", err)))?;

        let kubeconfig = Kubeconfig::from_yaml(yaml)
            .map_err(|err| Error::Internal(format!("failed to parse kubeconfig: {}", err)))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|err| Error::Internal(format!("failed to load kubeconfig: {}", err)))?;

        debug!(pair = %name, "Built destination cluster client");
        Ok(Client::try_from(config)?)
    }
}
