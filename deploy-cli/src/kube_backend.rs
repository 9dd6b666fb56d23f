//! Control-plane backend built on the `kube` client
//!
//! Manifests go through server-side apply with a fixed field manager, so
//! re-submitting an unchanged manifest is a no-op on the server.

use crate::backend::{BackendError, Connector, ControlPlane};
use crate::manifests::{Manifest, ManifestKind};
use crate::rollout::WorkloadStatus;
use crate::target::ActiveClusterHandle;
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::{Api, Patch, PatchParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Config, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

pub const FIELD_MANAGER: &str = "deploy-cli";

impl From<kube::Error> for BackendError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(status) if status.code == 401 || status.code == 403 => {
                BackendError::unauthorized(err.to_string())
            }
            _ => BackendError::failed(err.to_string()),
        }
    }
}

pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client for a named kubeconfig context
    pub async fn for_context(context: &str) -> Result<Self, BackendError> {
        let options = KubeConfigOptions {
            context: Some(context.to_string()),
            ..KubeConfigOptions::default()
        };
        let config = Config::from_kubeconfig(&options).await.map_err(|e| {
            BackendError::failed(format!("cannot load kubeconfig context {context}: {e}"))
        })?;
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }

    async fn apply_as<K>(&self, manifest: &Manifest) -> Result<(), BackendError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &manifest.namespace);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&manifest.name, &params, &Patch::Apply(&manifest.body))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool, BackendError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        // metadata only; the data map is never requested
        let meta = secrets.get_metadata_opt(name).await?;
        Ok(meta.is_some())
    }

    async fn apply(&self, manifest: &Manifest) -> Result<(), BackendError> {
        debug!(kind = %manifest.kind, name = %manifest.name, "server-side apply");
        match manifest.kind {
            ManifestKind::Config => self.apply_as::<ConfigMap>(manifest).await,
            ManifestKind::Endpoint => self.apply_as::<Service>(manifest).await,
            ManifestKind::Workload => self.apply_as::<Deployment>(manifest).await,
        }
    }

    async fn workload_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkloadStatus>, BackendError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(deployments.get_opt(name).await?.map(|d| deployment_status(&d)))
    }
}

/// Ready replicas only count once the controller has observed the latest
/// spec and the pods run the updated template
fn deployment_status(deployment: &Deployment) -> WorkloadStatus {
    let to_u32 = |v: Option<i32>| v.and_then(|n| u32::try_from(n).ok()).unwrap_or(0);

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .map_or(1, |r| u32::try_from(r).unwrap_or(0));

    let Some(status) = deployment.status.as_ref() else {
        return WorkloadStatus { desired, ready: 0 };
    };

    let generation = deployment.metadata.generation.unwrap_or(0);
    if status.observed_generation.unwrap_or(0) < generation {
        return WorkloadStatus { desired, ready: 0 };
    }

    let ready = to_u32(status.ready_replicas).min(to_u32(status.updated_replicas));
    WorkloadStatus { desired, ready }
}

/// Connects to the kubeconfig context recorded in the handle
#[derive(Debug, Clone, Default)]
pub struct KubeConnector;

#[async_trait]
impl Connector for KubeConnector {
    async fn connect(
        &self,
        handle: &ActiveClusterHandle,
    ) -> Result<Box<dyn ControlPlane>, BackendError> {
        let plane = KubeControlPlane::for_context(handle.context()).await?;
        Ok(Box::new(plane))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn deployment(
        replicas: Option<i32>,
        generation: i64,
        observed: i64,
        ready: i32,
        updated: i32,
    ) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("wl".to_string()),
                generation: Some(generation),
                ..ObjectMeta::default()
            },
            spec: Some(DeploymentSpec {
                replicas,
                ..DeploymentSpec::default()
            }),
            status: Some(DeploymentStatus {
                observed_generation: Some(observed),
                ready_replicas: Some(ready),
                updated_replicas: Some(updated),
                ..DeploymentStatus::default()
            }),
        }
    }

    #[test]
    fn test_ready_deployment() {
        let status = deployment_status(&deployment(Some(2), 3, 3, 2, 2));
        assert_eq!(status, WorkloadStatus { desired: 2, ready: 2 });
    }

    #[test]
    fn test_stale_generation_counts_as_not_ready() {
        let status = deployment_status(&deployment(Some(2), 4, 3, 2, 2));
        assert_eq!(status, WorkloadStatus { desired: 2, ready: 0 });
    }

    #[test]
    fn test_old_pods_do_not_count() {
        let status = deployment_status(&deployment(Some(3), 2, 2, 3, 1));
        assert_eq!(status, WorkloadStatus { desired: 3, ready: 1 });
    }

    #[test]
    fn test_replicas_default_to_one() {
        let mut d = deployment(None, 1, 1, 0, 0);
        d.status = None;
        assert_eq!(deployment_status(&d), WorkloadStatus { desired: 1, ready: 0 });
    }
}
