//! Cluster provisioning
//!
//! `ensure_cluster` is query-then-conditional-create: an existing cluster is
//! bound as-is, whatever run created it, and only an absent one is created.
//! The descriptor is never compared against an existing cluster.

use crate::backend::{BackendError, ClusterInfo, ClusterProvider};
use crate::error::{DeployError, Result, Stage};
use crate::target::{ActiveClusterHandle, ClusterDescriptor, DeploymentTarget};
use tracing::{debug, info, warn};

pub struct ClusterProvisioner<'a> {
    provider: &'a dyn ClusterProvider,
}

impl<'a> ClusterProvisioner<'a> {
    pub fn new(provider: &'a dyn ClusterProvider) -> Self {
        Self { provider }
    }

    /// Make sure the cluster exists and its credentials are active
    pub async fn ensure_cluster(
        &self,
        target: &DeploymentTarget,
        descriptor: &ClusterDescriptor,
    ) -> Result<ActiveClusterHandle> {
        target.validate()?;
        descriptor.validate()?;

        let created = match self.describe(target).await? {
            Some(info) => {
                info!(
                    cluster = %info.name,
                    zone = %target.zone,
                    status = %info.status,
                    endpoint = info.endpoint.as_deref().unwrap_or("-"),
                    "cluster exists, binding"
                );
                if info.status != "RUNNING" {
                    warn!(cluster = %info.name, status = %info.status, "cluster is not RUNNING yet");
                }
                debug!("existing cluster topology is not reconciled against the descriptor");
                false
            }
            None => {
                info!(
                    cluster = %target.cluster,
                    zone = %target.zone,
                    nodes = descriptor.node_count,
                    min = descriptor.min_nodes,
                    max = descriptor.max_nodes,
                    machine = %descriptor.machine_type,
                    "creating cluster (this blocks until the provider finishes)"
                );
                self.provider
                    .create(target, descriptor)
                    .await
                    .map_err(|e| match e {
                        BackendError::Unauthorized { message } => auth_failure(target, message),
                        BackendError::Failed { message } => DeployError::TransientProvisioning {
                            cluster: target.cluster.clone(),
                            zone: target.zone.clone(),
                            message,
                        },
                    })?;
                true
            }
        };

        self.activate(target, created).await
    }

    /// Bind to an existing cluster without ever creating one
    pub async fn bind_cluster(&self, target: &DeploymentTarget) -> Result<ActiveClusterHandle> {
        target.validate()?;
        if self.describe(target).await?.is_none() {
            return Err(DeployError::ClusterNotFound {
                project: target.project.clone(),
                cluster: target.cluster.clone(),
                zone: target.zone.clone(),
            });
        }
        self.activate(target, false).await
    }

    async fn describe(&self, target: &DeploymentTarget) -> Result<Option<ClusterInfo>> {
        self.provider.describe(target).await.map_err(|e| match e {
            BackendError::Unauthorized { message } => auth_failure(target, message),
            BackendError::Failed { message } => DeployError::ControlPlane {
                stage: Stage::Cluster,
                operation: format!("describing cluster {target}"),
                message,
            },
        })
    }

    async fn activate(&self, target: &DeploymentTarget, created: bool) -> Result<ActiveClusterHandle> {
        let context = self
            .provider
            .activate_credentials(target)
            .await
            .map_err(|e| match e {
                BackendError::Unauthorized { message } => auth_failure(target, message),
                BackendError::Failed { message } => DeployError::ControlPlane {
                    stage: Stage::Cluster,
                    operation: format!("fetching credentials for {target}"),
                    message,
                },
            })?;

        info!(%target, context = %context, "cluster credentials active");
        Ok(ActiveClusterHandle::new(target.clone(), context, created))
    }
}

fn auth_failure(target: &DeploymentTarget, message: String) -> DeployError {
    DeployError::AuthenticationFailure {
        stage: Stage::Cluster,
        entity: format!("cluster {target}"),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProvider;

    fn target() -> DeploymentTarget {
        DeploymentTarget::new("p1", "c1", "z1")
    }

    #[tokio::test]
    async fn test_creates_absent_cluster() {
        let provider = FakeProvider::default();
        let handle = ClusterProvisioner::new(&provider)
            .ensure_cluster(&target(), &ClusterDescriptor::default())
            .await
            .unwrap();

        assert!(handle.created());
        assert_eq!(handle.context(), "gke_p1_z1_c1");
        assert_eq!(
            provider.calls(),
            vec!["describe c1", "create c1 nodes=2", "credentials c1"]
        );
    }

    #[tokio::test]
    async fn test_ensure_twice_is_idempotent() {
        let provider = FakeProvider::default();
        let provisioner = ClusterProvisioner::new(&provider);
        let descriptor = ClusterDescriptor::default();

        let first = provisioner.ensure_cluster(&target(), &descriptor).await.unwrap();
        let second = provisioner.ensure_cluster(&target(), &descriptor).await.unwrap();

        assert_eq!(first.target(), second.target());
        assert_eq!(first.context(), second.context());
        assert!(!second.created());
        assert_eq!(provider.cluster_count(), 1);
        let creates = provider
            .calls()
            .iter()
            .filter(|c| c.starts_with("create"))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_existing_cluster_is_bound_not_created() {
        let provider = FakeProvider::default().with_cluster("c1", "z1");
        let handle = ClusterProvisioner::new(&provider)
            .ensure_cluster(&target(), &ClusterDescriptor::default())
            .await
            .unwrap();

        assert!(!handle.created());
        assert_eq!(provider.calls(), vec!["describe c1", "credentials c1"]);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let provider = FakeProvider::default()
            .failing_describe(BackendError::unauthorized("PERMISSION_DENIED"));
        let err = ClusterProvisioner::new(&provider)
            .ensure_cluster(&target(), &ClusterDescriptor::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::AuthenticationFailure {
                stage: Stage::Cluster,
                ..
            }
        ));
        assert_eq!(provider.calls(), vec!["describe c1"]);
    }

    #[tokio::test]
    async fn test_quota_error_is_transient_provisioning() {
        let provider = FakeProvider::default()
            .failing_create(BackendError::failed("Insufficient regional quota"));
        let err = ClusterProvisioner::new(&provider)
            .ensure_cluster(&target(), &ClusterDescriptor::default())
            .await
            .unwrap_err();

        match err {
            DeployError::TransientProvisioning { message, .. } => {
                assert!(message.contains("quota"));
            }
            other => panic!("expected TransientProvisioning, got {other:?}"),
        }
        let creates = provider
            .calls()
            .iter()
            .filter(|c| c.starts_with("create"))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_empty_project_fails_before_any_call() {
        let provider = FakeProvider::default();
        let err = ClusterProvisioner::new(&provider)
            .ensure_cluster(
                &DeploymentTarget::new("", "c1", "z1"),
                &ClusterDescriptor::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::MissingPrerequisite { .. }));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bind_missing_cluster() {
        let provider = FakeProvider::default();
        let err = ClusterProvisioner::new(&provider)
            .bind_cluster(&target())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::ClusterNotFound { .. }));
        assert_eq!(provider.cluster_count(), 0);
    }
}
