//! The deployment pipeline
//!
//! Stages run strictly in order and each one gates the next:
//!
//! 1. validate-environment
//! 2. ensure-cluster (produces the [`ActiveClusterHandle`])
//! 3. require-secret
//! 4. apply-manifests
//! 5. verify-rollout
//! 6. report-access
//!
//! The first failure aborts the run. Nothing is rolled back; re-running the
//! whole pipeline is the recovery path since every stage is idempotent.

use crate::access::AccessReport;
use crate::backend::{BackendError, ClusterProvider, Connector, ControlPlane, Prober};
use crate::config::DeployConfig;
use crate::error::{DeployError, Result, Stage};
use crate::gcloud::{GkeProvider, SystemProber};
use crate::kube_backend::KubeConnector;
use crate::manifests::{AppliedManifest, ManifestSet, apply_all};
use crate::preflight::{Capability, check_prerequisites, default_requirements};
use crate::provisioner::ClusterProvisioner;
use crate::rollout::{RolloutOutcome, verify_rollout};
use crate::secrets::require_secret;
use crate::target::{ActiveClusterHandle, DeploymentTarget};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The external systems a pipeline talks to
pub struct Backends {
    pub prober: Box<dyn Prober>,
    pub provider: Box<dyn ClusterProvider>,
    pub connector: Box<dyn Connector>,
}

impl Backends {
    /// gcloud on the host plus the kube client
    pub fn system() -> Self {
        Self {
            prober: Box::new(SystemProber),
            provider: Box::new(GkeProvider::default()),
            connector: Box::new(KubeConnector),
        }
    }

    /// Resolve the target and bind to its existing cluster, for commands that
    /// run a single stage
    pub async fn bind(
        &self,
        config: &DeployConfig,
    ) -> Result<(ActiveClusterHandle, Box<dyn ControlPlane>)> {
        let target = config.resolve_target(self.prober.as_ref());
        let handle = ClusterProvisioner::new(self.provider.as_ref())
            .bind_cluster(&target)
            .await?;
        let plane = connect(self.connector.as_ref(), &handle).await?;
        Ok((handle, plane))
    }
}

pub(crate) async fn connect(
    connector: &dyn Connector,
    handle: &ActiveClusterHandle,
) -> Result<Box<dyn ControlPlane>> {
    connector.connect(handle).await.map_err(|e| match e {
        BackendError::Unauthorized { message } => DeployError::AuthenticationFailure {
            stage: Stage::Cluster,
            entity: format!("context {}", handle.context()),
            message,
        },
        BackendError::Failed { message } => DeployError::ControlPlane {
            stage: Stage::Cluster,
            operation: format!("connecting to context {}", handle.context()),
            message,
        },
    })
}

/// Everything a successful run produced
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub handle: ActiveClusterHandle,
    pub applied: Vec<AppliedManifest>,
    pub rollout: RolloutOutcome,
    pub access: AccessReport,
}

/// A finished run, successful or not
#[derive(Debug)]
pub struct RunRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub target: Option<DeploymentTarget>,
    pub completed: Vec<Stage>,
    pub result: Result<DeployOutcome>,
}

impl RunRecord {
    pub fn exit_code(&self) -> u8 {
        match &self.result {
            Ok(_) => 0,
            Err(e) => e.exit_code(),
        }
    }
}

pub struct Pipeline {
    config: DeployConfig,
    requirements: Vec<Capability>,
    manifests: ManifestSet,
    backends: Backends,
}

impl Pipeline {
    pub fn new(config: DeployConfig, manifests: ManifestSet, backends: Backends) -> Self {
        Self {
            config,
            requirements: default_requirements(),
            manifests,
            backends,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<DeployOutcome> {
        self.run_recorded(cancel).await.result
    }

    /// Run every stage, keeping track of how far the run got
    pub async fn run_recorded(&self, cancel: &CancellationToken) -> RunRecord {
        let started_at = Utc::now();
        let mut target = None;
        let mut completed = Vec::new();

        let result = self.execute(cancel, &mut target, &mut completed).await;

        RunRecord {
            started_at,
            finished_at: Utc::now(),
            target,
            completed,
            result,
        }
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        resolved: &mut Option<DeploymentTarget>,
        completed: &mut Vec<Stage>,
    ) -> Result<DeployOutcome> {
        self.config.validate()?;

        checkpoint(cancel, Stage::Preflight)?;
        check_prerequisites(&self.requirements, self.backends.prober.as_ref()).require_all()?;
        let target = self.config.resolve_target(self.backends.prober.as_ref());
        target.validate()?;
        *resolved = Some(target.clone());
        let (namespace, workload) = self.config.workload(&self.manifests)?;
        let secret = self.config.secret_ref(&self.manifests)?;
        completed.push(Stage::Preflight);

        checkpoint(cancel, Stage::Cluster)?;
        let handle = ClusterProvisioner::new(self.backends.provider.as_ref())
            .ensure_cluster(&target, &self.config.cluster)
            .await?;
        let plane = connect(self.backends.connector.as_ref(), &handle).await?;
        completed.push(Stage::Cluster);

        checkpoint(cancel, Stage::Secret)?;
        require_secret(plane.as_ref(), &secret).await?;
        completed.push(Stage::Secret);

        checkpoint(cancel, Stage::Manifests)?;
        let applied = apply_all(plane.as_ref(), &self.manifests).await?;
        completed.push(Stage::Manifests);

        checkpoint(cancel, Stage::Rollout)?;
        let rollout = verify_rollout(
            plane.as_ref(),
            &namespace,
            &workload,
            self.config.rollout_policy(),
            cancel,
        )
        .await?;
        completed.push(Stage::Rollout);

        let access = self
            .config
            .access_report(&self.manifests, Some(handle.context()));
        completed.push(Stage::Access);

        info!(%target, workload = %workload, "deployment complete");
        Ok(DeployOutcome {
            handle,
            applied,
            rollout,
            access,
        })
    }
}

fn checkpoint(cancel: &CancellationToken, stage: Stage) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(DeployError::Interrupted { stage });
    }
    info!(stage = %stage, "stage started");
    Ok(())
}
