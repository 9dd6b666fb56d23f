//! Seams between the pipeline and the outside world
//!
//! The pipeline only ever talks to the host environment, the cloud provider
//! and the cluster's control plane through these traits. Production code
//! wires in `SystemProber`, `GkeProvider` and `KubeConnector`; tests wire in
//! in-memory fakes.

use crate::manifests::Manifest;
use crate::rollout::WorkloadStatus;
use crate::target::{ActiveClusterHandle, ClusterDescriptor, DeploymentTarget};
use async_trait::async_trait;
use snafu::Snafu;
use std::path::PathBuf;

/// Failure reported by a backend call
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum BackendError {
    /// The ambient identity was rejected or lacks permission
    #[snafu(display("unauthorized: {message}"))]
    Unauthorized { message: String },

    #[snafu(display("{message}"))]
    Failed { message: String },
}

impl BackendError {
    pub fn failed(message: impl Into<String>) -> Self {
        BackendError::Failed {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        BackendError::Unauthorized {
            message: message.into(),
        }
    }
}

/// Read-only probes of the local environment
pub trait Prober: Send + Sync {
    /// Resolve a binary on `PATH`
    fn find_binary(&self, name: &str) -> Option<PathBuf>;

    /// Raw output of the binary's version command
    fn version_output(&self, name: &str, args: &[String]) -> Option<String>;

    /// Account the cloud CLI is currently authenticated as
    fn active_account(&self) -> Option<String>;

    /// Project configured as the cloud CLI default, if any
    fn default_project(&self) -> Option<String>;
}

/// Description of an existing cluster as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub name: String,
    pub status: String,
    pub endpoint: Option<String>,
}

#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// Look up the cluster named by `target`; `Ok(None)` when it does not exist
    async fn describe(&self, target: &DeploymentTarget) -> Result<Option<ClusterInfo>, BackendError>;

    /// Create the cluster and block until the provider reports completion
    async fn create(
        &self,
        target: &DeploymentTarget,
        descriptor: &ClusterDescriptor,
    ) -> Result<(), BackendError>;

    /// Fetch credentials for the cluster and return the client context name
    async fn activate_credentials(&self, target: &DeploymentTarget) -> Result<String, BackendError>;
}

/// Operations against one cluster's control plane
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Existence check only; secret contents are never fetched
    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool, BackendError>;

    /// Idempotent upsert of a single manifest
    async fn apply(&self, manifest: &Manifest) -> Result<(), BackendError>;

    /// Replica counts of a workload; `Ok(None)` while it is not visible yet
    async fn workload_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkloadStatus>, BackendError>;
}

/// Opens a control-plane session for an active cluster
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        handle: &ActiveClusterHandle,
    ) -> Result<Box<dyn ControlPlane>, BackendError>;
}
