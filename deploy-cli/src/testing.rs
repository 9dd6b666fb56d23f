//! In-memory fakes for the backend traits, with recorded call traces

use crate::backend::{
    BackendError, ClusterInfo, ClusterProvider, Connector, ControlPlane, Prober,
};
use crate::manifests::{Manifest, ManifestKind};
use crate::rollout::WorkloadStatus;
use crate::target::{ActiveClusterHandle, ClusterDescriptor, DeploymentTarget};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct FakeProber {
    binaries: HashMap<String, String>,
    account: Option<String>,
    project: Option<String>,
}

impl FakeProber {
    pub fn complete() -> Self {
        let binaries = [
            ("gcloud", "Google Cloud SDK 470.0.0"),
            ("kubectl", "Client Version: v1.30.2"),
            ("gke-gcloud-auth-plugin", "Kubernetes v1.30.0+3dd8a9a"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            binaries,
            account: Some("ops@example.com".to_string()),
            project: Some("p1".to_string()),
        }
    }

    pub fn without_binary(mut self, name: &str) -> Self {
        self.binaries.remove(name);
        self
    }

    pub fn with_binary(mut self, name: &str, version_output: &str) -> Self {
        self.binaries
            .insert(name.to_string(), version_output.to_string());
        self
    }

    pub fn without_account(mut self) -> Self {
        self.account = None;
        self
    }

    pub fn with_project(mut self, project: Option<&str>) -> Self {
        self.project = project.map(str::to_string);
        self
    }
}

impl Prober for FakeProber {
    fn find_binary(&self, name: &str) -> Option<PathBuf> {
        self.binaries
            .contains_key(name)
            .then(|| PathBuf::from(format!("/usr/bin/{name}")))
    }

    fn version_output(&self, name: &str, _args: &[String]) -> Option<String> {
        self.binaries.get(name).cloned()
    }

    fn active_account(&self) -> Option<String> {
        self.account.clone()
    }

    fn default_project(&self) -> Option<String> {
        self.project.clone()
    }
}

/// Cloud provider holding clusters in memory
#[derive(Debug, Default)]
pub struct FakeProvider {
    clusters: Mutex<HashSet<(String, String)>>,
    calls: Mutex<Vec<String>>,
    describe_error: Option<BackendError>,
    create_error: Option<BackendError>,
}

impl FakeProvider {
    pub fn with_cluster(self, cluster: &str, zone: &str) -> Self {
        self.clusters
            .lock()
            .unwrap()
            .insert((cluster.to_string(), zone.to_string()));
        self
    }

    pub fn failing_describe(mut self, err: BackendError) -> Self {
        self.describe_error = Some(err);
        self
    }

    pub fn failing_create(mut self, err: BackendError) -> Self {
        self.create_error = Some(err);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.lock().unwrap().len()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ClusterProvider for FakeProvider {
    async fn describe(&self, target: &DeploymentTarget) -> Result<Option<ClusterInfo>, BackendError> {
        self.record(format!("describe {}", target.cluster));
        if let Some(err) = &self.describe_error {
            return Err(err.clone());
        }
        let key = (target.cluster.clone(), target.zone.clone());
        Ok(self
            .clusters
            .lock()
            .unwrap()
            .contains(&key)
            .then(|| ClusterInfo {
                name: target.cluster.clone(),
                status: "RUNNING".to_string(),
                endpoint: Some("10.0.0.1".to_string()),
            }))
    }

    async fn create(
        &self,
        target: &DeploymentTarget,
        descriptor: &ClusterDescriptor,
    ) -> Result<(), BackendError> {
        self.record(format!(
            "create {} nodes={}",
            target.cluster, descriptor.node_count
        ));
        if let Some(err) = &self.create_error {
            return Err(err.clone());
        }
        let inserted = self
            .clusters
            .lock()
            .unwrap()
            .insert((target.cluster.clone(), target.zone.clone()));
        if inserted {
            Ok(())
        } else {
            Err(BackendError::failed("Already exists: cluster"))
        }
    }

    async fn activate_credentials(&self, target: &DeploymentTarget) -> Result<String, BackendError> {
        self.record(format!("credentials {}", target.cluster));
        Ok(target.kube_context())
    }
}

/// Calls observed by [`FakePlane`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaneCall {
    SecretExists(String, String),
    Apply(ManifestKind, String),
    Status(String),
    Connect(String),
}

/// Control plane holding resources in memory
#[derive(Debug, Default)]
pub struct FakePlane {
    secrets: HashSet<(String, String)>,
    resources: Mutex<BTreeMap<(String, String, String), serde_json::Value>>,
    changes: Mutex<usize>,
    calls: Mutex<Vec<PlaneCall>>,
    fail_apply: Option<ManifestKind>,
    statuses: Mutex<VecDeque<Option<WorkloadStatus>>>,
}

impl FakePlane {
    pub fn with_secret(mut self, namespace: &str, name: &str) -> Self {
        self.secrets
            .insert((namespace.to_string(), name.to_string()));
        self
    }

    pub fn failing_apply(mut self, kind: ManifestKind) -> Self {
        self.fail_apply = Some(kind);
        self
    }

    /// Status sequence returned by successive polls; the last entry repeats
    pub fn with_statuses(self, statuses: &[(u32, u32)]) -> Self {
        *self.statuses.lock().unwrap() = statuses
            .iter()
            .map(|&(ready, desired)| Some(WorkloadStatus { desired, ready }))
            .collect();
        self
    }

    pub fn calls(&self) -> Vec<PlaneCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn applied(&self) -> Vec<(ManifestKind, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlaneCall::Apply(kind, name) => Some((kind, name)),
                _ => None,
            })
            .collect()
    }

    pub fn status_polls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, PlaneCall::Status(_)))
            .count()
    }

    /// Kubeconfig contexts the plane was reached through
    pub fn connected(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlaneCall::Connect(context) => Some(context),
                _ => None,
            })
            .collect()
    }

    /// Number of applies that changed stored state
    pub fn changes(&self) -> usize {
        *self.changes.lock().unwrap()
    }

    fn record(&self, call: PlaneCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ControlPlane for FakePlane {
    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool, BackendError> {
        self.record(PlaneCall::SecretExists(
            namespace.to_string(),
            name.to_string(),
        ));
        Ok(self
            .secrets
            .contains(&(namespace.to_string(), name.to_string())))
    }

    async fn apply(&self, manifest: &Manifest) -> Result<(), BackendError> {
        self.record(PlaneCall::Apply(manifest.kind, manifest.name.clone()));
        if self.fail_apply == Some(manifest.kind) {
            return Err(BackendError::failed("admission webhook denied the request"));
        }
        let key = (
            manifest.kind.to_string(),
            manifest.namespace.clone(),
            manifest.name.clone(),
        );
        let previous = self
            .resources
            .lock()
            .unwrap()
            .insert(key, manifest.body.clone());
        if previous.as_ref() != Some(&manifest.body) {
            *self.changes.lock().unwrap() += 1;
        }
        Ok(())
    }

    async fn workload_status(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<WorkloadStatus>, BackendError> {
        self.record(PlaneCall::Status(name.to_string()));
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            Ok(statuses.pop_front().flatten())
        } else {
            Ok(statuses.front().copied().flatten())
        }
    }
}

#[async_trait]
impl ControlPlane for Arc<FakePlane> {
    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool, BackendError> {
        self.as_ref().secret_exists(namespace, name).await
    }

    async fn apply(&self, manifest: &Manifest) -> Result<(), BackendError> {
        self.as_ref().apply(manifest).await
    }

    async fn workload_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkloadStatus>, BackendError> {
        self.as_ref().workload_status(namespace, name).await
    }
}

/// Connector handing out a shared [`FakePlane`]
pub struct FakeConnector {
    plane: Arc<FakePlane>,
}

impl FakeConnector {
    pub fn new(plane: Arc<FakePlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        handle: &ActiveClusterHandle,
    ) -> Result<Box<dyn ControlPlane>, BackendError> {
        self.plane
            .record(PlaneCall::Connect(handle.context().to_string()));
        Ok(Box::new(Arc::clone(&self.plane)))
    }
}

/// Build a manifest without going through YAML
pub fn manifest(kind: ManifestKind, name: &str) -> Manifest {
    let body = serde_json::json!({
        "apiVersion": kind.api_version(),
        "kind": kind.to_string(),
        "metadata": { "name": name, "namespace": "default" },
    });
    Manifest {
        kind,
        name: name.to_string(),
        namespace: "default".to_string(),
        source: PathBuf::from(format!("{name}.yaml")),
        body,
    }
}
