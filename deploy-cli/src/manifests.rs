//! Manifest loading, dependency ordering and application
//!
//! A manifest set is always applied config → endpoint → workload, no matter
//! the order files were found in. The workload reads the config at startup
//! and the endpoint selects the workload's pods, so applying out of order
//! would leave a partially wired topology behind on failure.

use crate::backend::ControlPlane;
use crate::error::{DeployError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Resource kinds the applier understands, in dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ManifestKind {
    /// `ConfigMap`
    Config,
    /// `Service`
    Endpoint,
    /// `Deployment`
    Workload,
}

impl ManifestKind {
    pub fn from_api_kind(kind: &str) -> Option<Self> {
        match kind {
            "ConfigMap" => Some(ManifestKind::Config),
            "Service" => Some(ManifestKind::Endpoint),
            "Deployment" => Some(ManifestKind::Workload),
            _ => None,
        }
    }

    pub fn api_kind(self) -> &'static str {
        match self {
            ManifestKind::Config => "ConfigMap",
            ManifestKind::Endpoint => "Service",
            ManifestKind::Workload => "Deployment",
        }
    }

    pub fn api_version(self) -> &'static str {
        match self {
            ManifestKind::Config | ManifestKind::Endpoint => "v1",
            ManifestKind::Workload => "apps/v1",
        }
    }
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_kind())
    }
}

/// One declarative resource definition
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub kind: ManifestKind,
    pub name: String,
    pub namespace: String,
    pub source: PathBuf,
    pub body: Value,
}

impl Manifest {
    /// Parse a single document; fills in the namespace and, for workloads,
    /// the first container image when one is given
    pub fn from_document(
        mut body: Value,
        source: &Path,
        namespace: &str,
        image: Option<&str>,
    ) -> Result<Self> {
        let invalid = |reason: String| DeployError::InvalidManifest {
            path: source.to_path_buf(),
            reason,
        };

        let api_kind = body
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing `kind`".to_string()))?;
        let kind = ManifestKind::from_api_kind(api_kind).ok_or_else(|| {
            invalid(format!(
                "unsupported kind `{api_kind}` (expected ConfigMap, Service or Deployment)"
            ))
        })?;
        let name = body
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| invalid("missing `metadata.name`".to_string()))?
            .to_string();

        let declared = body
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .map(str::to_string);
        let namespace = match declared {
            Some(ns) => ns,
            None => {
                if let Some(meta) = body.get_mut("metadata").and_then(Value::as_object_mut) {
                    meta.insert("namespace".to_string(), Value::from(namespace));
                }
                namespace.to_string()
            }
        };

        if let (ManifestKind::Workload, Some(image)) = (kind, image) {
            let container = body
                .pointer_mut("/spec/template/spec/containers/0")
                .and_then(Value::as_object_mut)
                .ok_or_else(|| invalid("deployment has no containers".to_string()))?;
            container.insert("image".to_string(), Value::from(image));
        }

        Ok(Self {
            kind,
            name,
            namespace,
            source: source.to_path_buf(),
            body,
        })
    }

    /// First port of an endpoint
    pub fn service_port(&self) -> Option<u16> {
        if self.kind != ManifestKind::Endpoint {
            return None;
        }
        self.body
            .pointer("/spec/ports/0/port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
    }
}

/// Entry of an ordered plan: a manifest and the one applied right before
/// its kind's dependencies are satisfied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub kind: ManifestKind,
    pub name: String,
    pub namespace: String,
    pub predecessor: Option<(ManifestKind, String)>,
}

impl fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)?;
        if let Some((kind, name)) = &self.predecessor {
            write!(f, " (after {kind} {name})")?;
        }
        Ok(())
    }
}

/// Manifests sorted into dependency order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestSet {
    manifests: Vec<Manifest>,
}

impl ManifestSet {
    /// Stable-sorts by kind; files of the same kind keep their input order
    pub fn new(mut manifests: Vec<Manifest>) -> Self {
        manifests.sort_by_key(|m| m.kind);
        Self { manifests }
    }

    /// Load every `*.yaml`/`*.yml` file in `dir`, in file-name order
    pub fn load(dir: &Path, namespace: &str, image: Option<&str>) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| DeployError::InvalidManifest {
            path: dir.to_path_buf(),
            reason: format!("cannot read manifest directory: {e}"),
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && matches!(
                        path.extension().and_then(|e| e.to_str()),
                        Some("yaml" | "yml")
                    )
            })
            .collect();
        files.sort();

        let mut manifests = Vec::new();
        for file in &files {
            manifests.extend(load_file(file, namespace, image)?);
        }

        if manifests.is_empty() {
            return Err(DeployError::InvalidManifest {
                path: dir.to_path_buf(),
                reason: "no manifests found".to_string(),
            });
        }

        debug!(count = manifests.len(), dir = %dir.display(), "loaded manifests");
        Ok(Self::new(manifests))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Manifest> {
        self.manifests.iter()
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    pub fn first_of(&self, kind: ManifestKind) -> Option<&Manifest> {
        self.manifests.iter().find(|m| m.kind == kind)
    }

    /// Ordered plan with each entry's dependency predecessor
    pub fn plan(&self) -> Vec<PlanEntry> {
        let mut plan = Vec::with_capacity(self.manifests.len());
        let mut last_of_lower_kind: Option<&Manifest> = None;
        let mut last_seen: Option<&Manifest> = None;

        for manifest in &self.manifests {
            if let Some(prev) = last_seen {
                if prev.kind != manifest.kind {
                    last_of_lower_kind = Some(prev);
                }
            }
            plan.push(PlanEntry {
                kind: manifest.kind,
                name: manifest.name.clone(),
                namespace: manifest.namespace.clone(),
                predecessor: last_of_lower_kind.map(|p| (p.kind, p.name.clone())),
            });
            last_seen = Some(manifest);
        }
        plan
    }
}

fn load_file(path: &Path, namespace: &str, image: Option<&str>) -> Result<Vec<Manifest>> {
    let content = std::fs::read_to_string(path).map_err(|e| DeployError::InvalidManifest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut manifests = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&content) {
        let value = Value::deserialize(document).map_err(|e| DeployError::InvalidManifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if value.is_null() {
            continue;
        }
        manifests.push(Manifest::from_document(value, path, namespace, image)?);
    }
    Ok(manifests)
}

/// A manifest that was accepted by the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedManifest {
    pub kind: ManifestKind,
    pub name: String,
    pub namespace: String,
}

/// Apply every manifest in dependency order, stopping at the first failure
pub async fn apply_all(plane: &dyn ControlPlane, set: &ManifestSet) -> Result<Vec<AppliedManifest>> {
    let mut applied = Vec::with_capacity(set.len());

    for manifest in set.iter() {
        plane
            .apply(manifest)
            .await
            .map_err(|e| DeployError::ManifestApply {
                kind: manifest.kind,
                name: manifest.name.clone(),
                cause: e.to_string(),
            })?;

        info!(
            kind = %manifest.kind,
            name = %manifest.name,
            namespace = %manifest.namespace,
            "applied manifest"
        );
        applied.push(AppliedManifest {
            kind: manifest.kind,
            name: manifest.name.clone(),
            namespace: manifest.namespace.clone(),
        });
    }

    Ok(applied)
}
