//! Layered configuration: built-in defaults, then `deploy.toml`, then
//! command-line flags and their `DEPLOY_*` environment variables.

use crate::access::AccessReport;
use crate::backend::Prober;
use crate::error::{DeployError, Result};
use crate::manifests::{ManifestKind, ManifestSet};
use crate::rollout::RolloutPolicy;
use crate::secrets::SecretRef;
use crate::target::{ClusterDescriptor, DeploymentTarget};
use clap::Args;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "deploy.toml";
pub const DEFAULT_APP: &str = "open-deep-research";
pub const DEFAULT_PORT: u16 = 2024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
    pub project: Option<String>,
    pub cluster: String,
    pub zone: String,
    pub namespace: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            project: None,
            cluster: format!("{DEFAULT_APP}-cluster"),
            zone: "us-central1-a".to_string(),
            namespace: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecretConfig {
    pub name: String,
    /// Defaults to the target namespace
    pub namespace: Option<String>,
    pub required_keys: Vec<String>,
    pub remediation: Option<String>,
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            name: format!("{DEFAULT_APP}-secrets"),
            namespace: None,
            required_keys: Vec::new(),
            remediation: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManifestConfig {
    pub dir: PathBuf,
    /// Image reference injected into the workload's first container
    pub image: Option<String>,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("k8s"),
            image: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RolloutConfig {
    /// Defaults to the workload found in the manifest set
    pub workload: Option<String>,
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        let policy = RolloutPolicy::default();
        Self {
            workload: None,
            timeout_secs: policy.timeout.as_secs(),
            interval_secs: policy.interval.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessConfig {
    /// Defaults to the endpoint found in the manifest set
    pub service: Option<String>,
    /// Defaults to the endpoint's first port
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    pub target: TargetConfig,
    pub cluster: ClusterDescriptor,
    pub secret: SecretConfig,
    pub manifests: ManifestConfig,
    pub rollout: RolloutConfig,
    pub access: AccessConfig,
}

/// Command-line overrides; each flag falls back to a `DEPLOY_*` variable
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Cloud project identifier (default: gcloud's configured project)
    #[arg(long, env = "DEPLOY_PROJECT", global = true)]
    pub project: Option<String>,

    /// Cluster name
    #[arg(long, env = "DEPLOY_CLUSTER", global = true)]
    pub cluster: Option<String>,

    /// Cluster zone
    #[arg(long, env = "DEPLOY_ZONE", global = true)]
    pub zone: Option<String>,

    /// Namespace for manifests without one and for the secret
    #[arg(long, env = "DEPLOY_NAMESPACE", global = true)]
    pub namespace: Option<String>,

    /// Container image reference for the workload
    #[arg(long, env = "DEPLOY_IMAGE", global = true)]
    pub image: Option<String>,

    /// Directory holding the manifests
    #[arg(long, env = "DEPLOY_MANIFESTS", global = true)]
    pub manifests: Option<PathBuf>,

    /// Name of the secret bundle the workload consumes
    #[arg(long, env = "DEPLOY_SECRET", global = true)]
    pub secret: Option<String>,

    /// Rollout timeout in seconds
    #[arg(long, env = "DEPLOY_ROLLOUT_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

impl DeployConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| DeployError::InvalidConfig {
            reason: e.to_string(),
        })
    }

    /// Read an explicit config file, or `deploy.toml` if present, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    debug!("no {DEFAULT_CONFIG_FILE}, using built-in defaults");
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path).map_err(|e| DeployError::InvalidConfig {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        debug!(path = %path.display(), "loaded config file");
        toml::from_str(&content).map_err(|e: toml::de::Error| DeployError::InvalidConfig {
            reason: format!("{}: {e}", path.display()),
        })
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(project) = &overrides.project {
            self.target.project = Some(project.clone());
        }
        if let Some(cluster) = &overrides.cluster {
            self.target.cluster.clone_from(cluster);
        }
        if let Some(zone) = &overrides.zone {
            self.target.zone.clone_from(zone);
        }
        if let Some(namespace) = &overrides.namespace {
            self.target.namespace.clone_from(namespace);
        }
        if let Some(image) = &overrides.image {
            self.manifests.image = Some(image.clone());
        }
        if let Some(dir) = &overrides.manifests {
            self.manifests.dir.clone_from(dir);
        }
        if let Some(secret) = &overrides.secret {
            self.secret.name.clone_from(secret);
        }
        if let Some(timeout) = overrides.timeout {
            self.rollout.timeout_secs = timeout;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rollout.timeout_secs == 0 || self.rollout.interval_secs == 0 {
            return Err(DeployError::InvalidConfig {
                reason: "rollout timeout and interval must be positive".to_string(),
            });
        }
        if self.secret.name.trim().is_empty() {
            return Err(DeployError::InvalidConfig {
                reason: "secret name must not be empty".to_string(),
            });
        }
        self.cluster.validate()
    }

    /// Resolve the deployment target, asking the cloud CLI for its default
    /// project when none was configured
    pub fn resolve_target(&self, prober: &dyn Prober) -> DeploymentTarget {
        let project = self
            .target
            .project
            .clone()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| prober.default_project())
            .unwrap_or_default();
        DeploymentTarget::new(project, &self.target.cluster, &self.target.zone)
    }

    /// The secret bundle, looked up in the namespace the workload runs in.
    ///
    /// A pod can only consume secrets from its own namespace, so an explicit
    /// `secret.namespace` that disagrees with the workload is rejected.
    pub fn secret_ref(&self, set: &ManifestSet) -> Result<SecretRef> {
        let workload_namespace = self.workload(set).ok().map(|(namespace, _)| namespace);

        let namespace = match (&self.secret.namespace, workload_namespace) {
            (Some(configured), Some(workload)) if *configured != workload => {
                return Err(DeployError::InvalidConfig {
                    reason: format!(
                        "secret namespace '{configured}' differs from workload namespace '{workload}'"
                    ),
                });
            }
            (Some(configured), _) => configured.clone(),
            (None, Some(workload)) => workload,
            (None, None) => self.target.namespace.clone(),
        };

        Ok(SecretRef {
            namespace,
            name: self.secret.name.clone(),
            required_keys: self.secret.required_keys.clone(),
            remediation: self.secret.remediation.clone(),
        })
    }

    pub fn rollout_policy(&self) -> RolloutPolicy {
        RolloutPolicy {
            timeout: Duration::from_secs(self.rollout.timeout_secs),
            interval: Duration::from_secs(self.rollout.interval_secs),
        }
    }

    pub fn manifests_dir(&self) -> PathBuf {
        let raw = self.manifests.dir.to_string_lossy();
        PathBuf::from(shellexpand::tilde(&raw).into_owned())
    }

    pub fn load_manifests(&self) -> Result<ManifestSet> {
        ManifestSet::load(
            &self.manifests_dir(),
            &self.target.namespace,
            self.manifests.image.as_deref(),
        )
    }

    /// Workload whose rollout gates success
    pub fn workload(&self, set: &ManifestSet) -> Result<(String, String)> {
        if let Some(name) = &self.rollout.workload {
            let namespace = set
                .iter()
                .find(|m| m.kind == ManifestKind::Workload && &m.name == name)
                .map_or_else(|| self.target.namespace.clone(), |m| m.namespace.clone());
            return Ok((namespace, name.clone()));
        }
        set.first_of(ManifestKind::Workload)
            .map(|m| (m.namespace.clone(), m.name.clone()))
            .ok_or_else(|| DeployError::InvalidConfig {
                reason: "manifest set has no Deployment and no rollout.workload is configured"
                    .to_string(),
            })
    }

    /// Access instructions, preferring what the manifests declare
    pub fn access_report(&self, set: &ManifestSet, context: Option<&str>) -> AccessReport {
        let endpoint = set.first_of(ManifestKind::Endpoint);
        let workload = set.first_of(ManifestKind::Workload);

        AccessReport {
            namespace: endpoint
                .or(workload)
                .map_or_else(|| self.target.namespace.clone(), |m| m.namespace.clone()),
            workload: self
                .rollout
                .workload
                .clone()
                .or_else(|| workload.map(|m| m.name.clone()))
                .unwrap_or_else(|| DEFAULT_APP.to_string()),
            service: self
                .access
                .service
                .clone()
                .or_else(|| endpoint.map(|m| m.name.clone()))
                .unwrap_or_else(|| DEFAULT_APP.to_string()),
            port: self
                .access
                .port
                .or_else(|| endpoint.and_then(|m| m.service_port()))
                .unwrap_or(DEFAULT_PORT),
            context: context.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProber, manifest};

    #[test]
    fn test_defaults() {
        let config = DeployConfig::default();
        assert_eq!(config.target.cluster, "open-deep-research-cluster");
        assert_eq!(config.target.namespace, "default");
        assert_eq!(config.secret.name, "open-deep-research-secrets");
        assert_eq!(config.rollout.timeout_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_then_overrides() {
        let mut config = DeployConfig::from_toml_str(
            r#"
[target]
project = "from-file"
zone = "europe-west1-b"

[cluster]
node_count = 3
max_nodes = 6

[secret]
required_keys = ["OPENAI_API_KEY"]

[rollout]
timeout_secs = 120
"#,
        )
        .unwrap();

        assert_eq!(config.cluster.node_count, 3);
        assert_eq!(config.cluster.min_nodes, 1);
        assert_eq!(config.target.cluster, "open-deep-research-cluster");

        config.apply_overrides(&Overrides {
            project: Some("from-flag".to_string()),
            timeout: Some(60),
            ..Overrides::default()
        });

        assert_eq!(config.target.project.as_deref(), Some("from-flag"));
        assert_eq!(config.target.zone, "europe-west1-b");
        assert_eq!(config.rollout_policy().timeout, Duration::from_secs(60));
        let secret = config.secret_ref(&ManifestSet::default()).unwrap();
        assert_eq!(secret.required_keys, vec!["OPENAI_API_KEY"]);
        assert_eq!(secret.namespace, "default");
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = DeployConfig::from_toml_str("[target]\nregion = \"x\"\n").unwrap_err();
        assert!(matches!(err, DeployError::InvalidConfig { .. }));
    }

    #[test]
    fn test_project_falls_back_to_cloud_cli() {
        let config = DeployConfig::default();
        let target = config.resolve_target(&FakeProber::complete().with_project(Some("cli-proj")));
        assert_eq!(target.project, "cli-proj");

        let target = config.resolve_target(&FakeProber::complete().with_project(None));
        assert!(target.validate().is_err());
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        let mut config = DeployConfig::default();
        config.rollout.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_workload_and_access_from_manifests() {
        let set = ManifestSet::new(vec![
            manifest(ManifestKind::Config, "cfg"),
            manifest(ManifestKind::Endpoint, "ep"),
            manifest(ManifestKind::Workload, "wl"),
        ]);
        let config = DeployConfig::default();

        assert_eq!(
            config.workload(&set).unwrap(),
            ("default".to_string(), "wl".to_string())
        );
        let access = config.access_report(&set, None);
        assert_eq!(access.workload, "wl");
        assert_eq!(access.service, "ep");
        assert_eq!(access.port, DEFAULT_PORT);

        let no_workload = ManifestSet::new(vec![manifest(ManifestKind::Config, "cfg")]);
        assert!(config.workload(&no_workload).is_err());
    }

    #[test]
    fn test_secret_follows_workload_namespace() {
        let mut workload = manifest(ManifestKind::Workload, "wl");
        workload.namespace = "research".to_string();
        let set = ManifestSet::new(vec![workload]);

        let mut config = DeployConfig::default();
        assert_eq!(config.secret_ref(&set).unwrap().namespace, "research");

        config.secret.namespace = Some("research".to_string());
        assert_eq!(config.secret_ref(&set).unwrap().namespace, "research");

        config.secret.namespace = Some("default".to_string());
        let err = config.secret_ref(&set).unwrap_err();
        assert!(matches!(err, DeployError::InvalidConfig { .. }));
        assert!(err.to_string().contains("'research'"));
    }
}
