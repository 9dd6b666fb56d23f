//! Deployment target, cluster descriptor and the active-cluster handle

use crate::error::{DeployError, Result};
use serde::Deserialize;
use std::fmt;

/// Identifies the control-plane endpoint for one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTarget {
    pub project: String,
    pub cluster: String,
    pub zone: String,
}

impl DeploymentTarget {
    pub fn new(
        project: impl Into<String>,
        cluster: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            cluster: cluster.into(),
            zone: zone.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.project.trim().is_empty() {
            return Err(DeployError::MissingPrerequisite {
                capability: "project identifier".to_string(),
                hint: "pass --project, set DEPLOY_PROJECT or run `gcloud config set project <id>`"
                    .to_string(),
            });
        }
        if self.cluster.trim().is_empty() || self.zone.trim().is_empty() {
            return Err(DeployError::InvalidConfig {
                reason: "cluster name and zone must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Kubeconfig context name written by `gcloud container clusters get-credentials`
    pub fn kube_context(&self) -> String {
        format!("gke_{}_{}_{}", self.project, self.zone, self.cluster)
    }
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.zone, self.cluster)
    }
}

/// Baseline topology used when a cluster has to be created
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterDescriptor {
    pub node_count: u32,
    pub min_nodes: u32,
    pub max_nodes: u32,
    pub machine_type: String,
    pub disk_size_gb: u32,
}

impl Default for ClusterDescriptor {
    fn default() -> Self {
        Self {
            node_count: 2,
            min_nodes: 1,
            max_nodes: 5,
            machine_type: "e2-standard-2".to_string(),
            disk_size_gb: 50,
        }
    }
}

impl ClusterDescriptor {
    pub fn validate(&self) -> Result<()> {
        let reason = if self.min_nodes > self.max_nodes {
            format!(
                "autoscale range is empty: min_nodes {} > max_nodes {}",
                self.min_nodes, self.max_nodes
            )
        } else if !(self.min_nodes..=self.max_nodes).contains(&self.node_count) {
            format!(
                "node_count {} is outside the autoscale range [{}, {}]",
                self.node_count, self.min_nodes, self.max_nodes
            )
        } else if self.machine_type.trim().is_empty() {
            "machine_type must not be empty".to_string()
        } else if self.disk_size_gb == 0 {
            "disk_size_gb must be positive".to_string()
        } else {
            return Ok(());
        };
        Err(DeployError::InvalidConfig { reason })
    }
}

/// Proof that cluster credentials are active for a target.
///
/// Only the provisioner hands these out; every later stage takes one
/// explicitly instead of reading an ambient "current context".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveClusterHandle {
    target: DeploymentTarget,
    context: String,
    created: bool,
}

impl ActiveClusterHandle {
    pub(crate) fn new(target: DeploymentTarget, context: String, created: bool) -> Self {
        Self {
            target,
            context,
            created,
        }
    }

    pub fn target(&self) -> &DeploymentTarget {
        &self.target
    }

    /// Kubeconfig context bound to the target cluster
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Whether this run created the cluster
    pub fn created(&self) -> bool {
        self.created
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_project_is_missing_prerequisite() {
        let target = DeploymentTarget::new("", "c1", "z1");
        let err = target.validate().unwrap_err();
        assert!(matches!(err, DeployError::MissingPrerequisite { .. }));
    }

    #[test]
    fn test_kube_context_follows_gke_convention() {
        let target = DeploymentTarget::new("p1", "c1", "z1");
        assert_eq!(target.kube_context(), "gke_p1_z1_c1");
        assert_eq!(target.to_string(), "p1/z1/c1");
    }

    #[test]
    fn test_descriptor_defaults() {
        let d = ClusterDescriptor::default();
        assert_eq!(d.node_count, 2);
        assert_eq!((d.min_nodes, d.max_nodes), (1, 5));
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_descriptor_rejects_inverted_bounds() {
        let d = ClusterDescriptor {
            min_nodes: 4,
            max_nodes: 2,
            ..ClusterDescriptor::default()
        };
        assert!(matches!(
            d.validate(),
            Err(DeployError::InvalidConfig { .. })
        ));

        let d = ClusterDescriptor {
            node_count: 9,
            ..ClusterDescriptor::default()
        };
        assert!(d.validate().is_err());
    }
}
