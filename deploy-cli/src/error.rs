//! Error taxonomy for the deployment pipeline
//!
//! Every variant renders the entity involved plus a remediation hint, and
//! [`DeployError::stage`] names the pipeline stage that raised it. None of
//! these are recovered from inside the pipeline: the documented recovery is
//! to fix the cause and re-run the whole thing.

use crate::manifests::ManifestKind;
use snafu::Snafu;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub type Result<T, E = DeployError> = std::result::Result<T, E>;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Config,
    Preflight,
    Cluster,
    Secret,
    Manifests,
    Rollout,
    Access,
}

impl Stage {
    /// Stages run by `deploy run`, in order
    pub const PIPELINE: [Stage; 6] = [
        Stage::Preflight,
        Stage::Cluster,
        Stage::Secret,
        Stage::Manifests,
        Stage::Rollout,
        Stage::Access,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Preflight => "validate-environment",
            Stage::Cluster => "ensure-cluster",
            Stage::Secret => "require-secret",
            Stage::Manifests => "apply-manifests",
            Stage::Rollout => "verify-rollout",
            Stage::Access => "report-access",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DeployError {
    #[snafu(display("missing prerequisite '{capability}'\n  hint: {hint}"))]
    MissingPrerequisite { capability: String, hint: String },

    #[snafu(display(
        "authentication failed while accessing {entity}: {message}\n  hint: check `gcloud auth list` and the IAM roles of the active account"
    ))]
    AuthenticationFailure {
        stage: Stage,
        entity: String,
        message: String,
    },

    #[snafu(display(
        "provisioning cluster '{cluster}' in {zone} failed: {message}\n  hint: check project quota and regional capacity, then re-run; the existence check makes re-running safe"
    ))]
    TransientProvisioning {
        cluster: String,
        zone: String,
        message: String,
    },

    #[snafu(display(
        "cluster '{cluster}' not found in {zone} (project '{project}')\n  hint: run `deploy ensure-cluster` or `deploy run` to create it"
    ))]
    ClusterNotFound {
        project: String,
        cluster: String,
        zone: String,
    },

    #[snafu(display("secret '{namespace}/{name}' does not exist\n  hint: {remediation}"))]
    MissingSecret {
        namespace: String,
        name: String,
        remediation: String,
    },

    #[snafu(display(
        "failed to apply {kind} '{name}': {cause}\n  hint: fix the manifest or cluster permissions and re-run; apply is idempotent"
    ))]
    ManifestApply {
        kind: ManifestKind,
        name: String,
        cause: String,
    },

    #[snafu(display(
        "rollout of '{workload}' timed out after {}s with {ready}/{desired} replicas ready\n  hint: inspect `kubectl describe deployment/{workload}` and `kubectl logs deployment/{workload}`",
        elapsed.as_secs()
    ))]
    RolloutTimeout {
        workload: String,
        desired: u32,
        ready: u32,
        elapsed: Duration,
    },

    #[snafu(display("invalid manifest {}: {reason}", path.display()))]
    InvalidManifest { path: PathBuf, reason: String },

    #[snafu(display("invalid configuration: {reason}"))]
    InvalidConfig { reason: String },

    #[snafu(display("{operation} failed: {message}"))]
    ControlPlane {
        stage: Stage,
        operation: String,
        message: String,
    },

    #[snafu(display("interrupted during {stage}\n  hint: re-run the pipeline; every stage is idempotent"))]
    Interrupted { stage: Stage },
}

impl DeployError {
    /// The stage that detected the failure
    pub fn stage(&self) -> Stage {
        match self {
            DeployError::MissingPrerequisite { .. } => Stage::Preflight,
            DeployError::TransientProvisioning { .. } | DeployError::ClusterNotFound { .. } => {
                Stage::Cluster
            }
            DeployError::MissingSecret { .. } => Stage::Secret,
            DeployError::ManifestApply { .. } | DeployError::InvalidManifest { .. } => {
                Stage::Manifests
            }
            DeployError::RolloutTimeout { .. } => Stage::Rollout,
            DeployError::InvalidConfig { .. } => Stage::Config,
            DeployError::AuthenticationFailure { stage, .. }
            | DeployError::ControlPlane { stage, .. }
            | DeployError::Interrupted { stage } => *stage,
        }
    }

    /// Process exit code for this failure class
    pub fn exit_code(&self) -> u8 {
        match self {
            DeployError::MissingPrerequisite { .. } => 2,
            DeployError::AuthenticationFailure { .. } => 3,
            DeployError::TransientProvisioning { .. } | DeployError::ClusterNotFound { .. } => 4,
            DeployError::MissingSecret { .. } => 5,
            DeployError::ManifestApply { .. } => 6,
            DeployError::RolloutTimeout { .. } => 7,
            DeployError::InvalidManifest { .. } | DeployError::InvalidConfig { .. } => 8,
            DeployError::ControlPlane { .. } => 1,
            DeployError::Interrupted { .. } => 130,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_secret_names_remediation() {
        let err = DeployError::MissingSecret {
            namespace: "default".to_string(),
            name: "app-secrets".to_string(),
            remediation: "run scripts/create-secrets.sh".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("default/app-secrets"));
        assert!(msg.contains("scripts/create-secrets.sh"));
        assert_eq!(err.stage(), Stage::Secret);
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_rollout_timeout_reports_counts() {
        let err = DeployError::RolloutTimeout {
            workload: "wl".to_string(),
            desired: 3,
            ready: 1,
            elapsed: Duration::from_secs(300),
        };
        let msg = err.to_string();
        assert!(msg.contains("1/3"));
        assert!(msg.contains("300s"));
        assert_eq!(err.stage(), Stage::Rollout);
    }

    #[test]
    fn test_every_failure_is_nonzero() {
        let errors = vec![
            DeployError::MissingPrerequisite {
                capability: "gcloud".to_string(),
                hint: "install it".to_string(),
            },
            DeployError::InvalidConfig {
                reason: "bad".to_string(),
            },
            DeployError::Interrupted {
                stage: Stage::Rollout,
            },
        ];

        for err in errors {
            assert_ne!(err.exit_code(), 0, "{err}");
        }
    }

    #[test]
    fn test_stage_names() {
        let names: Vec<_> = Stage::PIPELINE.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "validate-environment",
                "ensure-cluster",
                "require-secret",
                "apply-manifests",
                "verify-rollout",
                "report-access",
            ]
        );
    }
}
