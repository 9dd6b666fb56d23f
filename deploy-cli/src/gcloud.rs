//! Host-side backends that shell out to `gcloud` and friends

use crate::backend::{BackendError, ClusterInfo, ClusterProvider, Prober};
use crate::target::{ClusterDescriptor, DeploymentTarget};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

/// Captured result of a finished command
#[derive(Debug)]
struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

fn run_captured(program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
    debug!(program, args = %args.join(" "), "running command");
    let output = duct::cmd(program, args)
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()?;
    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

const AUTH_MARKERS: &[&str] = &[
    "permission_denied",
    "permission denied",
    "permission(s)",
    "does not have permission",
    "unauthenticated",
    "reauthentication",
    "refreshing your current auth tokens",
    "gcloud auth login",
    "invalid_grant",
    "do not currently have an active account",
    "(403)",
    "(401)",
];

/// Capacity problems are reported as 403 too but are not about identity
const CAPACITY_MARKERS: &[&str] = &["quota", "exhausted"];

/// Map gcloud stderr onto the backend error classes
fn classify_failure(stderr: &str) -> BackendError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();

    if CAPACITY_MARKERS.iter().any(|m| lower.contains(m)) {
        return BackendError::Failed { message };
    }
    let missing_iam = lower.contains("code=403") && lower.contains("required \"");
    if missing_iam || AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
        BackendError::Unauthorized { message }
    } else {
        BackendError::Failed { message }
    }
}

fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("not found") || lower.contains("notfound") || lower.contains("(404)")
}

fn is_already_exists(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("already exists") || lower.contains("(409)")
}

fn location_args(target: &DeploymentTarget) -> Vec<String> {
    vec![
        "--project".to_string(),
        target.project.clone(),
        "--zone".to_string(),
        target.zone.clone(),
    ]
}

fn describe_args(target: &DeploymentTarget) -> Vec<String> {
    let mut args = vec![
        "container".to_string(),
        "clusters".to_string(),
        "describe".to_string(),
        target.cluster.clone(),
    ];
    args.extend(location_args(target));
    args.push("--format=json".to_string());
    args
}

fn create_args(target: &DeploymentTarget, descriptor: &ClusterDescriptor) -> Vec<String> {
    let mut args = vec![
        "container".to_string(),
        "clusters".to_string(),
        "create".to_string(),
        target.cluster.clone(),
    ];
    args.extend(location_args(target));
    args.extend([
        format!("--num-nodes={}", descriptor.node_count),
        "--enable-autoscaling".to_string(),
        format!("--min-nodes={}", descriptor.min_nodes),
        format!("--max-nodes={}", descriptor.max_nodes),
        format!("--machine-type={}", descriptor.machine_type),
        format!("--disk-size={}", descriptor.disk_size_gb),
        "--quiet".to_string(),
    ]);
    args
}

fn credentials_args(target: &DeploymentTarget) -> Vec<String> {
    let mut args = vec![
        "container".to_string(),
        "clusters".to_string(),
        "get-credentials".to_string(),
        target.cluster.clone(),
    ];
    args.extend(location_args(target));
    args
}

#[derive(Debug, Deserialize)]
struct DescribeOutput {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    endpoint: Option<String>,
}

/// GKE clusters managed through the `gcloud` CLI
#[derive(Debug, Clone)]
pub struct GkeProvider {
    program: String,
}

impl Default for GkeProvider {
    fn default() -> Self {
        Self {
            program: "gcloud".to_string(),
        }
    }
}

impl GkeProvider {
    async fn gcloud(&self, args: Vec<String>) -> Result<CommandOutput, BackendError> {
        let program = self.program.clone();
        tokio::task::spawn_blocking(move || run_captured(&program, &args))
            .await
            .map_err(|e| BackendError::failed(format!("gcloud task failed: {e}")))?
            .map_err(|e| BackendError::failed(format!("failed to execute gcloud: {e}")))
    }
}

#[async_trait]
impl ClusterProvider for GkeProvider {
    async fn describe(&self, target: &DeploymentTarget) -> Result<Option<ClusterInfo>, BackendError> {
        let output = self.gcloud(describe_args(target)).await?;
        if !output.success {
            if is_not_found(&output.stderr) {
                return Ok(None);
            }
            return Err(classify_failure(&output.stderr));
        }

        let parsed: DescribeOutput = serde_json::from_str(&output.stdout)
            .map_err(|e| BackendError::failed(format!("unexpected describe output: {e}")))?;
        Ok(Some(ClusterInfo {
            name: parsed.name,
            status: parsed.status,
            endpoint: parsed.endpoint,
        }))
    }

    async fn create(
        &self,
        target: &DeploymentTarget,
        descriptor: &ClusterDescriptor,
    ) -> Result<(), BackendError> {
        let output = self.gcloud(create_args(target, descriptor)).await?;
        if output.success {
            return Ok(());
        }
        // Lost a race with another operator: the cluster now exists, which
        // is what we wanted.
        if is_already_exists(&output.stderr) {
            debug!(cluster = %target.cluster, "cluster appeared concurrently");
            return Ok(());
        }
        Err(classify_failure(&output.stderr))
    }

    async fn activate_credentials(&self, target: &DeploymentTarget) -> Result<String, BackendError> {
        let output = self.gcloud(credentials_args(target)).await?;
        if !output.success {
            return Err(classify_failure(&output.stderr));
        }
        Ok(target.kube_context())
    }
}

/// Probes the real host
#[derive(Debug, Clone, Default)]
pub struct SystemProber;

impl SystemProber {
    fn stdout_of(program: &str, args: &[String]) -> Option<String> {
        let output = run_captured(program, args).ok()?;
        output.success.then(|| output.stdout.trim().to_string())
    }
}

impl Prober for SystemProber {
    fn find_binary(&self, name: &str) -> Option<PathBuf> {
        Self::stdout_of("which", &[name.to_string()])
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    fn version_output(&self, name: &str, args: &[String]) -> Option<String> {
        let output = duct::cmd(name, args)
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked()
            .run()
            .ok()?;
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn active_account(&self) -> Option<String> {
        let args = [
            "auth",
            "list",
            "--filter=status:ACTIVE",
            "--format=value(account)",
        ]
        .map(String::from);
        Self::stdout_of("gcloud", &args)
            .and_then(|out| out.lines().next().map(str::to_string))
            .filter(|a| !a.is_empty())
    }

    fn default_project(&self) -> Option<String> {
        let args = ["config", "get-value", "project"].map(String::from);
        Self::stdout_of("gcloud", &args).filter(|p| !p.is_empty() && p != "(unset)")
    }
}
