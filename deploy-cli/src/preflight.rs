//! Environment validation before any mutating call
//!
//! Checks that the cloud CLI, the cluster CLI and an authenticated cloud
//! identity are available. Probes are read-only and never retried: a missing
//! binary is a fact about the host, not a transient condition.

use crate::backend::Prober;
use crate::error::{DeployError, Result};
use regex::Regex;
use semver::{Version, VersionReq};
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::debug;

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"v?(\d+\.\d+\.\d+)").expect("version regex is valid"));

/// A capability the pipeline needs from the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// A binary on `PATH`, optionally with a minimum version
    Binary {
        name: String,
        requirement: Option<String>,
        version_args: Vec<String>,
        install_hint: String,
    },
    /// The cloud CLI has an active, authenticated account
    CloudAuth,
}

impl Capability {
    pub fn binary(name: &str, install_hint: &str) -> Self {
        Capability::Binary {
            name: name.to_string(),
            requirement: None,
            version_args: vec!["--version".to_string()],
            install_hint: install_hint.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Capability::Binary { name, .. } => name,
            Capability::CloudAuth => "gcloud auth",
        }
    }

    fn hint(&self) -> String {
        match self {
            Capability::Binary { install_hint, .. } => install_hint.clone(),
            Capability::CloudAuth => {
                "run `gcloud auth login` (or activate a service account)".to_string()
            }
        }
    }
}

/// Capabilities needed to drive a GKE deployment
pub fn default_requirements() -> Vec<Capability> {
    vec![
        Capability::binary(
            "gcloud",
            "install the Google Cloud SDK: https://cloud.google.com/sdk/docs/install",
        ),
        Capability::CloudAuth,
        Capability::Binary {
            name: "kubectl".to_string(),
            requirement: Some(">=1.25.0".to_string()),
            version_args: vec!["version".to_string(), "--client".to_string()],
            install_hint: "gcloud components install kubectl".to_string(),
        },
        Capability::binary(
            "gke-gcloud-auth-plugin",
            "gcloud components install gke-gcloud-auth-plugin",
        ),
    ]
}

/// Result of probing a single capability
#[derive(Debug, Clone)]
pub struct CapabilityCheck {
    pub capability: Capability,
    pub found: bool,
    pub detail: Option<String>,
    pub meets_requirement: bool,
    pub path: Option<PathBuf>,
}

impl CapabilityCheck {
    pub fn satisfied(&self) -> bool {
        self.found && self.meets_requirement
    }
}

/// Overall prerequisite check result, in declaration order
#[derive(Debug, Clone)]
pub struct PrereqResult {
    pub checks: Vec<CapabilityCheck>,
}

impl PrereqResult {
    pub fn all_met(&self) -> bool {
        self.checks.iter().all(CapabilityCheck::satisfied)
    }

    pub fn missing(&self) -> Vec<&CapabilityCheck> {
        self.checks.iter().filter(|c| !c.satisfied()).collect()
    }

    /// Fail with the first unmet capability
    pub fn require_all(&self) -> Result<()> {
        let Some(check) = self.checks.iter().find(|c| !c.satisfied()) else {
            return Ok(());
        };

        let capability = match (&check.capability, &check.detail) {
            (Capability::Binary { requirement: Some(req), .. }, Some(installed))
                if check.found =>
            {
                format!("{} {} (installed: {})", check.capability.name(), req, installed)
            }
            _ => check.capability.name().to_string(),
        };

        Err(DeployError::MissingPrerequisite {
            capability,
            hint: check.capability.hint(),
        })
    }
}

/// Extract a semantic version from version output
///   "Google Cloud SDK 470.0.0" -> "470.0.0"
///   "Client Version: v1.30.2" -> "1.30.2"
fn extract_version(output: &str) -> Option<String> {
    VERSION_RE
        .captures(output)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

fn version_meets_requirement(installed: &str, requirement: &str) -> bool {
    match (
        Version::parse(installed.trim()),
        VersionReq::parse(requirement.trim()),
    ) {
        (Ok(version), Ok(req)) => req.matches(&version),
        _ => false,
    }
}

fn check_capability(capability: &Capability, prober: &dyn Prober) -> CapabilityCheck {
    match capability {
        Capability::Binary {
            name,
            requirement,
            version_args,
            ..
        } => {
            let path = prober.find_binary(name);
            let found = path.is_some();

            let (detail, meets_requirement) = if found {
                let version = prober
                    .version_output(name, version_args)
                    .and_then(|out| extract_version(&out));
                match (version, requirement) {
                    (Some(v), Some(req)) => {
                        let meets = version_meets_requirement(&v, req);
                        (Some(v), meets)
                    }
                    (Some(v), None) => (Some(v), true),
                    // Found but version unknown - assume OK
                    (None, _) => (Some("unknown".to_string()), true),
                }
            } else {
                (None, false)
            };

            CapabilityCheck {
                capability: capability.clone(),
                found,
                detail,
                meets_requirement,
                path,
            }
        }
        Capability::CloudAuth => {
            let account = prober.active_account().filter(|a| !a.trim().is_empty());
            CapabilityCheck {
                capability: capability.clone(),
                found: account.is_some(),
                meets_requirement: account.is_some(),
                detail: account,
                path: None,
            }
        }
    }
}

/// Probe every capability; never short-circuits so the report is complete
pub fn check_prerequisites(requirements: &[Capability], prober: &dyn Prober) -> PrereqResult {
    let checks = requirements
        .iter()
        .map(|capability| {
            let check = check_capability(capability, prober);
            debug!(
                capability = capability.name(),
                found = check.found,
                path = ?check.path,
                detail = check.detail.as_deref().unwrap_or("-"),
                "probed prerequisite"
            );
            check
        })
        .collect();

    PrereqResult { checks }
}

/// Print prerequisite checks in the same layout as the run summary
pub fn print_checks(result: &PrereqResult) {
    println!("📋 Prerequisites:");
    for check in &result.checks {
        let status = if check.satisfied() {
            "✅"
        } else if check.found {
            "⚠️"
        } else {
            "❌"
        };
        match &check.detail {
            Some(detail) => match &check.path {
                Some(path) => println!(
                    "  {} {} ({}, {})",
                    status,
                    check.capability.name(),
                    detail,
                    path.display()
                ),
                None => println!("  {} {} ({})", status, check.capability.name(), detail),
            },
            None => println!("  {} {} (missing)", status, check.capability.name()),
        }
    }
}
