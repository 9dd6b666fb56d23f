//! Deploy subcommands
//!
//! `run` drives the whole pipeline. The remaining subcommands each run one
//! stage against an already existing cluster, which is handy when
//! re-checking a single step after fixing its cause.

use crate::commands::Cli;
use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::gcloud::SystemProber;
use crate::manifests::{ManifestSet, apply_all};
use crate::pipeline::{Backends, DeployOutcome, Pipeline, RunRecord};
use crate::preflight::{check_prerequisites, default_requirements, print_checks};
use crate::provisioner::ClusterProvisioner;
use crate::report::write_report;
use crate::rollout::verify_rollout;
use crate::secrets::require_secret;
use anyhow::Result;
use clap::Subcommand;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Subcommand, Clone)]
pub enum DeployCommands {
    /// Run every stage: preflight, cluster, secret, manifests, rollout, access
    #[command(alias = "up")]
    Run {
        /// Also write a toon run report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Check local tools and cloud authentication only
    Validate,

    /// Create the cluster if absent and activate its credentials
    EnsureCluster,

    /// Check that the secret bundle exists in the cluster
    RequireSecret,

    /// Apply the manifest set to an existing cluster
    Apply,

    /// Wait for a workload to become ready
    VerifyRollout {
        /// Workload name (default: the Deployment in the manifest set)
        workload: Option<String>,
    },

    /// Print access instructions without touching the cluster
    ReportAccess {
        #[arg(long)]
        workload: Option<String>,

        #[arg(long)]
        service: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Show the order manifests would be applied in
    Plan,
}

/// Handle deploy commands
pub async fn handle_deploy_command(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let mut config = DeployConfig::load(cli.config.as_deref())?;
    config.apply_overrides(&cli.overrides);
    config.validate()?;
    debug!(?config, "resolved configuration");

    match cli.command {
        DeployCommands::Run { report } => run_pipeline(config, report, &cancel).await,
        DeployCommands::Validate => validate_only(&config),
        DeployCommands::EnsureCluster => ensure_cluster_only(&config).await,
        DeployCommands::RequireSecret => require_secret_only(&config).await,
        DeployCommands::Apply => apply_only(&config).await,
        DeployCommands::VerifyRollout { workload } => {
            verify_only(config, workload, &cancel).await
        }
        DeployCommands::ReportAccess {
            workload,
            service,
            port,
        } => report_access_only(config, workload, service, port),
        DeployCommands::Plan => plan_only(&config),
    }
}

async fn run_pipeline(
    config: DeployConfig,
    report: Option<PathBuf>,
    cancel: &CancellationToken,
) -> Result<()> {
    println!("🚀 deploy: promoting the service");
    println!();

    let manifests = config.load_manifests()?;
    println!(
        "📦 Loaded {} manifest(s) from {}",
        manifests.len(),
        config.manifests_dir().display()
    );

    let pipeline = Pipeline::new(config, manifests, Backends::system());
    let record = pipeline.run_recorded(cancel).await;

    for stage in &record.completed {
        println!("  ✅ {stage}");
    }

    let outcome = finish_run(record, report.as_deref())?;

    println!();
    if outcome.handle.created() {
        println!("✨ Created cluster {}", outcome.handle.target());
    } else {
        println!("ℹ️  Reused cluster {}", outcome.handle.target());
    }
    for applied in &outcome.applied {
        println!("  📄 {} {}/{}", applied.kind, applied.namespace, applied.name);
    }
    println!(
        "✅ Rollout ready ({}) after {}s",
        outcome.rollout.status,
        outcome.rollout.elapsed.as_secs()
    );
    println!();
    println!("{}", outcome.access);

    Ok(())
}

/// Writes the optional run report, then hands back the pipeline result.
/// A report that cannot be written is logged and never masks the stage
/// failure that decides the exit code.
fn finish_run(record: RunRecord, report: Option<&Path>) -> Result<DeployOutcome, DeployError> {
    if let Some(path) = report {
        match write_report(&record, path) {
            Ok(written) => println!("📄 Report written to: {}", written.display()),
            Err(err) => warn!(path = %path.display(), "failed to write run report: {err:#}"),
        }
    }
    record.result
}

fn validate_only(config: &DeployConfig) -> Result<()> {
    let prober = SystemProber;
    let result = check_prerequisites(&default_requirements(), &prober);
    print_checks(&result);
    result.require_all()?;

    let target = config.resolve_target(&prober);
    target.validate()?;
    println!();
    println!("🎯 Target: {target} (context {})", target.kube_context());
    Ok(())
}

async fn ensure_cluster_only(config: &DeployConfig) -> Result<()> {
    let backends = Backends::system();
    let target = config.resolve_target(backends.prober.as_ref());

    println!("☸️  Ensuring cluster {target}...");
    let handle = ClusterProvisioner::new(backends.provider.as_ref())
        .ensure_cluster(&target, &config.cluster)
        .await?;

    if handle.created() {
        println!("✨ Created cluster, context {}", handle.context());
    } else {
        println!("ℹ️  Cluster already existed, context {}", handle.context());
    }
    Ok(())
}

async fn require_secret_only(config: &DeployConfig) -> Result<()> {
    let secret = config.secret_ref(&load_manifests_if_present(config)?)?;
    let (_handle, plane) = Backends::system().bind(config).await?;

    require_secret(plane.as_ref(), &secret).await?;
    println!("🔐 Secret {}/{} present", secret.namespace, secret.name);
    Ok(())
}

async fn apply_only(config: &DeployConfig) -> Result<()> {
    let manifests = config.load_manifests()?;
    let secret = config.secret_ref(&manifests)?;
    let (handle, plane) = Backends::system().bind(config).await?;

    // the secret gate still holds when manifests are applied on their own
    require_secret(plane.as_ref(), &secret).await?;

    println!("📄 Applying {} manifest(s) to {}...", manifests.len(), handle.context());
    for applied in apply_all(plane.as_ref(), &manifests).await? {
        println!("  ✅ {} {}/{}", applied.kind, applied.namespace, applied.name);
    }
    Ok(())
}

async fn verify_only(
    config: DeployConfig,
    workload: Option<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    let (namespace, workload) = match workload {
        Some(name) => (config.target.namespace.clone(), name),
        None => config.workload(&config.load_manifests()?)?,
    };
    let (_handle, plane) = Backends::system().bind(&config).await?;

    println!("⏳ Waiting for {namespace}/{workload}...");
    let outcome = verify_rollout(
        plane.as_ref(),
        &namespace,
        &workload,
        config.rollout_policy(),
        cancel,
    )
    .await?;
    println!(
        "✅ {workload} ready ({}) after {} poll(s)",
        outcome.status, outcome.polls
    );
    Ok(())
}

fn report_access_only(
    mut config: DeployConfig,
    workload: Option<String>,
    service: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let manifests = load_manifests_if_present(&config)?;

    if workload.is_some() {
        config.rollout.workload = workload;
    }
    if service.is_some() {
        config.access.service = service;
    }
    if port.is_some() {
        config.access.port = port;
    }

    let report = config.access_report(&manifests, None);
    println!("{report}");
    Ok(())
}

fn plan_only(config: &DeployConfig) -> Result<()> {
    let manifests = config.load_manifests()?;

    println!("📋 Apply order for {}:", config.manifests_dir().display());
    for (index, entry) in manifests.plan().iter().enumerate() {
        println!("  {}. {entry}", index + 1);
    }
    Ok(())
}

/// Access instructions work without a manifest directory; they fall back
/// to the configured or default names
fn load_manifests_if_present(config: &DeployConfig) -> Result<ManifestSet, DeployError> {
    if config.manifests_dir().is_dir() {
        config.load_manifests()
    } else {
        debug!("no manifest directory, using configured names");
        Ok(ManifestSet::default())
    }
}
