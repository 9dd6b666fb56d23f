use clap::Parser;
use deploy_cli::DeployError;
use deploy_cli::commands::{Cli, handle_deploy_command};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries the operator-facing report, logs go to stderr
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at the next stage boundary");
            cancel_on_signal.cancel();
        }
    });

    match handle_deploy_command(cli, cancel).await {
        Ok(()) => {
            info!("done");
            ExitCode::SUCCESS
        }
        Err(err) => match err.downcast_ref::<DeployError>() {
            Some(deploy_err) => {
                eprintln!("❌ stage '{}' failed: {deploy_err}", deploy_err.stage());
                ExitCode::from(deploy_err.exit_code())
            }
            None => {
                eprintln!("❌ {err:#}");
                ExitCode::FAILURE
            }
        },
    }
}
