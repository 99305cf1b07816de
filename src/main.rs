//! gha-allowlist command line
//!
//! ```bash
//! # One-shot resync of the selected-actions policy
//! gha-allowlist -c gha-allowlist.yaml sync
//!
//! # Show the payload without pushing it
//! gha-allowlist sync --dry-run
//!
//! # Watch the commit feed and resync on every document change
//! gha-allowlist watch
//!
//! # Write the resolved allowlist as YAML
//! gha-allowlist convert -o actions.yml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};

use gha_allowlist::config::AllowlistConfig;
use gha_allowlist::resolve::{DockerHubClient, GitHubClient};
use gha_allowlist::sync::{GitHubPolicyBoundary, PolicySynchronizer, RunMode, SyncCycle};
use gha_allowlist::watch::{ChangeWatcher, PubSubFeed};
use gha_allowlist::{logging, source};

#[derive(Parser)]
#[command(name = "gha-allowlist")]
#[command(version)]
#[command(about = "Resolve approved action patterns and sync the org selected-actions policy")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, env = "GHA_ALLOWLIST_CONFIG", default_value = "gha-allowlist.yaml")]
    config: PathBuf,

    /// Raise log verbosity (repeatable)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the document and push it once
    Sync {
        /// Print the payload instead of pushing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Resync whenever the approved-pattern document changes
    Watch,

    /// Resolve the document and write the allowlist YAML
    Convert {
        /// Output file (stdout if not provided)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn build_cycle(config: &AllowlistConfig) -> anyhow::Result<SyncCycle> {
    let document = source::from_config(config)?;
    let code_host = Arc::new(GitHubClient::from_config(config)?);
    let registry = Arc::new(DockerHubClient::from_config(config)?);
    let boundary = Arc::new(GitHubPolicyBoundary::from_config(config)?);
    let synchronizer = PolicySynchronizer::from_config(config, boundary);
    Ok(SyncCycle::new(config, document, code_host, registry, synchronizer))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AllowlistConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init(&config.logging, cli.verbose)?;

    tracing::info!(
        organization = %config.organization,
        project = %config.source.project,
        document = %config.source.path,
        "Configuration loaded"
    );

    let cycle = build_cycle(&config)?;

    match cli.command {
        Commands::Sync { dry_run } => {
            let mode = if dry_run { RunMode::DryRun } else { RunMode::Push };
            let outcome = cycle.run(mode).await?;
            if dry_run {
                println!("{}", serde_json::to_string_pretty(&outcome.update)?);
            }
        }
        Commands::Watch => {
            let feed = PubSubFeed::from_config(&config)?;
            let mut watcher = ChangeWatcher::new(
                Box::new(feed),
                Duration::from_secs(config.pubsub.reconnect_secs),
            );
            watcher.run(&cycle, shutdown_signal()).await;
        }
        Commands::Convert { output } => {
            let (allowlist, report) = cycle.build_allowlist().await?;
            let yaml = allowlist.to_yaml()?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, yaml)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    tracing::info!(
                        path = %path.display(),
                        sources = allowlist.len(),
                        skipped = report.skipped(),
                        "Wrote allowlist"
                    );
                }
                None => print!("{}", yaml),
            }
        }
    }

    Ok(())
}
