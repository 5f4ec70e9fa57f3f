//! gdrive-dl: mirrors a Google Drive project folder holding one subfolder
//! per patient into a local directory tree, downloading each patient's files
//! with a bounded pool of concurrent chunked transfers. Files already on disk
//! are skipped, so reruns pick up where an interrupted run stopped.

#![warn(clippy::all)]

mod auth;
mod cli;
mod config;
mod download;
mod drive;
pub mod retry;
mod shutdown;
mod sync;
mod types;

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Per-request cap. Each request moves at most one chunk.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

fn build_http_client() -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()?;
    Ok(client)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let config = config::Config::from_cli(cli)?;
    tracing::debug!(?config, "Resolved configuration");

    let client = build_http_client()?;
    let credential = auth::load_credential(&config.token_file, &client).await?;

    if config.auth_only {
        tracing::info!(
            "Authentication completed successfully; token valid until {}",
            credential
                .expiry()
                .map(|e| e.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string())
        );
        return Ok(());
    }

    let sessions = auth::RefreshingSessions::new(
        client,
        credential,
        config.token_file.clone(),
        config.chunk_size,
    );

    if config.list_patients {
        let project_folder = config
            .project_folder
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--project-folder is required"))?;
        let session = drive::SessionSource::session(&sessions).await?;
        let patients = sync::list_patients(session.as_ref(), project_folder).await?;
        println!("Patient folders:");
        for patient in &patients {
            println!("  {}  ({})", patient.name, patient.id);
        }
        return Ok(());
    }

    let sync_config = config.sync_config()?;
    tracing::info!(
        concurrency = config.concurrency,
        root = %sync_config.root.display(),
        "Starting gdrive-dl"
    );

    let shutdown_token = shutdown::install_signal_handler()?;
    let summary = sync::run_sync(&sessions, &sync_config, &shutdown_token).await?;
    summary.log(config.dry_run);

    if summary.interrupted {
        anyhow::bail!("Interrupted by shutdown; rerun to fetch the remaining files");
    }
    if summary.has_failures() {
        anyhow::bail!(
            "{} of {} patients incomplete; rerun to fetch the missing files",
            summary.failed_patients.len(),
            summary.patients_total
        );
    }

    Ok(())
}
