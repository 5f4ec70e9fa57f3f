use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::download::DownloadConfig;
use crate::drive::ListFilter;
use crate::retry::RetryConfig;
use crate::sync::SyncConfig;
use crate::types::LogLevel;

/// Application configuration, resolved from the command line once at
/// startup.
#[derive(Debug)]
pub struct Config {
    pub directory: Option<PathBuf>,
    pub project_folder: Option<String>,
    pub token_file: PathBuf,
    pub patients: Vec<String>,

    pub chunk_size: u64,
    pub job_timeout: Option<Duration>,
    pub batch_deadline: Option<Duration>,
    pub retry: RetryConfig,
    pub concurrency: usize,

    pub log_level: LogLevel,

    pub images_only: bool,
    pub dry_run: bool,
    pub no_progress_bar: bool,
    pub list_patients: bool,
    pub auth_only: bool,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(cli: crate::cli::Cli) -> anyhow::Result<Self> {
        let directory = cli.directory.map(|d| expand_tilde(&d));
        let project_folder = cli.project_folder.filter(|id| !id.trim().is_empty());

        if !cli.auth_only {
            if project_folder.is_none() {
                anyhow::bail!("--project-folder is required (or set GDRIVE_DL_PROJECT_FOLDER)");
            }
            if !cli.list_patients && directory.is_none() {
                anyhow::bail!("--directory is required (or set GDRIVE_DL_DIRECTORY)");
            }
        }

        let base_delay = Duration::from_secs(cli.retry_delay);
        let retry = RetryConfig {
            max_retries: cli.max_retries,
            base_delay,
            max_delay: RetryConfig::default().max_delay.max(base_delay),
        };

        Ok(Self {
            directory,
            project_folder,
            token_file: expand_tilde(&cli.token_file),
            patients: cli.patients,
            chunk_size: cli.chunk_size,
            job_timeout: cli.job_timeout.map(Duration::from_secs),
            batch_deadline: cli.batch_deadline.map(Duration::from_secs),
            retry,
            concurrency: usize::from(cli.concurrency),
            log_level: cli.log_level,
            images_only: cli.images_only,
            dry_run: cli.dry_run,
            no_progress_bar: cli.no_progress_bar,
            list_patients: cli.list_patients,
            auth_only: cli.auth_only,
        })
    }

    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            concurrency: self.concurrency,
            retry: self.retry,
            job_timeout: self.job_timeout,
            batch_deadline: self.batch_deadline,
            dry_run: self.dry_run,
            no_progress_bar: self.no_progress_bar,
        }
    }

    pub fn sync_config(&self) -> anyhow::Result<SyncConfig> {
        let root = self.directory.clone().context("No download directory configured")?;
        let project_folder_id = self
            .project_folder
            .clone()
            .context("No project folder configured")?;
        Ok(SyncConfig {
            root,
            project_folder_id,
            patients: self.patients.clone(),
            file_filter: if self.images_only {
                ListFilter::ImagesOnly
            } else {
                ListFilter::FilesOnly
            },
            download: self.download_config(),
        })
    }
}
