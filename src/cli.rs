use clap::Parser;

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "gdrive-dl",
    version,
    about = "Download per-patient image folders from Google Drive"
)]
pub struct Cli {
    /// Local root directory; each patient gets a subdirectory
    #[arg(short = 'd', long, env = "GDRIVE_DL_DIRECTORY")]
    pub directory: Option<String>,

    /// Drive id of the project folder holding one folder per patient
    #[arg(short = 'f', long, env = "GDRIVE_DL_PROJECT_FOLDER")]
    pub project_folder: Option<String>,

    /// Maximum number of files downloaded at the same time
    #[arg(
        short = 'c',
        long,
        env = "GDRIVE_DL_CONCURRENCY",
        default_value_t = 20,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub concurrency: u16,

    /// OAuth token file (Google authorized-user JSON)
    #[arg(long, env = "GDRIVE_DL_TOKEN_FILE", default_value = "~/.gdrive-dl/token.json")]
    pub token_file: String,

    /// Only sync these patient folders (repeatable)
    #[arg(short = 'p', long = "patient")]
    pub patients: Vec<String>,

    /// Only download files whose MIME type is image/*
    #[arg(long)]
    pub images_only: bool,

    /// Bytes requested per ranged read
    #[arg(long, default_value_t = 8 * 1024 * 1024, value_parser = clap::value_parser!(u64).range(1..))]
    pub chunk_size: u64,

    /// Retries per file for transient errors (429, 5xx, dropped connections)
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,

    /// Base delay in seconds between retries (doubles each attempt)
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,

    /// Give up on a single file after this many seconds
    #[arg(long)]
    pub job_timeout: Option<u64>,

    /// Give up on the files of one patient after this many seconds
    #[arg(long)]
    pub batch_deadline: Option<u64>,

    /// List what would be downloaded without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,

    /// Print the patient folders of the project folder and exit
    #[arg(short = 'l', long)]
    pub list_patients: bool,

    /// Only load and refresh the token, then exit
    #[arg(long)]
    pub auth_only: bool,

    /// Log level
    #[arg(long, value_enum, env = "GDRIVE_DL_LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,
}
