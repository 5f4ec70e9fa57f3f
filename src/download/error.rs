use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::BatchReport;
use crate::drive::RemoteAccessError;

/// Local filesystem failures while provisioning a directory or writing a
/// downloaded file.
#[derive(Debug, Error)]
pub enum FilesystemError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} exists and is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single download job failed.
///
/// `is_retryable()` separates transient remote failures from permanent ones
/// so the retry loop can give up early.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Remote(#[from] RemoteAccessError),

    #[error(transparent)]
    Filesystem(#[from] FilesystemError),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Batch deadline passed before the download started")]
    DeadlineExceeded,
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Remote(e) => e.is_retryable(),
            FetchError::Filesystem(_) => false,
            FetchError::Timeout(_) => false,
            FetchError::DeadlineExceeded => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Remote(e) if e.is_auth())
    }
}

/// A failed job, tied back to the entry it was fetching.
#[derive(Debug)]
pub struct JobFailure {
    pub entry_id: String,
    pub name: String,
    pub error: FetchError,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.entry_id, self.error)
    }
}

/// Every job of a batch reached a terminal state and at least one failed.
///
/// `failures` is in completion order, so the first element is the first
/// failure observed.
#[derive(Debug, Error)]
#[error(
    "{failed} of {attempted} downloads failed in {dir}; first failure: {first}",
    failed = .failures.len(),
    attempted = .report.attempted(),
    dir = .directory.display(),
    first = first_failure(.failures)
)]
pub struct DownloadError {
    pub directory: PathBuf,
    pub report: BatchReport,
    pub failures: Vec<JobFailure>,
}

impl DownloadError {
    /// Any failure came from Drive rejecting the credential.
    pub fn is_auth(&self) -> bool {
        self.failures.iter().any(|f| f.error.is_auth())
    }
}

fn first_failure(failures: &[JobFailure]) -> String {
    failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "none".to_string())
}
