//! Walks the project folder patient by patient: provision the local
//! directory, list the patient's files, hand them to the batch downloader.
//! A failing patient is logged and skipped; an authentication failure ends
//! the run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::auth::error::AuthError;
use crate::download::error::{DownloadError, FilesystemError};
use crate::download::{self, paths, BatchReport, DownloadConfig};
use crate::drive::{self, DriveSession, ListFilter, RemoteAccessError, RemoteEntry, SessionSource};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub root: PathBuf,
    pub project_folder_id: String,
    /// Restrict the run to these patient folder names. Empty means all.
    pub patients: Vec<String>,
    pub file_filter: ListFilter,
    pub download: DownloadConfig,
}

/// Why one patient could not be synced completely.
#[derive(Debug, Error)]
pub enum PatientError {
    #[error("Could not prepare local directory: {0}")]
    Provision(#[from] FilesystemError),

    #[error("Could not list patient folder: {0}")]
    Listing(#[from] RemoteAccessError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl PatientError {
    pub fn is_auth(&self) -> bool {
        match self {
            PatientError::Provision(_) => false,
            PatientError::Listing(e) => e.is_auth(),
            PatientError::Download(e) => e.is_auth(),
            PatientError::Auth(_) => true,
        }
    }
}

/// Totals over all patients of a run.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub patients_total: usize,
    pub patients_synced: usize,
    pub failed_patients: Vec<String>,
    pub downloaded: usize,
    pub bytes: u64,
    pub skipped_existing: usize,
    pub failed_files: usize,
    pub not_started: usize,
    pub would_download: usize,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl SyncSummary {
    fn record(&mut self, report: &BatchReport) {
        self.downloaded += report.downloaded;
        self.bytes += report.bytes;
        self.skipped_existing += report.skipped_existing;
        self.failed_files += report.failed;
        self.not_started += report.not_started;
        self.would_download += report.would_download;
    }

    /// Some patient is not fully mirrored, either because it failed or
    /// because shutdown cut the run short.
    pub fn has_failures(&self) -> bool {
        !self.failed_patients.is_empty() || self.interrupted
    }

    pub fn log(&self, dry_run: bool) {
        if dry_run {
            tracing::info!("── Dry Run Summary ──");
            tracing::info!(
                "  {} files would be downloaded across {} patients",
                self.would_download,
                self.patients_total
            );
            tracing::info!("  {} already present", self.skipped_existing);
            return;
        }

        tracing::info!("── Summary ──");
        tracing::info!(
            "  patients: {} synced, {} failed, {} total",
            self.patients_synced,
            self.failed_patients.len(),
            self.patients_total
        );
        tracing::info!(
            "  files: {} downloaded ({} bytes), {} already present, {} failed",
            self.downloaded,
            self.bytes,
            self.skipped_existing,
            self.failed_files
        );
        if self.interrupted || self.not_started > 0 {
            tracing::info!(
                "  interrupted by shutdown; {} files not started",
                self.not_started
            );
        }
        tracing::info!("  elapsed: {}", download::format_duration(self.elapsed));
        for name in &self.failed_patients {
            tracing::warn!("  incomplete: {}", name);
        }
    }
}

/// Patient folders directly under the project folder, sorted by name.
pub async fn list_patients(
    session: &dyn DriveSession,
    project_folder_id: &str,
) -> Result<Vec<RemoteEntry>, RemoteAccessError> {
    let mut patients =
        drive::list_entries(session, project_folder_id, ListFilter::FoldersOnly).await?;
    patients.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(patients)
}

/// Keep the folders named in `requested`, warning about names that do not
/// exist remotely. An empty request keeps everything.
fn select_patients(patients: Vec<RemoteEntry>, requested: &[String]) -> Vec<RemoteEntry> {
    if requested.is_empty() {
        return patients;
    }
    for name in requested {
        if !patients.iter().any(|p| &p.name == name) {
            tracing::warn!("No patient folder named {:?} in the project folder", name);
        }
    }
    patients
        .into_iter()
        .filter(|p| requested.contains(&p.name))
        .collect()
}

/// Sync every selected patient folder into `config.root`.
///
/// Returns `Err` only when the run had to stop: the project folder could
/// not be listed, or Drive rejected the credential. Per-patient failures are
/// recorded in the summary.
pub async fn run_sync(
    sessions: &dyn SessionSource,
    config: &SyncConfig,
    shutdown: &CancellationToken,
) -> anyhow::Result<SyncSummary> {
    let started = Instant::now();

    let session = sessions.session().await?;
    let patients = list_patients(session.as_ref(), &config.project_folder_id)
        .await
        .with_context(|| {
            format!(
                "Failed to list patient folders in {}",
                config.project_folder_id
            )
        })?;
    let patients = select_patients(patients, &config.patients);
    tracing::info!("Found {} patient folders", patients.len());

    let mut summary = SyncSummary {
        patients_total: patients.len(),
        ..SyncSummary::default()
    };

    for patient in &patients {
        if shutdown.is_cancelled() {
            tracing::info!("Shutdown requested, stopping before {}", patient.name);
            summary.interrupted = true;
            break;
        }

        let result = match sessions.session().await {
            Ok(session) => sync_patient(session, patient, config, shutdown).await,
            Err(e) => Err(PatientError::Auth(e)),
        };

        match result {
            Ok(report) if report.not_started > 0 => {
                tracing::warn!(
                    not_started = report.not_started,
                    "Patient {} interrupted by shutdown",
                    patient.name
                );
                summary.record(&report);
                summary.interrupted = true;
                summary.failed_patients.push(patient.name.clone());
            }
            Ok(report) => {
                tracing::info!(
                    downloaded = report.downloaded,
                    skipped = report.skipped_existing,
                    "Patient {} done",
                    patient.name
                );
                summary.record(&report);
                summary.patients_synced += 1;
            }
            Err(err) => {
                if let PatientError::Download(e) = &err {
                    summary.record(&e.report);
                }
                if err.is_auth() {
                    return Err(anyhow::Error::new(err)
                        .context(format!("Authentication failed while syncing {}", patient.name)));
                }
                tracing::error!("Patient {} incomplete: {}", patient.name, err);
                summary.failed_patients.push(patient.name.clone());
            }
        }
    }

    summary.elapsed = started.elapsed();
    Ok(summary)
}

async fn sync_patient(
    session: Arc<dyn DriveSession>,
    patient: &RemoteEntry,
    config: &SyncConfig,
    shutdown: &CancellationToken,
) -> Result<BatchReport, PatientError> {
    let directory = paths::patient_directory(&config.root, &patient.name);
    // A dry run leaves the local tree untouched.
    if !config.download.dry_run {
        paths::ensure_directory(&directory).await?;
    }

    let mut entries =
        drive::list_entries(session.as_ref(), &patient.id, config.file_filter).await?;
    tracing::debug!(count = entries.len(), "Listed {}", patient.name);
    entries.retain(|entry| {
        if !entry.has_content() {
            tracing::warn!(
                mime_type = %entry.mime_type,
                "Skipping {} in {}: Drive-native document, nothing to download",
                entry.name,
                patient.name
            );
        }
        entry.has_content()
    });

    let report =
        download::download_all(session, &directory, entries, &config.download, shutdown).await?;
    Ok(report)
}
