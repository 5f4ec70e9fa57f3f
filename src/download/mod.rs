//! Batch downloader: filters a patient's listing against what is already on
//! disk, then fetches the rest with bounded concurrency. Every job runs to a
//! terminal state; failures are collected and reported once the batch has
//! drained.

pub mod error;
pub mod file;
pub mod filter;
pub mod paths;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use self::error::{DownloadError, FetchError, JobFailure};
use crate::drive::{DriveSession, RemoteEntry};
use crate::retry::RetryConfig;

pub const DEFAULT_CONCURRENCY: usize = 20;

/// Subset of application config consumed by the download engine.
/// Decoupled from CLI parsing so the engine can be tested independently.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub concurrency: usize,
    pub retry: RetryConfig,
    /// Upper bound for a single file, retries included.
    pub job_timeout: Option<Duration>,
    /// Upper bound for a whole batch, measured from when its first job is
    /// scheduled.
    pub batch_deadline: Option<Duration>,
    pub dry_run: bool,
    pub no_progress_bar: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryConfig::default(),
            job_timeout: None,
            batch_deadline: None,
            dry_run: false,
            no_progress_bar: false,
        }
    }
}

/// Where one remote entry ends up locally.
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub entry: RemoteEntry,
    pub local_directory: PathBuf,
    pub local_file_name: String,
}

impl DownloadTarget {
    pub fn new(entry: RemoteEntry, local_directory: &Path) -> Self {
        let local_file_name = paths::clean_filename(&entry.name);
        Self {
            entry,
            local_directory: local_directory.to_path_buf(),
            local_file_name,
        }
    }

    pub fn final_path(&self) -> PathBuf {
        self.local_directory.join(&self.local_file_name)
    }

    pub fn part_path(&self) -> PathBuf {
        paths::part_path(&self.local_directory, &self.entry.id)
    }
}

/// Counters for one batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub downloaded: usize,
    pub bytes: u64,
    pub skipped_existing: usize,
    pub failed: usize,
    /// Jobs never started because shutdown was requested.
    pub not_started: usize,
    /// Dry run only.
    pub would_download: usize,
}

impl BatchReport {
    /// Jobs that ran to completion, successfully or not.
    pub fn attempted(&self) -> usize {
        self.downloaded + self.failed
    }
}

enum JobOutcome {
    NotStarted,
    Finished(Result<u64, FetchError>),
}

/// Download every entry of `entries` that is not already present in
/// `directory`.
///
/// At most `config.concurrency` fetches run at once. A failed job never
/// cancels its siblings; the call returns only after every job has either
/// finished or, after a shutdown request, been left unstarted.
pub async fn download_all(
    session: Arc<dyn DriveSession>,
    directory: &Path,
    entries: Vec<RemoteEntry>,
    config: &DownloadConfig,
    shutdown: &CancellationToken,
) -> Result<BatchReport, DownloadError> {
    let listed = entries.len();
    let pending = filter::filter_entries(directory, entries);
    let mut report = BatchReport {
        skipped_existing: listed - pending.len(),
        ..BatchReport::default()
    };

    if pending.is_empty() {
        tracing::debug!(
            skipped = report.skipped_existing,
            "Nothing to download in {}",
            directory.display()
        );
        return Ok(report);
    }

    let targets: Vec<DownloadTarget> = pending
        .into_iter()
        .map(|entry| DownloadTarget::new(entry, directory))
        .collect();

    if config.dry_run {
        for target in &targets {
            tracing::info!("[DRY RUN] Would download {}", target.final_path().display());
        }
        report.would_download = targets.len();
        return Ok(report);
    }

    tracing::info!(
        pending = targets.len(),
        skipped = report.skipped_existing,
        "Downloading into {}",
        directory.display()
    );

    let pb = create_progress_bar(config.no_progress_bar, targets.len() as u64);
    let deadline = config.batch_deadline.map(|d| Instant::now() + d);
    let retry = config.retry;
    let job_timeout = config.job_timeout;
    let concurrency = config.concurrency.max(1);

    let results = stream::iter(targets)
        .map(|target| {
            let session = Arc::clone(&session);
            async move {
                if shutdown.is_cancelled() {
                    return (target, JobOutcome::NotStarted);
                }
                let result = run_job(session.as_ref(), &target, &retry, job_timeout, deadline).await;
                (target, JobOutcome::Finished(result))
            }
        })
        .buffer_unordered(concurrency);

    tokio::pin!(results);

    let mut failures: Vec<JobFailure> = Vec::new();
    while let Some((target, outcome)) = results.next().await {
        match outcome {
            JobOutcome::NotStarted => {
                if report.not_started == 0 {
                    pb.suspend(|| tracing::info!("Shutdown requested, not starting remaining downloads"));
                }
                report.not_started += 1;
            }
            JobOutcome::Finished(Ok(bytes)) => {
                report.downloaded += 1;
                report.bytes += bytes;
                pb.set_message(target.local_file_name.clone());
                pb.inc(1);
            }
            JobOutcome::Finished(Err(error)) => {
                // indicatif needs `suspend` to keep log lines from tearing
                // the bar.
                pb.suspend(|| {
                    tracing::error!("Download failed: {}: {}", target.final_path().display(), error);
                });
                report.failed += 1;
                failures.push(JobFailure {
                    entry_id: target.entry.id,
                    name: target.local_file_name,
                    error,
                });
                pb.inc(1);
            }
        }
    }
    pb.finish_and_clear();

    if failures.is_empty() {
        Ok(report)
    } else {
        Err(DownloadError {
            directory: directory.to_path_buf(),
            report,
            failures,
        })
    }
}

async fn run_job(
    session: &dyn DriveSession,
    target: &DownloadTarget,
    retry: &RetryConfig,
    job_timeout: Option<Duration>,
    deadline: Option<Instant>,
) -> Result<u64, FetchError> {
    let Some(limit) = effective_limit(job_timeout, deadline, Instant::now())? else {
        return file::download_target(session, target, retry).await;
    };

    match tokio::time::timeout(limit, file::download_target(session, target, retry)).await {
        Ok(result) => result,
        Err(_) => {
            file::remove_part_file(&target.part_path()).await;
            Err(FetchError::Timeout(limit))
        }
    }
}

/// Time a job may take: the per-job timeout, shortened to whatever is left
/// of the batch deadline.
fn effective_limit(
    job_timeout: Option<Duration>,
    deadline: Option<Instant>,
    now: Instant,
) -> Result<Option<Duration>, FetchError> {
    let remaining = match deadline {
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(now);
            if remaining.is_zero() {
                return Err(FetchError::DeadlineExceeded);
            }
            Some(remaining)
        }
        None => None,
    };
    Ok(match (job_timeout, remaining) {
        (Some(job), Some(left)) => Some(job.min(left)),
        (job, left) => job.or(left),
    })
}

/// Create a progress bar with a consistent template.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY (piped output, cron jobs).
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .map(|s| s.progress_chars("=> "))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

pub(crate) fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::fake::{image_entry, FakeDrive};
    use std::fs;

    fn test_config(concurrency: usize) -> DownloadConfig {
        DownloadConfig {
            concurrency,
            retry: RetryConfig::none(),
            no_progress_bar: true,
            ..DownloadConfig::default()
        }
    }

    fn entries(n: usize) -> Vec<RemoteEntry> {
        (1..=n)
            .map(|i| image_entry(&format!("id-{i}"), &format!("img_{i}.png"), "patient"))
            .collect()
    }

    fn drive_with_files(n: usize) -> FakeDrive {
        (1..=n).fold(FakeDrive::new(), |drive, i| {
            drive.file(&format!("id-{i}"), &[b"tomo", b"gram"])
        })
    }

    fn dir_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn downloads_every_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let drive = Arc::new(drive_with_files(4));

        let report = download_all(drive.clone(), dir.path(), entries(4), &test_config(2), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.downloaded, 4);
        assert_eq!(report.bytes, 32);
        assert_eq!(
            dir_names(dir.path()),
            ["img_1.png", "img_2.png", "img_3.png", "img_4.png"]
        );
        assert_eq!(fs::read(dir.path().join("img_3.png")).unwrap(), b"tomogram");
    }

    #[tokio::test]
    async fn second_run_fetches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let drive = Arc::new(drive_with_files(3));
        let config = test_config(3);
        let token = CancellationToken::new();

        download_all(drive.clone(), dir.path(), entries(3), &config, &token)
            .await
            .unwrap();
        assert_eq!(drive.fetch_count(), 3);

        let report = download_all(drive.clone(), dir.path(), entries(3), &config, &token)
            .await
            .unwrap();
        assert_eq!(drive.fetch_count(), 3);
        assert_eq!(report.skipped_existing, 3);
        assert_eq!(report.downloaded, 0);
    }

    #[tokio::test]
    async fn only_missing_files_are_fetched() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("img_1.png"), b"old").unwrap();
        fs::write(dir.path().join("img_2.png"), b"old").unwrap();
        let drive = Arc::new(drive_with_files(3));

        let report = download_all(drive.clone(), dir.path(), entries(3), &test_config(4), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.skipped_existing, 2);
        assert_eq!(report.downloaded, 1);
        assert_eq!(drive.fetch_count(), 1);
        assert_eq!(fs::read(dir.path().join("img_1.png")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let drive = Arc::new(drive_with_files(5).failing_file("id-3", &[b"half"], 500));

        let err = download_all(drive.clone(), dir.path(), entries(5), &test_config(2), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].entry_id, "id-3");
        assert_eq!(err.report.downloaded, 4);
        assert_eq!(err.report.failed, 1);
        assert!(err.to_string().contains("img_3.png (id-3)"));
        assert_eq!(
            dir_names(dir.path()),
            ["img_1.png", "img_2.png", "img_4.png", "img_5.png"]
        );
        for name in ["img_1.png", "img_2.png", "img_4.png", "img_5.png"] {
            assert_eq!(fs::read(dir.path().join(name)).unwrap(), b"tomogram", "{name}");
        }
    }

    #[tokio::test]
    async fn every_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let drive = Arc::new(
            drive_with_files(4)
                .failing_file("id-1", &[], 404)
                .failing_file("id-4", &[b"x"], 500),
        );

        let err = download_all(drive, dir.path(), entries(4), &test_config(4), &CancellationToken::new())
            .await
            .unwrap_err();
        let mut ids: Vec<&str> = err.failures.iter().map(|f| f.entry_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, ["id-1", "id-4"]);
        assert_eq!(err.report.downloaded, 2);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let drive = Arc::new(drive_with_files(12).with_delay(Duration::from_millis(20)));

        download_all(drive.clone(), dir.path(), entries(12), &test_config(3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(drive.fetch_count(), 12);
        assert!(drive.max_in_flight() <= 3, "saw {}", drive.max_in_flight());
        assert!(drive.max_in_flight() > 1);
    }

    #[tokio::test]
    async fn concurrency_one_is_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let drive = Arc::new(drive_with_files(4).with_delay(Duration::from_millis(5)));

        download_all(drive.clone(), dir.path(), entries(4), &test_config(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(drive.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn zero_concurrency_still_makes_progress() {
        let dir = tempfile::tempdir().unwrap();
        let drive = Arc::new(drive_with_files(2));

        let report = download_all(drive, dir.path(), entries(2), &test_config(0), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.downloaded, 2);
    }

    #[tokio::test]
    async fn empty_listing_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let drive = Arc::new(FakeDrive::new());

        let report = download_all(drive.clone(), dir.path(), Vec::new(), &test_config(4), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report, BatchReport::default());
        assert_eq!(drive.fetch_count(), 0);
    }

    #[tokio::test]
    async fn slow_job_times_out_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let drive = Arc::new(
            drive_with_files(2).slow_file("id-2", &[b"late"], Duration::from_secs(30)),
        );
        let config = DownloadConfig {
            job_timeout: Some(Duration::from_millis(50)),
            ..test_config(2)
        };

        let err = download_all(drive, dir.path(), entries(2), &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert!(matches!(err.failures[0].error, FetchError::Timeout(_)));
        assert_eq!(dir_names(dir.path()), ["img_1.png"]);
    }

    #[tokio::test]
    async fn cancelled_batch_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let drive = Arc::new(drive_with_files(3));
        let token = CancellationToken::new();
        token.cancel();

        let report = download_all(drive.clone(), dir.path(), entries(3), &test_config(2), &token)
            .await
            .unwrap();
        assert_eq!(report.not_started, 3);
        assert_eq!(report.downloaded, 0);
        assert_eq!(drive.fetch_count(), 0);
        assert!(dir_names(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn dry_run_fetches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("img_1.png"), b"old").unwrap();
        let drive = Arc::new(drive_with_files(3));
        let config = DownloadConfig {
            dry_run: true,
            ..test_config(2)
        };

        let report = download_all(drive.clone(), dir.path(), entries(3), &config, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.would_download, 2);
        assert_eq!(report.skipped_existing, 1);
        assert_eq!(drive.fetch_count(), 0);
        assert_eq!(dir_names(dir.path()), ["img_1.png"]);
    }

    #[test]
    fn effective_limit_without_bounds() {
        assert_eq!(effective_limit(None, None, Instant::now()).unwrap(), None);
    }

    #[test]
    fn effective_limit_takes_the_tighter_bound() {
        let now = Instant::now();
        let job = Some(Duration::from_secs(30));

        let far = Some(now + Duration::from_secs(600));
        assert_eq!(
            effective_limit(job, far, now).unwrap(),
            Some(Duration::from_secs(30))
        );

        let near = Some(now + Duration::from_secs(5));
        assert_eq!(
            effective_limit(job, near, now).unwrap(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            effective_limit(None, near, now).unwrap(),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn effective_limit_after_deadline() {
        let now = Instant::now();
        let err = effective_limit(None, Some(now), now).unwrap_err();
        assert!(matches!(err, FetchError::DeadlineExceeded));
    }

    #[test]
    fn target_paths() {
        let target = DownloadTarget::new(image_entry("abc", "a/b.png", "p"), Path::new("/data/P-001"));
        assert_eq!(target.local_file_name, "a_b.png");
        assert_eq!(target.final_path(), PathBuf::from("/data/P-001/a_b.png"));
        assert_eq!(target.part_path(), PathBuf::from("/data/P-001/.abc.part"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(59)), "59s");
        assert_eq!(format_duration(Duration::from_secs(61)), "1m 01s");
        assert_eq!(format_duration(Duration::from_secs(5025)), "1h 23m 45s");
    }

    #[test]
    fn test_create_progress_bar_hidden_when_disabled() {
        let pb = create_progress_bar(true, 100);
        assert!(pb.is_hidden());
    }

    #[test]
    fn test_create_progress_bar_with_total() {
        // stdout is usually not a TTY under the test harness, so both
        // branches are checked.
        let pb = create_progress_bar(false, 42);
        if std::io::stdout().is_terminal() {
            assert!(!pb.is_hidden());
            assert_eq!(pb.length(), Some(42));
        } else {
            assert!(pb.is_hidden());
        }
    }
}
