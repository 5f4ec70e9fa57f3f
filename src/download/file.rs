use std::path::Path;

use futures_util::StreamExt;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::{FetchError, FilesystemError};
use super::DownloadTarget;
use crate::drive::DriveSession;
use crate::retry::{self, RetryAction, RetryConfig};

/// Fetch one target into its final path, retrying transient failures.
///
/// Each attempt streams into the target's `.part` file from scratch and
/// renames it into place only after the last chunk arrived, so the final
/// name never refers to a truncated file. Returns the number of bytes
/// written.
pub async fn download_target(
    session: &dyn DriveSession,
    target: &DownloadTarget,
    retry_config: &RetryConfig,
) -> Result<u64, FetchError> {
    let label = target.local_file_name.as_str();
    let result = retry::retry_with_backoff(
        retry_config,
        label,
        |e: &FetchError| {
            if e.is_retryable() {
                RetryAction::Retry
            } else {
                RetryAction::Abort
            }
        },
        || attempt_download(session, target),
    )
    .await;

    if result.is_err() {
        remove_part_file(&target.part_path()).await;
    }
    result
}

/// Single attempt: stream every chunk into the part file, flush, rename.
async fn attempt_download(
    session: &dyn DriveSession,
    target: &DownloadTarget,
) -> Result<u64, FetchError> {
    let part_path = target.part_path();
    let final_path = target.final_path();

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&part_path)
        .await
        .map_err(|source| FilesystemError::Write {
            path: part_path.clone(),
            source,
        })?;

    let mut stream = session.media_stream(&target.entry.id);
    let mut bytes_written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(
                    bytes_so_far = bytes_written,
                    "Stream for {} broke off: {}",
                    target.local_file_name,
                    e
                );
                drop(file);
                remove_part_file(&part_path).await;
                return Err(e.into());
            }
        };
        if let Err(source) = file.write_all(&chunk).await {
            drop(file);
            remove_part_file(&part_path).await;
            return Err(FilesystemError::Write {
                path: part_path,
                source,
            }
            .into());
        }
        bytes_written += chunk.len() as u64;
    }

    let finished = async {
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    if let Err(source) = finished {
        remove_part_file(&part_path).await;
        return Err(FilesystemError::Write {
            path: part_path,
            source,
        }
        .into());
    }

    if let Err(source) = fs::rename(&part_path, &final_path).await {
        remove_part_file(&part_path).await;
        return Err(FilesystemError::Rename {
            from: part_path,
            to: final_path,
            source,
        }
        .into());
    }

    Ok(bytes_written)
}

/// Best-effort removal; a missing part file is the normal case.
pub(super) async fn remove_part_file(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Could not remove partial file {}: {}", path.display(), e),
    }
}
