use std::path::{Path, PathBuf};

use tokio::fs;

use super::error::FilesystemError;

/// Make a Drive name usable as a single path component.
///
/// Drive allows `/` and `\` in names; those would nest or escape the
/// target directory, so they become `_`. `.` and `..` are rejected the same
/// way. Every other name is used verbatim.
pub fn clean_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".repeat(cleaned.len().max(1)),
        _ => cleaned,
    }
}

/// Local directory for one patient folder.
pub fn patient_directory(root: &Path, patient_name: &str) -> PathBuf {
    root.join(clean_filename(patient_name))
}

/// Hidden temp file a job streams into before renaming to the final name.
/// Keyed by the remote id so concurrent jobs never share one.
pub fn part_path(directory: &Path, entry_id: &str) -> PathBuf {
    directory.join(format!(".{}.part", clean_filename(entry_id)))
}

/// Create `path` and any missing parents. An existing directory is fine;
/// an existing non-directory is not.
pub async fn ensure_directory(path: &Path) -> Result<PathBuf, FilesystemError> {
    match fs::create_dir_all(path).await {
        Ok(()) => Ok(path.to_path_buf()),
        Err(source) => {
            let exists_as_file = fs::metadata(path)
                .await
                .map(|m| !m.is_dir())
                .unwrap_or(false);
            if exists_as_file {
                Err(FilesystemError::NotADirectory {
                    path: path.to_path_buf(),
                })
            } else {
                Err(FilesystemError::CreateDir {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
}
