//! Existence check run once per batch, before any job is scheduled.

use std::path::Path;

use super::paths::clean_filename;
use crate::drive::RemoteEntry;

/// `false` when a file with the entry's name already sits directly under
/// `directory`. Matching is by name only; two remote files sharing a name
/// map to the same local file.
pub fn should_download(directory: &Path, entry: &RemoteEntry) -> bool {
    !directory.join(clean_filename(&entry.name)).exists()
}

/// Keep only the entries that still need fetching, preserving order.
pub fn filter_entries(directory: &Path, entries: Vec<RemoteEntry>) -> Vec<RemoteEntry> {
    entries
        .into_iter()
        .filter(|entry| {
            let keep = should_download(directory, entry);
            if !keep {
                tracing::trace!("{} already present, skipping", entry.name);
            }
            keep
        })
        .collect()
}
