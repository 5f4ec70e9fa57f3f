use std::collections::BTreeSet;

use serde::Deserialize;

/// Drive's mime type for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Prefix of Drive-native types (Docs, Sheets, shortcuts, ...). These have
/// no binary content; `alt=media` refuses them.
pub const GOOGLE_APPS_MIME_PREFIX: &str = "application/vnd.google-apps.";

/// A file or folder listed under a Drive container.
///
/// Only the fields the downloader needs are kept. Entries are never cached
/// between runs; every listing call produces fresh values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parents: BTreeSet<String>,
    #[serde(default)]
    pub mime_type: String,
}

impl RemoteEntry {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// Has downloadable bytes, i.e. is not a folder or another Drive-native
    /// document type.
    pub fn has_content(&self) -> bool {
        !self.mime_type.starts_with(GOOGLE_APPS_MIME_PREFIX)
    }
}

/// Restricts which children a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListFilter {
    #[default]
    All,
    FoldersOnly,
    FilesOnly,
    ImagesOnly,
}

/// One page of a `files.list` response.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListPage {
    #[serde(default)]
    pub files: Vec<RemoteEntry>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}
