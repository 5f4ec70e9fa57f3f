use super::types::{ListFilter, FOLDER_MIME_TYPE};

/// Results per `files.list` page.
pub(crate) const PAGE_SIZE: u32 = 100;

/// Only the fields `RemoteEntry` deserializes; asking for `*` would pull every
/// file's full metadata on each page.
pub(crate) const LIST_FIELDS: &str = "nextPageToken, files(id, name, parents, mimeType)";

/// Build the `q` parameter selecting the non-trashed children of
/// `container_id` that match `filter`.
pub fn children_query(container_id: &str, filter: ListFilter) -> String {
    let mut query = format!(
        "'{}' in parents and trashed = false",
        escape_literal(container_id)
    );
    match filter {
        ListFilter::All => {}
        ListFilter::FoldersOnly => {
            query.push_str(&format!(" and mimeType = '{}'", FOLDER_MIME_TYPE));
        }
        ListFilter::FilesOnly => {
            query.push_str(&format!(" and mimeType != '{}'", FOLDER_MIME_TYPE));
        }
        ListFilter::ImagesOnly => query.push_str(" and mimeType contains 'image/'"),
    }
    query
}

/// Escape a value for use inside a single-quoted Drive query literal.
fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
