use std::collections::HashSet;

use super::error::RemoteAccessError;
use super::queries::children_query;
use super::session::DriveSession;
use super::types::{ListFilter, RemoteEntry};

/// List every child of `container_id` matching `filter`, following
/// `nextPageToken` until the last page. Callers never see page tokens.
pub async fn list_entries(
    session: &dyn DriveSession,
    container_id: &str,
    filter: ListFilter,
) -> Result<Vec<RemoteEntry>, RemoteAccessError> {
    let query = children_query(container_id, filter);
    let mut entries: Vec<RemoteEntry> = Vec::new();
    let mut seen_tokens: HashSet<String> = HashSet::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = session.list_page(&query, page_token.as_deref()).await?;
        pages += 1;
        tracing::debug!(
            container_id,
            page = pages,
            entries = page.files.len(),
            "Listed page"
        );
        entries.extend(page.files);

        match page.next_page_token {
            Some(token) if !token.is_empty() => {
                // A repeated token would loop forever.
                if !seen_tokens.insert(token.clone()) {
                    return Err(RemoteAccessError::Malformed {
                        context: format!("listing of {}", container_id),
                        message: format!("page token {} returned twice", token),
                    });
                }
                page_token = Some(token);
            }
            _ => break,
        }
    }

    tracing::debug!(
        container_id,
        pages,
        total = entries.len(),
        "Listing complete"
    );
    Ok(entries)
}
