//! In-memory `DriveSession` used by unit tests of the lister, downloader and
//! orchestrator. Counts fetches and tracks how many run at once.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, StreamExt};

use super::error::RemoteAccessError;
use super::session::{ByteStream, DriveSession, SessionSource};
use super::types::{FileListPage, RemoteEntry, FOLDER_MIME_TYPE};
use crate::auth::error::AuthError;

#[derive(Clone)]
struct FakeContent {
    chunks: Vec<Bytes>,
    /// HTTP status of an error delivered after `chunks`.
    fail_status: Option<u16>,
    /// Fetches that fail with `fail_status` before one succeeds.
    failures_left: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

pub(crate) struct FakeDrive {
    folders: HashMap<String, Vec<Vec<RemoteEntry>>>,
    list_errors: HashMap<String, u16>,
    contents: HashMap<String, FakeContent>,
    delay: Duration,
    fetches: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    queries: Mutex<Vec<String>>,
}

pub(crate) fn image_entry(id: &str, name: &str, parent: &str) -> RemoteEntry {
    RemoteEntry {
        id: id.to_string(),
        name: name.to_string(),
        parents: BTreeSet::from([parent.to_string()]),
        mime_type: "image/png".to_string(),
    }
}

pub(crate) fn folder_entry(id: &str, name: &str, parent: &str) -> RemoteEntry {
    RemoteEntry {
        mime_type: FOLDER_MIME_TYPE.to_string(),
        ..image_entry(id, name, parent)
    }
}

/// Pull the container id back out of `'<id>' in parents ...`.
fn container_of(query: &str) -> &str {
    query
        .strip_prefix('\'')
        .and_then(|rest| rest.split_once("' in parents"))
        .map(|(id, _)| id)
        .unwrap_or("")
}

impl FakeDrive {
    pub(crate) fn new() -> Self {
        Self {
            folders: HashMap::new(),
            list_errors: HashMap::new(),
            contents: HashMap::new(),
            delay: Duration::ZERO,
            fetches: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Delay applied to every fetch before its bytes are delivered.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn folder(mut self, id: &str, pages: Vec<Vec<RemoteEntry>>) -> Self {
        self.folders.insert(id.to_string(), pages);
        self
    }

    pub(crate) fn failing_folder(mut self, id: &str, status: u16) -> Self {
        self.list_errors.insert(id.to_string(), status);
        self
    }

    pub(crate) fn file(self, id: &str, chunks: &[&[u8]]) -> Self {
        self.content(id, chunks, None, 0, None)
    }

    /// Delivers `chunks`, then fails with `status` on every fetch.
    pub(crate) fn failing_file(self, id: &str, chunks: &[&[u8]], status: u16) -> Self {
        self.content(id, chunks, Some(status), usize::MAX, None)
    }

    /// Fails `failures` times with `status`, then delivers `chunks`.
    pub(crate) fn flaky_file(self, id: &str, chunks: &[&[u8]], failures: usize, status: u16) -> Self {
        self.content(id, chunks, Some(status), failures, None)
    }

    pub(crate) fn slow_file(self, id: &str, chunks: &[&[u8]], delay: Duration) -> Self {
        self.content(id, chunks, None, 0, Some(delay))
    }

    fn content(
        mut self,
        id: &str,
        chunks: &[&[u8]],
        fail_status: Option<u16>,
        failures: usize,
        delay: Option<Duration>,
    ) -> Self {
        self.contents.insert(
            id.to_string(),
            FakeContent {
                chunks: chunks.iter().map(|c| Bytes::copy_from_slice(c)).collect(),
                fail_status,
                failures_left: Arc::new(AtomicUsize::new(failures)),
                delay,
            },
        );
        self
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

fn status_error(status: u16, file_id: &str) -> RemoteAccessError {
    RemoteAccessError::Status {
        status,
        context: format!("media of {}", file_id),
        message: "injected failure".to_string(),
    }
}

#[async_trait::async_trait]
impl DriveSession for FakeDrive {
    async fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<FileListPage, RemoteAccessError> {
        self.queries.lock().unwrap().push(query.to_string());
        let container = container_of(query);

        if let Some(&status) = self.list_errors.get(container) {
            return Err(RemoteAccessError::Status {
                status,
                context: "files.list".to_string(),
                message: "injected failure".to_string(),
            });
        }

        let pages = self.folders.get(container).cloned().unwrap_or_default();
        let index = match page_token {
            None => 0,
            Some(token) => token
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| RemoteAccessError::Malformed {
                    context: "files.list".to_string(),
                    message: format!("unknown page token {}", token),
                })?,
        };

        Ok(FileListPage {
            files: pages.get(index).cloned().unwrap_or_default(),
            next_page_token: (index + 1 < pages.len()).then(|| format!("page-{}", index + 1)),
        })
    }

    fn media_stream(&self, file_id: &str) -> ByteStream {
        let content = self.contents.get(file_id).cloned();
        let delay = content
            .as_ref()
            .and_then(|c| c.delay)
            .unwrap_or(self.delay);
        let fetches = Arc::clone(&self.fetches);
        let in_flight = Arc::clone(&self.in_flight);
        let max_in_flight = Arc::clone(&self.max_in_flight);
        let file_id = file_id.to_string();

        let delivery = async move {
            fetches.fetch_add(1, Ordering::SeqCst);
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);

            let items: Vec<Result<Bytes, RemoteAccessError>> = match content {
                None => vec![Err(status_error(404, &file_id))],
                Some(content) => {
                    let failing = content.fail_status.is_some()
                        && content
                            .failures_left
                            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                            .is_ok();
                    let mut items: Vec<_> = content.chunks.into_iter().map(Ok).collect();
                    if failing {
                        if let Some(status) = content.fail_status {
                            items.push(Err(status_error(status, &file_id)));
                        }
                    }
                    items
                }
            };
            stream::iter(items)
        };

        stream::once(delivery).flatten().boxed()
    }
}

#[async_trait::async_trait]
impl SessionSource for Arc<FakeDrive> {
    async fn session(&self) -> Result<Arc<dyn DriveSession>, AuthError> {
        Ok(Arc::clone(self) as Arc<dyn DriveSession>)
    }
}
