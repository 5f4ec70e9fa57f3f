use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::header::{HeaderMap, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};

use super::error::RemoteAccessError;
use super::queries::{LIST_FIELDS, PAGE_SIZE};
use super::types::FileListPage;
use crate::auth::credential::Credential;
use crate::auth::error::AuthError;

/// Drive v3 REST root.
pub const DRIVE_API_ROOT: &str = "https://www.googleapis.com/drive/v3";

/// Stream of file content chunks, in order.
pub type ByteStream = BoxStream<'static, Result<Bytes, RemoteAccessError>>;

/// The two Drive calls the downloader depends on.
///
/// Implementations must be safe to share across concurrent download jobs.
#[async_trait::async_trait]
pub trait DriveSession: Send + Sync {
    /// Fetch one page of `files.list` for query `q`.
    async fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<FileListPage, RemoteAccessError>;

    /// Stream the content of `file_id`. The stream ends once the whole file
    /// has been delivered; a transport failure ends it with an error item.
    fn media_stream(&self, file_id: &str) -> ByteStream;
}

/// Hands out a session whose credential is good for the next batch.
///
/// Called by the orchestrator before each patient so an access token that
/// expires during a long run gets refreshed between batches.
#[async_trait::async_trait]
pub trait SessionSource: Send + Sync {
    async fn session(&self) -> Result<Arc<dyn DriveSession>, AuthError>;
}

/// `DriveSession` backed by the Drive v3 HTTP API.
///
/// `reqwest::Client` is internally reference counted and safe for concurrent
/// use, so every job shares this one instance.
pub struct HttpDriveSession {
    client: Client,
    credential: Arc<Credential>,
    api_root: String,
    chunk_size: u64,
}

impl HttpDriveSession {
    pub fn new(client: Client, credential: Arc<Credential>, chunk_size: u64) -> Self {
        Self {
            client,
            credential,
            api_root: DRIVE_API_ROOT.to_string(),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Point the session at a different API root (used against mock servers).
    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = api_root.into().trim_end_matches('/').to_string();
        self
    }
}

impl std::fmt::Debug for HttpDriveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDriveSession")
            .field("api_root", &self.api_root)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl DriveSession for HttpDriveSession {
    async fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<FileListPage, RemoteAccessError> {
        let context = "files.list".to_string();
        let url = format!("{}/files", self.api_root);
        let page_size = PAGE_SIZE.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("q", query),
            ("pageSize", &page_size),
            ("fields", LIST_FIELDS),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        tracing::debug!(query, page_token, "GET {}", url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.credential.access_token())
            .query(&params)
            .send()
            .await
            .map_err(|source| RemoteAccessError::Transport {
                context: context.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(status_error(response, context).await);
        }

        let body = response
            .text()
            .await
            .map_err(|source| RemoteAccessError::Transport {
                context: context.clone(),
                source,
            })?;
        serde_json::from_str(&body).map_err(|e| RemoteAccessError::Malformed {
            context,
            message: e.to_string(),
        })
    }

    fn media_stream(&self, file_id: &str) -> ByteStream {
        let cursor = ChunkCursor {
            client: self.client.clone(),
            url: format!("{}/files/{}?alt=media&supportsAllDrives=true", self.api_root, file_id),
            access_token: self.credential.access_token().to_string(),
            context: format!("media of {}", file_id),
            chunk_size: self.chunk_size,
            offset: 0,
            total: None,
            done: false,
        };

        stream::try_unfold(cursor, |mut cursor| async move {
            if cursor.done {
                return Ok::<_, RemoteAccessError>(None);
            }
            let chunk = cursor.next_chunk().await?;
            Ok(Some((chunk, cursor)))
        })
        .boxed()
    }
}

/// Walks a file in `Range` requests of `chunk_size` bytes until the server
/// signals the end, either through `Content-Range` or a short/complete body.
struct ChunkCursor {
    client: Client,
    url: String,
    access_token: String,
    context: String,
    chunk_size: u64,
    offset: u64,
    /// File size from the first `Content-Range` that carried one.
    total: Option<u64>,
    done: bool,
}

impl ChunkCursor {
    async fn next_chunk(&mut self) -> Result<Bytes, RemoteAccessError> {
        let last = self.offset + self.chunk_size - 1;
        let response = self
            .client
            .get(&self.url)
            .bearer_auth(&self.access_token)
            .header(RANGE, format!("bytes={}-{}", self.offset, last))
            .send()
            .await
            .map_err(|source| RemoteAccessError::Transport {
                context: self.context.clone(),
                source,
            })?;

        let status = response.status();
        // Zero-length files have no satisfiable range.
        if status == StatusCode::RANGE_NOT_SATISFIABLE && self.offset == 0 {
            self.done = true;
            return Ok(Bytes::new());
        }
        if !status.is_success() {
            return Err(status_error(response, self.context.clone()).await);
        }

        if status != StatusCode::PARTIAL_CONTENT {
            // The server ignored the range and is sending the whole file.
            // Only usable before anything was written.
            if self.offset > 0 {
                return Err(self.malformed(format!(
                    "HTTP {} with the full body after {} bytes were already received",
                    status.as_u16(),
                    self.offset
                )));
            }
            let body = self.read_body(response).await?;
            self.offset = body.len() as u64;
            self.done = true;
            tracing::trace!(offset = self.offset, "{}: received whole body", self.context);
            return Ok(body);
        }

        if let Some(start) = content_range_start(response.headers()) {
            if start != self.offset {
                return Err(self.malformed(format!(
                    "range starts at {} but {} was requested",
                    start, self.offset
                )));
            }
        }
        if let Some(total) = content_range_total(response.headers()) {
            match self.total {
                Some(known) if known != total => {
                    return Err(self.malformed(format!(
                        "file size changed from {} to {} mid-download",
                        known, total
                    )));
                }
                _ => self.total = Some(total),
            }
        }

        let body = self.read_body(response).await?;
        let received = body.len() as u64;
        self.offset += received;

        self.done = match self.total {
            Some(total) if self.offset > total => {
                return Err(self.malformed(format!(
                    "received {} bytes of a {} byte file",
                    self.offset, total
                )));
            }
            Some(total) if received == 0 && self.offset < total => {
                return Err(self.malformed(format!(
                    "empty range at offset {} of {}",
                    self.offset, total
                )));
            }
            Some(total) => self.offset == total,
            None => received < self.chunk_size,
        };

        tracing::trace!(
            offset = self.offset,
            total = self.total,
            done = self.done,
            "{}: received {} bytes",
            self.context,
            received
        );
        Ok(body)
    }

    async fn read_body(&self, response: Response) -> Result<Bytes, RemoteAccessError> {
        response
            .bytes()
            .await
            .map_err(|source| RemoteAccessError::Transport {
                context: self.context.clone(),
                source,
            })
    }

    fn malformed(&self, message: String) -> RemoteAccessError {
        RemoteAccessError::Malformed {
            context: self.context.clone(),
            message,
        }
    }
}

/// First byte position from `Content-Range: bytes 4-7/10`.
fn content_range_start(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .trim()
        .strip_prefix("bytes")?
        .trim_start()
        .split_once('-')?
        .0
        .parse()
        .ok()
}

/// Total size from `Content-Range: bytes 0-99/1234`; `None` for `*` or when
/// the header is absent or malformed.
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit_once('/')?
        .1
        .trim()
        .parse()
        .ok()
}

/// Turn a non-success response into `RemoteAccessError::Status`, pulling the
/// human-readable message out of Drive's JSON error body when present.
async fn status_error(response: Response, context: String) -> RemoteAccessError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            let error = v.get("error")?;
            let message = error.get("message")?.as_str()?.to_string();
            let reason = error
                .get("errors")
                .and_then(|e| e.get(0))
                .and_then(|e| e.get("reason"))
                .and_then(|r| r.as_str());
            Some(match reason {
                Some(reason) => format!("{} ({})", message, reason),
                None => message,
            })
        })
        .unwrap_or_else(|| body.chars().take(200).collect());
    RemoteAccessError::Status {
        status,
        context,
        message,
    }
}
