//! OAuth credential handling for the Drive API.
//!
//! The token file is produced out of band (an installed-app consent flow).
//! At startup it is loaded, refreshed if the access token has expired, and
//! written back. During a run the credential is refreshed between patients
//! when it is close to expiring.

pub mod credential;
pub mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::Mutex;

use self::credential::Credential;
use self::error::AuthError;
use crate::drive::{DriveSession, HttpDriveSession, SessionSource};

/// Scope the token must grant.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Refresh when the access token has less than this left, so it cannot
/// lapse in the middle of a batch.
const REFRESH_MARGIN_MINUTES: i64 = 10;

/// Load the credential from `token_file`, refreshing and re-saving it when
/// the access token is no longer valid.
pub async fn load_credential(token_file: &Path, client: &Client) -> Result<Credential, AuthError> {
    let credential = Credential::load(token_file).await?;
    tracing::debug!("Loaded credential from {}", token_file.display());

    if !credential.scopes().is_empty() && !credential.scopes().iter().any(|s| s == DRIVE_SCOPE) {
        tracing::warn!(
            scopes = ?credential.scopes(),
            "Token does not list the Drive scope; requests may be rejected"
        );
    }

    if credential.is_valid() {
        return Ok(credential);
    }

    if credential.refresh_token().is_none() {
        return Err(AuthError::NoRefreshToken);
    }

    tracing::info!("Access token expired, refreshing");
    let refreshed = credential.refresh(client).await?;
    refreshed.save(token_file).await?;
    Ok(refreshed)
}

struct CurrentSession {
    credential: Arc<Credential>,
    session: Arc<dyn DriveSession>,
}

/// `SessionSource` that owns the credential for the whole run and swaps in
/// a new `HttpDriveSession` whenever the credential had to be refreshed.
///
/// Jobs hold their own `Arc` to the session they started with, so a refresh
/// never disturbs in-flight downloads.
pub struct RefreshingSessions {
    client: Client,
    token_file: PathBuf,
    chunk_size: u64,
    api_root: Option<String>,
    current: Mutex<CurrentSession>,
}

impl RefreshingSessions {
    pub fn new(client: Client, credential: Credential, token_file: PathBuf, chunk_size: u64) -> Self {
        let credential = Arc::new(credential);
        let session = build_session(&client, &credential, chunk_size, None);
        Self {
            client,
            token_file,
            chunk_size,
            api_root: None,
            current: Mutex::new(CurrentSession {
                credential,
                session,
            }),
        }
    }

    /// Send Drive requests to `api_root` instead of the public endpoint.
    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        let api_root = api_root.into();
        let current = self.current.get_mut();
        current.session = build_session(
            &self.client,
            &current.credential,
            self.chunk_size,
            Some(&api_root),
        );
        self.api_root = Some(api_root);
        self
    }
}

fn build_session(
    client: &Client,
    credential: &Arc<Credential>,
    chunk_size: u64,
    api_root: Option<&str>,
) -> Arc<dyn DriveSession> {
    let session = HttpDriveSession::new(client.clone(), Arc::clone(credential), chunk_size);
    match api_root {
        Some(root) => Arc::new(session.with_api_root(root)),
        None => Arc::new(session),
    }
}

#[async_trait::async_trait]
impl SessionSource for RefreshingSessions {
    async fn session(&self) -> Result<Arc<dyn DriveSession>, AuthError> {
        let mut current = self.current.lock().await;
        let margin = chrono::Duration::minutes(REFRESH_MARGIN_MINUTES);
        if current.credential.expires_within(margin) {
            tracing::info!("Access token expires soon, refreshing");
            let refreshed = Arc::new(current.credential.refresh(&self.client).await?);
            refreshed.save(&self.token_file).await?;
            current.session = build_session(
                &self.client,
                &refreshed,
                self.chunk_size,
                self.api_root.as_deref(),
            );
            current.credential = refreshed;
        }
        Ok(Arc::clone(&current.session))
    }
}
