use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;

use super::error::AuthError;

/// Google's OAuth token endpoint, used when the token file names none.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens are treated as expired this long before their actual expiry so a
/// request never races the deadline.
const EXPIRY_SKEW_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// An OAuth user credential in Google's "authorized user" JSON format.
///
/// Values are immutable: `refresh` returns a new credential instead of
/// mutating this one, so a credential can be shared across download jobs
/// behind an `Arc` without locking.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "token", alias = "access_token")]
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    token_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_secret: Option<String>,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<DateTime<Utc>>,
    /// Fields we don't interpret (`universe_domain`, `account`, ...) are
    /// written back unchanged.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("token_uri", &self.token_uri)
            .field("scopes", &self.scopes)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

/// Success body of the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl Credential {
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    /// Expired (or about to be) at `now`. A credential without an expiry
    /// never expires from our side; Drive will reject it if it has.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_SKEW_SECS) <= now,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Usable for requests right now.
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && !self.is_expired()
    }

    /// Expires within `margin` from now.
    pub fn expires_within(&self, margin: Duration) -> bool {
        self.is_expired_at(Utc::now() + margin)
    }

    /// Read a credential from an authorized-user JSON file.
    pub async fn load(path: &Path) -> Result<Self, AuthError> {
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthError::MissingToken(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&contents).map_err(|source| AuthError::InvalidToken {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the credential back, owner-readable only on unix.
    pub async fn save(&self, path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        tracing::debug!("Saved credential to {}", path.display());
        Ok(())
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh(&self, client: &Client) -> Result<Credential, AuthError> {
        let refresh_token = self.refresh_token.as_deref().ok_or(AuthError::NoRefreshToken)?;

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        if let Some(id) = &self.client_id {
            form.push(("client_id", id));
        }
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret));
        }

        tracing::debug!("POST {}", self.token_uri);
        let response = client.post(&self.token_uri).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    let error = v.get("error")?.as_str()?.to_string();
                    Some(match v.get("error_description").and_then(|d| d.as_str()) {
                        Some(desc) => format!("{}: {}", error, desc),
                        None => error,
                    })
                })
                .unwrap_or(body);
            return Err(AuthError::RefreshRejected {
                status: status.as_u16(),
                message,
            });
        }

        let token: TokenResponse = response.json().await?;
        Ok(self.with_token(token, Utc::now()))
    }

    fn with_token(&self, token: TokenResponse, now: DateTime<Utc>) -> Credential {
        let mut next = self.clone();
        next.access_token = token.access_token;
        next.expiry = token.expires_in.map(|secs| now + Duration::seconds(secs));
        if let Some(refresh_token) = token.refresh_token {
            next.refresh_token = Some(refresh_token);
        }
        if let Some(scope) = token.scope {
            next.scopes = scope.split_whitespace().map(str::to_string).collect();
        }
        next
    }

    #[cfg(test)]
    pub(crate) fn for_tests(access_token: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            refresh_token: None,
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            client_id: None,
            client_secret: None,
            scopes: vec![super::DRIVE_SCOPE.to_string()],
            expiry: None,
            extra: Map::new(),
        }
    }
}
