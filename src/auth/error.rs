use std::path::PathBuf;

use thiserror::Error;

/// Failures obtaining a usable OAuth credential.
///
/// None of these are retried automatically; the operator has to provide a
/// fresh token file.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(
        "No token file at {0}. Authorize gdrive-dl for the Drive scope and save the \
         authorized-user JSON there."
    )]
    MissingToken(PathBuf),

    #[error("Token file {path} is not a valid authorized-user credential: {source}")]
    InvalidToken {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Access token has expired and the token file has no refresh token")]
    NoRefreshToken,

    #[error("Token refresh rejected (HTTP {status}): {message}")]
    RefreshRejected { status: u16, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
