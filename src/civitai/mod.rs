//! Civitai registry access.
//!
//! Turning a pasted link into something downloadable takes two lookups against
//! the public REST API:
//!
//! - a model page link (`/models/123`) is resolved to the id of its newest version
//! - a version id is resolved to its metadata and file list
//!
//! Links that already carry `modelVersionId=` skip the first lookup entirely.
//! Every failure along the way is reported as a [`DownloadError`], which is
//! shared with the download engine so callers only ever branch on one taxonomy.

use http::StatusCode;
use std::{error::Error as _, fmt};
use thiserror::Error;

pub mod client;
pub mod models;
pub mod reference;

pub use client::RegistryClient;
pub use models::{FileDescriptor, ModelReference};
pub use reference::resolve;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Invalid model link: {0}")]
    InvalidReference(String),

    #[error("Model has no published versions")]
    NoVersions,

    #[error("No files found for download")]
    NoFiles,

    #[error("Authorization error. Check your API key")]
    Auth,

    #[error("Access forbidden. Model may require an API key or subscription")]
    Forbidden,

    #[error("Not found. Model may have been deleted")]
    NotFound,

    #[error("Download limit exceeded. Try again later")]
    RateLimited,

    #[error("Server error (code {0})")]
    Server(u16),

    #[error("Timeout. File too large or slow connection")]
    Timeout,

    #[error("Connection lost: {0}")]
    Network(String),

    #[error("Downloaded file is empty")]
    EmptyFile,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected error: {0}")]
    Unknown(String),
}

/// Classification tag of a [`DownloadError`], stable across message wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidReference,
    NoVersions,
    NoFiles,
    Auth,
    Forbidden,
    NotFound,
    RateLimited,
    Server,
    Timeout,
    Network,
    EmptyFile,
    Io,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidReference => "InvalidReference",
            Self::NoVersions => "NoVersionsError",
            Self::NoFiles => "NoFilesError",
            Self::Auth => "AuthError",
            Self::Forbidden => "ForbiddenError",
            Self::NotFound => "NotFoundError",
            Self::RateLimited => "RateLimited",
            Self::Server => "ServerError",
            Self::Timeout => "TimeoutError",
            Self::Network => "NetworkError",
            Self::EmptyFile => "EmptyFileError",
            Self::Io => "IOError",
            Self::Unknown => "UnknownError",
        };
        f.write_str(name)
    }
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidReference(_) => ErrorKind::InvalidReference,
            Self::NoVersions => ErrorKind::NoVersions,
            Self::NoFiles => ErrorKind::NoFiles,
            Self::Auth => ErrorKind::Auth,
            Self::Forbidden => ErrorKind::Forbidden,
            Self::NotFound => ErrorKind::NotFound,
            Self::RateLimited => ErrorKind::RateLimited,
            Self::Server(_) => ErrorKind::Server,
            Self::Timeout => ErrorKind::Timeout,
            Self::Network(_) => ErrorKind::Network,
            Self::EmptyFile => ErrorKind::EmptyFile,
            Self::Io(_) => ErrorKind::Io,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() && is_malformed_json(&err) {
            Self::Unknown(format!("malformed registry response: {err}"))
        } else if err.is_decode() || err.is_connect() || err.is_request() || err.is_body() {
            Self::Network(err.to_string())
        } else if let Some(status) = err.status() {
            status_to_error(status)
        } else {
            Self::Unknown(err.to_string())
        }
    }
}

/// Whether a decode error came from parsing the body rather than from reading it.
///
/// reqwest reports a connection dropped mid-body as a decode error too.
fn is_malformed_json(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if cause.is::<serde_json::Error>() {
            return true;
        }
        source = cause.source();
    }
    false
}

/// Maps a non-success HTTP status to its classification.
///
/// Used for both registry lookups and the file download itself.
pub fn status_to_error(status: StatusCode) -> DownloadError {
    match status {
        StatusCode::UNAUTHORIZED => DownloadError::Auth,
        StatusCode::FORBIDDEN => DownloadError::Forbidden,
        StatusCode::NOT_FOUND => DownloadError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => DownloadError::RateLimited,
        other => DownloadError::Server(other.as_u16()),
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
