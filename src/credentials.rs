//! API key storage.
//!
//! One installation keeps at most one user key, stored as `{"api_key": "..."}`
//! in `civitai_api_key.json` inside the config directory. A second,
//! pre-provisioned `default_api_key.txt` is only ever read, and only used
//! when the user has not stored a key of their own.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, trace, warn};

pub const KEY_FILE: &str = "civitai_api_key.json";
pub const DEFAULT_KEY_FILE: &str = "default_api_key.txt";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredKey {
    #[serde(default)]
    api_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Supplied with the request itself
    Explicit,
    /// Saved earlier by the user
    Stored,
    /// The installation's default key file
    Default,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::Stored => write!(f, "saved key"),
            Self::Default => write!(f, "default key"),
        }
    }
}

/// A resolved API key and where it came from.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub source: CredentialSource,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &mask(&self.token))
            .field("source", &self.source)
            .finish()
    }
}

/// Hides all but the first four characters of a key.
pub fn mask(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    format!("{visible}{}", "*".repeat(token.chars().count().saturating_sub(4)))
}

fn non_empty(token: &str) -> Option<String> {
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(KEY_FILE)
    }

    pub fn default_key_path(&self) -> PathBuf {
        self.dir.join(DEFAULT_KEY_FILE)
    }

    /// The saved user key, if there is one.
    pub async fn load(&self) -> Result<Option<String>> {
        let Some(raw) = read_optional(&self.key_path()).await? else {
            return Ok(None);
        };
        let stored: StoredKey = serde_json::from_str(&raw)?;
        Ok(non_empty(&stored.api_key))
    }

    /// Replaces the saved key.
    pub async fn save(&self, token: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_string(&StoredKey {
            api_key: token.to_string(),
        })?;

        // Each writer gets its own temp file; the rename makes the record visible whole.
        let dir = self.dir.clone();
        let target = self.key_path();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(body.as_bytes())?;
            tmp.persist(&target)?;
            Ok(())
        })
        .await??;
        debug!(path = ?self.key_path(), "Saved API key");
        Ok(())
    }

    /// Forgets the saved key; a missing record is fine.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(self.key_path()).await {
            Ok(()) => {
                debug!(path = ?self.key_path(), "Removed saved API key");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// The installation's default key, if provisioned.
    pub async fn load_default(&self) -> Result<Option<String>> {
        Ok(read_optional(&self.default_key_path())
            .await?
            .as_deref()
            .and_then(non_empty))
    }

    /// Picks the key for one invocation: explicit, then saved, then default.
    ///
    /// Unreadable records are logged and skipped; a request without any key
    /// still goes out anonymously.
    pub async fn resolve(&self, explicit: Option<&str>) -> Option<Credential> {
        if let Some(token) = explicit.and_then(non_empty) {
            return Some(Credential {
                token,
                source: CredentialSource::Explicit,
            });
        }

        match self.load().await {
            Ok(Some(token)) => {
                return Some(Credential {
                    token,
                    source: CredentialSource::Stored,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Ignoring unreadable saved API key"),
        }

        match self.load_default().await {
            Ok(Some(token)) => Some(Credential {
                token,
                source: CredentialSource::Default,
            }),
            Ok(None) => {
                trace!("No API key available, requests will be anonymous");
                None
            }
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable default API key");
                None
            }
        }
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
