//! Civitai REST API client

use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

use super::models::{ModelMetadata, ModelResponse, VersionResponse};
use super::{DownloadError, Result, status_to_error};

/// Lookups against one registry, on behalf of one caller.
///
/// The credential belongs to the client value, so two concurrent requests
/// with different keys never see each other's token.
#[derive(Clone)]
pub struct RegistryClient {
    http: Client,
    base_url: String,
    credential: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.credential.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RegistryClient {
    pub fn new(http: Client, base_url: impl Into<String>, credential: Option<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        trace!(url = %url, "Registry request");
        let request = self.http.get(url).timeout(self.timeout);
        match &self.credential {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    async fn send_ok(&self, path: &str) -> Result<Response> {
        let response = self.get(path).send().await?;
        let status = response.status();
        debug!(status = %status, path, "Registry responded");

        if status != StatusCode::OK {
            warn!(status = %status, path, "Registry lookup failed");
            return Err(status_to_error(status));
        }
        Ok(response)
    }

    /// Id of the newest version of a model (the first entry the registry lists).
    #[instrument(level = "debug", skip(self))]
    pub async fn latest_version_id(&self, model_id: &str) -> Result<String> {
        let model: ModelResponse = self
            .send_ok(&format!("/models/{model_id}"))
            .await?
            .json()
            .await?;

        model
            .model_versions
            .first()
            .map(|version| version.id.to_string())
            .ok_or(DownloadError::NoVersions)
    }

    /// Metadata of a version; fails with `NoFiles` when nothing is downloadable.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch(&self, version_id: &str) -> Result<ModelMetadata> {
        let version: VersionResponse = self
            .send_ok(&format!("/model-versions/{version_id}"))
            .await?
            .json()
            .await?;

        let metadata = ModelMetadata::from(version);
        if metadata.files.is_empty() {
            return Err(DownloadError::NoFiles);
        }

        debug!(
            model = %metadata.model_name,
            version = %metadata.version_name,
            files = metadata.files.len(),
            "Fetched version metadata"
        );
        Ok(metadata)
    }
}
