//! One download request, start to finish.
//!
//! A [`DownloadJob`] is built fresh for every invocation and owns everything
//! that is specific to it, the credential included. It walks
//! `Idle → ResolvingReference → FetchingMetadata → Downloading` and ends in
//! `Succeeded` or `Failed`; the first error ends the job, nothing is retried.

use reqwest::Client;
use std::{fmt, path::PathBuf, time::Duration};
use tracing::{debug, info, instrument, warn};

use crate::civitai::{self, DownloadError, ErrorKind, RegistryClient};
use crate::config::Config;
use crate::credentials::Credential;
use crate::download::{Downloader, ProgressReporter, Scaled};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    ResolvingReference,
    FetchingMetadata,
    Downloading,
    Succeeded,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ResolvingReference => "resolving reference",
            Self::FetchingMetadata => "fetching metadata",
            Self::Downloading => "downloading",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Settings shared by every job of a process.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub api_base: String,
    pub model_dir: PathBuf,
    pub api_timeout: Duration,
    pub download_timeout: Duration,
}

impl From<&Config> for JobSettings {
    fn from(config: &Config) -> Self {
        Self {
            api_base: config.api_base.clone(),
            model_dir: config.model_dir.clone(),
            api_timeout: config.api_timeout(),
            download_timeout: config.download_timeout(),
        }
    }
}

/// What a successful job left on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedModel {
    pub filename: String,
    pub path: PathBuf,
    pub model_name: String,
    pub version_name: String,
}

#[derive(Debug)]
pub struct JobFailure {
    /// Stage the job was in when it failed
    pub stage: Stage,
    pub error: DownloadError,
}

impl JobFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

#[derive(Debug)]
pub enum DownloadOutcome {
    Success(DownloadedModel),
    Failure(JobFailure),
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

pub struct DownloadJob {
    registry: RegistryClient,
    downloader: Downloader,
    model_dir: PathBuf,
    credential: Option<Credential>,
    stage: Stage,
}

impl DownloadJob {
    pub fn new(http: Client, settings: &JobSettings, credential: Option<Credential>) -> Self {
        let token = credential.as_ref().map(|c| c.token.clone());
        Self {
            registry: RegistryClient::new(http.clone(), settings.api_base.clone(), token)
                .with_timeout(settings.api_timeout),
            downloader: Downloader::new(http).with_timeout(settings.download_timeout),
            model_dir: settings.model_dir.clone(),
            credential,
            stage: Stage::Idle,
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(from = %self.stage, to = %stage, "Job stage change");
        self.stage = stage;
    }

    #[instrument(name = "download_job", skip(self, progress), fields(source = ?self.credential.as_ref().map(|c| c.source)))]
    pub async fn run(mut self, url: &str, progress: &dyn ProgressReporter) -> DownloadOutcome {
        match self.execute(url, progress).await {
            Ok(model) => {
                self.enter(Stage::Succeeded);
                info!(
                    model = %model.model_name,
                    version = %model.version_name,
                    path = ?model.path,
                    "Model downloaded"
                );
                DownloadOutcome::Success(model)
            }
            Err(error) => {
                let failure = JobFailure {
                    stage: self.stage,
                    error,
                };
                self.enter(Stage::Failed);
                warn!(
                    stage = %failure.stage,
                    kind = %failure.kind(),
                    error = %failure.error,
                    "Download job failed"
                );
                DownloadOutcome::Failure(failure)
            }
        }
    }

    async fn execute(
        &mut self,
        url: &str,
        progress: &dyn ProgressReporter,
    ) -> civitai::Result<DownloadedModel> {
        self.enter(Stage::ResolvingReference);
        progress.report(0.0, "Resolving model link...");
        let reference = civitai::resolve(url, &self.registry).await?;
        debug!(version_id = %reference.version_id, url = %reference.url, "Resolved link");

        self.enter(Stage::FetchingMetadata);
        progress.report(0.2, "Fetching model information...");
        let metadata = self.registry.fetch(&reference.version_id).await?;
        let file = metadata.primary_file().ok_or(DownloadError::NoFiles)?;

        self.enter(Stage::Downloading);
        progress.report(0.3, &format!("Downloading {}...", file.name));
        let token = self.credential.as_ref().map(|c| c.token.as_str());
        let saved = self
            .downloader
            .download(file, &self.model_dir, token, &Scaled::new(progress, 0.3, 1.0))
            .await?;

        Ok(DownloadedModel {
            filename: saved.filename,
            path: saved.path,
            model_name: metadata.model_name,
            version_name: metadata.version_name,
        })
    }
}
