//! Terminal front end: one link in, one status text out.

use reqwest::Client;
use std::{
    io::Write,
    sync::atomic::{AtomicI32, Ordering},
};
use tracing::warn;

use crate::credentials::CredentialStore;
use crate::download::ProgressReporter;
use crate::job::{DownloadJob, DownloadOutcome, JobSettings};

/// Prints a progress line to stderr whenever the whole percentage changes.
#[derive(Debug)]
pub struct TerminalProgress {
    last_percent: AtomicI32,
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self {
            last_percent: AtomicI32::new(-1),
        }
    }
}

impl ProgressReporter for TerminalProgress {
    fn report(&self, fraction: f32, label: &str) {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).floor() as i32;
        if self.last_percent.swap(percent, Ordering::Relaxed) == percent {
            return;
        }
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "[{percent:>3}%] {label}");
    }
}

/// Renders an outcome the way the terminal shows it.
pub fn status_text(outcome: &DownloadOutcome) -> String {
    match outcome {
        DownloadOutcome::Success(model) => format!(
            "✅ Downloaded successfully!\n\nModel: {}\nVersion: {}\nFile: {}\nPath: {}",
            model.model_name,
            model.version_name,
            model.filename,
            model.path.display()
        ),
        DownloadOutcome::Failure(failure) => format!("❌ {}", failure.message()),
    }
}

/// Applies the key the user typed: a non-empty key is saved, an empty one
/// forgets the saved key, no key at all leaves the store alone.
pub async fn remember_api_key(store: &CredentialStore, api_key: Option<&str>) {
    let Some(api_key) = api_key else {
        return;
    };
    let api_key = api_key.trim();

    let result = if api_key.is_empty() {
        store.clear().await
    } else {
        store.save(api_key).await
    };
    if let Err(e) = result {
        warn!(error = %e, "Could not update saved API key");
    }
}

/// Runs one download for a person at a terminal.
pub async fn download(
    http: Client,
    settings: &JobSettings,
    store: &CredentialStore,
    url: &str,
    api_key: Option<&str>,
    progress: &dyn ProgressReporter,
) -> DownloadOutcome {
    remember_api_key(store, api_key).await;
    let credential = store.resolve(api_key).await;
    DownloadJob::new(http, settings, credential)
        .run(url, progress)
        .await
}
