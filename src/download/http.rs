//! HTTP download implementation
//!
//! Streams a single registry file into the model directory. A download either
//! leaves a complete, non-empty file behind or nothing at all: every failure
//! after the file was created removes it again.

use futures_util::StreamExt;
use reqwest::{Client, Response, header};
use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
};
use tracing::{debug, error, info, instrument, trace, warn};

use super::progress::{Progress, ProgressReporter};
use crate::civitai::{DownloadError, FileDescriptor, Result, status_to_error};

/// Size of each write to disk
const CHUNK_SIZE: usize = 8 * 1024;

/// A file that made it to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    pub filename: String,
    pub path: PathBuf,
    pub bytes: u64,
}

pub struct Downloader {
    client: Client,
    timeout: Duration,
}

impl Downloader {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(120),
        }
    }

    /// Bounds the wait for response headers and for every body chunk after that.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[instrument(name = "download_file", level = "debug", skip(self, file, credential, progress), fields(file = %file.name))]
    pub async fn download(
        &self,
        file: &FileDescriptor,
        destination_dir: &Path,
        credential: Option<&str>,
        progress: &dyn ProgressReporter,
    ) -> Result<SavedFile> {
        let filename = target_filename(&file.name)?;
        tokio::fs::create_dir_all(destination_dir).await?;
        let path = destination_dir.join(&filename);

        let url = match credential {
            Some(token) => with_token(&file.download_url, token),
            None => file.download_url.clone(),
        };

        // The token-bearing URL never goes to the log.
        info!(url = %file.download_url, path = ?path, "Starting download");

        let response = tokio::time::timeout(self.timeout, self.client.get(&url).send())
            .await
            .map_err(|_| DownloadError::Timeout)??;

        let status = response.status();
        trace!(status = %status, "Got response");
        if !status.is_success() {
            warn!(status = %status, "File host refused download");
            return Err(status_to_error(status));
        }

        let total_size = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|cl| cl.to_str().ok())
            .and_then(|cl| cl.parse::<u64>().ok());

        if let Some(size) = total_size {
            info!(bytes = size, "Download size known");
        } else if let Some(hint) = file.size_hint_bytes() {
            debug!(bytes = hint, "Server sent no length, registry size hint only");
        }

        let out = File::create(&path).await?;

        if let Err(e) = self.stream_to(response, out, total_size, progress).await {
            error!(error = %e, path = ?path, "Download failed, removing partial file");
            discard(&path).await;
            return Err(e);
        }

        let bytes = finished_size(&path).await?;
        info!(bytes, path = ?path, "Download completed");
        Ok(SavedFile {
            filename,
            path,
            bytes,
        })
    }

    async fn stream_to(
        &self,
        response: Response,
        out: File,
        total_size: Option<u64>,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, out);
        let mut stream = response.bytes_stream();
        let mut progress = Progress {
            total_size,
            downloaded: 0,
        };

        while let Some(chunk) = tokio::time::timeout(self.timeout, stream.next())
            .await
            .map_err(|_| DownloadError::Timeout)?
        {
            let chunk = chunk.map_err(|e| {
                if e.is_timeout() {
                    DownloadError::Timeout
                } else {
                    DownloadError::Network(e.to_string())
                }
            })?;
            writer.write_all(&chunk).await?;
            progress.downloaded += chunk.len() as u64;

            trace!(
                bytes = progress.downloaded,
                chunk_size = chunk.len(),
                "Received chunk"
            );

            if let Some(fraction) = progress.fraction() {
                reporter.report(fraction, &progress.label());
            }
        }

        writer.flush().await?;
        writer.shutdown().await?;
        Ok(())
    }
}

/// Appends the API key as a `token` query parameter.
pub fn with_token(url: &str, token: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}token={}", urlencoding::encode(token))
}

/// Keeps only the final path component of a registry-supplied filename.
fn target_filename(name: &str) -> Result<String> {
    let candidate = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();
    if candidate.is_empty() || candidate == "." || candidate == ".." {
        return Err(DownloadError::Unknown(format!(
            "registry returned an unusable filename: {name:?}"
        )));
    }
    Ok(candidate.to_string())
}

/// Size of a fully streamed file. Anything but a readable, non-empty file is
/// removed.
async fn finished_size(path: &Path) -> Result<u64> {
    let bytes = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            error!(error = %e, path = ?path, "Could not inspect downloaded file, removing");
            discard(path).await;
            return Err(e.into());
        }
    };
    if bytes == 0 {
        warn!(path = ?path, "Downloaded file is empty, removing");
        discard(path).await;
        return Err(DownloadError::EmptyFile);
    }
    Ok(bytes)
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = ?path, "Removed partial file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => error!(error = %e, path = ?path, "Failed to remove partial file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::civitai::ErrorKind;
    use crate::download::NoProgress;
    use crate::test_support::{FakeRegistry, stalling_host, truncating_host};
    use std::sync::Mutex;

    fn descriptor(name: &str, url: &str) -> FileDescriptor {
        FileDescriptor {
            name: name.to_string(),
            download_url: url.to_string(),
            size_kb: None,
        }
    }

    #[test]
    fn test_with_token() {
        assert_eq!(with_token("https://x/y", "abc"), "https://x/y?token=abc");
        assert_eq!(
            with_token("https://x/y?type=Model", "abc"),
            "https://x/y?type=Model&token=abc"
        );
        assert_eq!(with_token("https://x/y", "a b&c"), "https://x/y?token=a%20b%26c");
    }

    #[test]
    fn test_target_filename() {
        assert_eq!(target_filename("lora.safetensors").unwrap(), "lora.safetensors");
        assert_eq!(target_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(target_filename("dir\\evil.pt").unwrap(), "evil.pt");
        assert!(target_filename("").is_err());
        assert!(target_filename("foo/..").is_err());
        assert!(target_filename("trailing/").is_err());
    }

    #[tokio::test]
    async fn test_download_writes_file_and_reports_progress() {
        let host = FakeRegistry::start().await;
        let body = vec![42u8; 100_000];
        host.host_file("lora.safetensors", &body);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("models").join("Lora");

        let seen = Mutex::new(Vec::new());
        let reporter = |fraction: f32, _label: &str| seen.lock().unwrap().push(fraction);

        let saved = Downloader::new(Client::new())
            .download(
                &descriptor("lora.safetensors", &host.file_url("lora.safetensors")),
                &dest,
                None,
                &reporter,
            )
            .await
            .unwrap();

        assert_eq!(saved.filename, "lora.safetensors");
        assert_eq!(saved.path, dest.join("lora.safetensors"));
        assert_eq!(saved.bytes, 100_000);
        assert_eq!(std::fs::read(&saved.path).unwrap(), body);

        let seen = seen.into_inner().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.iter().all(|f| (0.0..=1.0).contains(f)));
        assert_eq!(*seen.last().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_token_goes_into_query() {
        let host = FakeRegistry::start().await;
        host.host_file("a.pt", b"data");
        let dir = tempfile::tempdir().unwrap();

        Downloader::new(Client::new())
            .download(
                &descriptor("a.pt", &format!("{}?type=Model", host.file_url("a.pt"))),
                dir.path(),
                Some("k3y"),
                &NoProgress,
            )
            .await
            .unwrap();

        assert_eq!(host.last_file_query().as_deref(), Some("type=Model&token=k3y"));
    }

    #[tokio::test]
    async fn test_refused_status_writes_nothing() {
        let host = FakeRegistry::start().await;
        let dir = tempfile::tempdir().unwrap();

        for (code, kind) in [
            (401, ErrorKind::Auth),
            (403, ErrorKind::Forbidden),
            (404, ErrorKind::NotFound),
            (429, ErrorKind::RateLimited),
            (500, ErrorKind::Server),
        ] {
            let name = format!("f{code}.safetensors");
            host.fail_file(&name, code);
            let err = Downloader::new(Client::new())
                .download(&descriptor(&name, &host.file_url(&name)), dir.path(), None, &NoProgress)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), kind, "status {code}");
            assert!(!dir.path().join(&name).exists());
        }
    }

    #[tokio::test]
    async fn test_empty_file_is_removed() {
        let host = FakeRegistry::start().await;
        host.host_file("empty.safetensors", b"");
        let dir = tempfile::tempdir().unwrap();

        let err = Downloader::new(Client::new())
            .download(
                &descriptor("empty.safetensors", &host.file_url("empty.safetensors")),
                dir.path(),
                None,
                &NoProgress,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EmptyFile);
        assert!(!dir.path().join("empty.safetensors").exists());
    }

    #[tokio::test]
    async fn test_finished_size() {
        let dir = tempfile::tempdir().unwrap();

        let full = dir.path().join("full.pt");
        std::fs::write(&full, b"weights").unwrap();
        assert_eq!(finished_size(&full).await.unwrap(), 7);
        assert!(full.exists());

        let empty = dir.path().join("empty.pt");
        std::fs::write(&empty, b"").unwrap();
        assert_eq!(finished_size(&empty).await.unwrap_err().kind(), ErrorKind::EmptyFile);
        assert!(!empty.exists());

        // parent component is a regular file, so the path cannot be inspected
        let unreadable = full.join("nested.pt");
        assert_eq!(finished_size(&unreadable).await.unwrap_err().kind(), ErrorKind::Io);
        assert!(full.exists());
    }

    #[tokio::test]
    async fn test_dropped_connection_leaves_no_file() {
        let url = truncating_host(1000, 400).await;
        let dir = tempfile::tempdir().unwrap();

        let err = Downloader::new(Client::new())
            .download(&descriptor("cut.safetensors", &url), dir.path(), None, &NoProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Network(_)), "{err:?}");
        assert!(!dir.path().join("cut.safetensors").exists());
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        let url = stalling_host(1000, 400).await;
        let dir = tempfile::tempdir().unwrap();

        let err = Downloader::new(Client::new())
            .with_timeout(Duration::from_millis(300))
            .download(&descriptor("slow.safetensors", &url), dir.path(), None, &NoProgress)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!dir.path().join("slow.safetensors").exists());
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let dir = tempfile::tempdir().unwrap();
        let err = Downloader::new(Client::new())
            .download(
                &descriptor("x.pt", "http://127.0.0.1:9/x.pt"),
                dir.path(),
                None,
                &NoProgress,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!dir.path().join("x.pt").exists());
    }

    #[tokio::test]
    async fn test_repeat_download_fetches_again() {
        let host = FakeRegistry::start().await;
        host.host_file("twice.pt", b"first");
        let dir = tempfile::tempdir().unwrap();
        let file = descriptor("twice.pt", &host.file_url("twice.pt"));
        let downloader = Downloader::new(Client::new());

        downloader.download(&file, dir.path(), None, &NoProgress).await.unwrap();
        host.host_file("twice.pt", b"second!");
        let saved = downloader.download(&file, dir.path(), None, &NoProgress).await.unwrap();

        assert_eq!(host.file_requests(), 2);
        assert_eq!(std::fs::read(saved.path).unwrap(), b"second!");
    }
}
