//! Progress reporting for downloads
//!
//! The download engine only knows bytes; what a fraction means to the user is
//! decided by whoever hands in the [`ProgressReporter`].

use bytesize::ByteSize;

/// Receives progress notifications, zero or more times per download.
pub trait ProgressReporter: Send + Sync {
    /// `fraction` is always within `0.0..=1.0`
    fn report(&self, fraction: f32, label: &str);
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _fraction: f32, _label: &str) {}
}

impl<F> ProgressReporter for F
where
    F: Fn(f32, &str) + Send + Sync,
{
    fn report(&self, fraction: f32, label: &str) {
        self(fraction, label)
    }
}

/// Forwards to another reporter, squeezing `0..=1` into `start..=end`.
pub struct Scaled<'a> {
    inner: &'a dyn ProgressReporter,
    start: f32,
    end: f32,
}

impl<'a> Scaled<'a> {
    pub fn new(inner: &'a dyn ProgressReporter, start: f32, end: f32) -> Self {
        Self { inner, start, end }
    }
}

impl ProgressReporter for Scaled<'_> {
    fn report(&self, fraction: f32, label: &str) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.inner
            .report(self.start + fraction * (self.end - self.start), label);
    }
}

/// Byte counts of a running download
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    /// Total size of the download in bytes (if the server said)
    pub total_size: Option<u64>,
    /// Number of bytes written so far
    pub downloaded: u64,
}

impl Progress {
    /// Returns None if the total size is unknown
    pub fn fraction(&self) -> Option<f32> {
        match self.total_size {
            Some(0) | None => None,
            Some(total) => Some((self.downloaded as f32 / total as f32).min(1.0)),
        }
    }

    pub fn label(&self) -> String {
        match self.total_size {
            Some(total) => format!(
                "Downloading: {} / {}",
                ByteSize(self.downloaded),
                ByteSize(total)
            ),
            None => format!("Downloading: {}", ByteSize(self.downloaded)),
        }
    }
}
