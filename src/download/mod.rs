//! Module for downloading model files
//!
//! This module streams registry files to disk and reports progress while it
//! does so.

mod http;
mod progress;

// Re-export the public API
pub use http::Downloader;
pub use progress::{NoProgress, ProgressReporter, Scaled};
