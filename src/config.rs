//! Config module for civitai-downloader

use std::{path::PathBuf, time::Duration};

use clap::Parser;

pub const DEFAULT_API_BASE: &str = "https://civitai.com/api/v1";

#[derive(Parser, Debug, Clone)]
pub struct Config {
    /// Address the HTTP endpoint binds to
    #[clap(long, env = "CIVDL_HOST", default_value = "0.0.0.0:7861", global = true)]
    pub host: String,

    /// Directory downloaded models are written to, created on demand
    #[clap(
        long,
        env = "CIVDL_MODEL_DIR",
        default_value = "models/Lora",
        global = true
    )]
    pub model_dir: PathBuf,

    /// Directory holding the saved API key and the default key file
    #[clap(long, env = "CIVDL_CONFIG_DIR", default_value_t = get_default_config_dir(), global = true)]
    pub config_dir: String,

    /// Base URL of the Civitai REST API
    #[clap(long, env = "CIVDL_API_BASE", default_value = DEFAULT_API_BASE, global = true)]
    pub api_base: String,

    /// Timeout for model and version lookups
    #[clap(long, env = "CIVDL_API_TIMEOUT", default_value = "30", global = true)]
    pub api_timeout_secs: u64,

    /// Timeout for connecting to the file host and for each read of the body
    #[clap(
        long,
        env = "CIVDL_DOWNLOAD_TIMEOUT",
        default_value = "120",
        global = true
    )]
    pub download_timeout_secs: u64,
}

/// Safely determine the default configuration directory
fn get_default_config_dir() -> String {
    dirs::config_dir()
        .map(|dir| dir.join("civitai-downloader"))
        .and_then(|path| path.to_str().map(String::from))
        .unwrap_or_else(|| ".civitai-downloader".to_string())
}

impl Config {
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone().into()
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}
