//! Model link parsing
//!
//! Accepts the two shapes users paste from the site:
//!
//! - `https://civitai.com/models/123456?modelVersionId=789` names a version directly
//! - `https://civitai.com/models/123456/some-slug` names a model; its newest version is looked up

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, instrument};

use super::{DownloadError, ModelReference, RegistryClient, Result};

static VERSION_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"modelVersionId=(\d+)").expect("valid regex"));

static MODEL_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|/)models/(\d+)").expect("valid regex"));

/// What a link points at before any network lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Version(String),
    Model(String),
}

/// Parses a link without touching the network.
pub fn parse_link(url: &str) -> Result<LinkTarget> {
    let url = url.trim();
    if url.is_empty() {
        return Err(DownloadError::InvalidReference(
            "enter a link to the model".to_string(),
        ));
    }

    if let Some(caps) = VERSION_PARAM.captures(url) {
        return Ok(LinkTarget::Version(caps[1].to_string()));
    }

    if let Some(caps) = MODEL_PATH.captures(url) {
        return Ok(LinkTarget::Model(caps[1].to_string()));
    }

    Err(DownloadError::InvalidReference(
        "could not extract model id from link".to_string(),
    ))
}

/// Resolves a link to the version that should be downloaded.
///
/// A model link costs exactly one lookup; a version link costs none.
#[instrument(level = "debug", skip(client))]
pub async fn resolve(url: &str, client: &RegistryClient) -> Result<ModelReference> {
    let version_id = match parse_link(url)? {
        LinkTarget::Version(id) => {
            debug!(version_id = %id, "Version id taken from link");
            id
        }
        LinkTarget::Model(model_id) => {
            debug!(model_id = %model_id, "Looking up latest version");
            client.latest_version_id(&model_id).await?
        }
    };

    Ok(ModelReference {
        version_id,
        url: url.trim().to_string(),
    })
}
