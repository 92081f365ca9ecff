//! Data structures for the Civitai registry
//!
//! Wire types mirror the JSON the REST API returns; only the fields this tool
//! reads are declared, everything else is ignored by serde.

use serde::Deserialize;

/// A resolved link: the version to download and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReference {
    /// Registry id of the specific model version (digits only)
    pub version_id: String,
    /// The link as the user supplied it
    pub url: String,
}

/// Response of `GET /models/{id}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResponse {
    #[serde(default)]
    pub model_versions: Vec<VersionSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionSummary {
    pub id: u64,
}

/// Response of `GET /model-versions/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct VersionResponse {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<ParentModel>,
    #[serde(default)]
    pub files: Vec<FileDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParentModel {
    #[serde(default)]
    pub name: Option<String>,
}

/// One downloadable file of a model version.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub name: String,
    pub download_url: String,
    /// Size hint as reported by the registry
    #[serde(default, rename = "sizeKB")]
    pub size_kb: Option<f64>,
}

impl FileDescriptor {
    pub fn size_hint_bytes(&self) -> Option<u64> {
        self.size_kb.map(|kb| (kb * 1024.0) as u64)
    }
}

/// Everything needed to download one model version.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    pub model_name: String,
    pub version_name: String,
    /// In registry order; the first entry is the one that gets downloaded
    pub files: Vec<FileDescriptor>,
}

impl From<VersionResponse> for ModelMetadata {
    fn from(resp: VersionResponse) -> Self {
        Self {
            model_name: resp
                .model
                .and_then(|m| m.name)
                .unwrap_or_else(|| "Unknown".to_string()),
            version_name: resp.name.unwrap_or_default(),
            files: resp.files,
        }
    }
}

impl ModelMetadata {
    pub fn primary_file(&self) -> Option<&FileDescriptor> {
        self.files.first()
    }
}
