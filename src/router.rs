//! HTTP endpoint for remote callers (chat bots and the like).
//!
//! `POST /civitai/download` always answers 200 with a JSON body; callers
//! branch on `success` rather than on the HTTP status.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{instrument, warn};

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::download::NoProgress;
use crate::job::{DownloadJob, DownloadOutcome, JobSettings};

pub const SERVICE_NAME: &str = "civitai-downloader";

/// Shared, read-only state of the HTTP service. Nothing per-request lives here.
#[derive(Clone)]
pub struct AppState {
    pub http: Client,
    pub settings: Arc<JobSettings>,
    pub store: CredentialStore,
}

impl AppState {
    pub fn new(http: Client, config: &Config) -> Self {
        Self {
            http,
            settings: Arc::new(JobSettings::from(config)),
            store: CredentialStore::new(config.config_dir()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DownloadResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadResponse {
    pub fn failure(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

impl From<DownloadOutcome> for DownloadResponse {
    fn from(outcome: DownloadOutcome) -> Self {
        match outcome {
            DownloadOutcome::Success(model) => Self {
                success: true,
                message: "Model downloaded successfully".to_string(),
                filename: Some(model.filename),
                path: Some(model.path.display().to_string()),
                model_name: Some(model.model_name),
                version_name: Some(model.version_name),
                error: None,
            },
            DownloadOutcome::Failure(failure) => Self::failure(
                format!("Download failed while {}", failure.stage),
                failure.message(),
            ),
        }
    }
}

#[instrument(skip_all)]
pub async fn download_model(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Json<DownloadResponse> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection, "Rejected download request body");
            return Json(DownloadResponse::failure(
                "Invalid request",
                rejection.body_text(),
            ));
        }
    };

    let credential = state.store.resolve(request.api_key.as_deref()).await;
    let outcome = DownloadJob::new(state.http.clone(), &state.settings, credential)
        .run(&request.url, &NoProgress)
        .await;

    Json(outcome.into())
}

pub async fn service_status() -> Json<Value> {
    Json(json!({ "status": "online", "service": SERVICE_NAME }))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/civitai/download", post(download_model))
        .route("/civitai/status", get(service_status))
        .fallback(|| async {
            (
                StatusCode::NOT_FOUND,
                Json(DownloadResponse::failure("Not Found", "no such endpoint")),
            )
                .into_response()
        })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
