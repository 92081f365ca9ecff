//! In-process stand-ins for the Civitai API and its file host.

use axum::{
    Json, Router,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use reqwest::Client;
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

use crate::civitai::RegistryClient;

#[derive(Default)]
struct Inner {
    models: HashMap<String, Vec<u64>>,
    versions: HashMap<String, Value>,
    model_failures: HashMap<String, u16>,
    version_failures: HashMap<String, u16>,
    files: HashMap<String, Vec<u8>>,
    file_failures: HashMap<String, u16>,
    model_lookups: usize,
    file_requests: usize,
    last_authorization: Option<String>,
    last_file_query: Option<String>,
}

type Shared = Arc<Mutex<Inner>>;

pub struct FakeRegistry {
    pub base: String,
    inner: Shared,
}

async fn get_model(
    State(inner): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut inner = inner.lock().unwrap();
    inner.model_lookups += 1;
    inner.last_authorization = authorization(&headers);

    if let Some(code) = inner.model_failures.get(&id) {
        return StatusCode::from_u16(*code).unwrap().into_response();
    }
    match inner.models.get(&id) {
        Some(versions) => {
            let versions: Vec<Value> = versions.iter().map(|v| json!({ "id": v })).collect();
            Json(json!({ "id": id, "modelVersions": versions })).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_version(
    State(inner): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut inner = inner.lock().unwrap();
    inner.last_authorization = authorization(&headers);

    if let Some(code) = inner.version_failures.get(&id) {
        return StatusCode::from_u16(*code).unwrap().into_response();
    }
    match inner.versions.get(&id) {
        Some(body) => Json(body.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_file(
    State(inner): State<Shared>,
    Path(name): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    let mut inner = inner.lock().unwrap();
    inner.file_requests += 1;
    inner.last_file_query = query;

    if let Some(code) = inner.file_failures.get(&name) {
        return StatusCode::from_u16(*code).unwrap().into_response();
    }
    match inner.files.get(&name) {
        Some(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes.clone(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

impl FakeRegistry {
    pub async fn start() -> Self {
        let inner = Shared::default();
        let app = Router::new()
            .route("/api/v1/models/{id}", get(get_model))
            .route("/api/v1/model-versions/{id}", get(get_version))
            .route("/files/{name}", get(get_file))
            .with_state(inner.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            inner,
        }
    }

    pub fn api_base(&self) -> String {
        format!("{}/api/v1", self.base)
    }

    pub fn client(&self, credential: Option<String>) -> RegistryClient {
        RegistryClient::new(Client::new(), self.api_base(), credential)
    }

    pub fn file_url(&self, name: &str) -> String {
        format!("{}/files/{}", self.base, name)
    }

    pub fn add_model(&self, id: &str, versions: &[u64]) {
        self.inner
            .lock()
            .unwrap()
            .models
            .insert(id.to_string(), versions.to_vec());
    }

    pub fn fail_model(&self, id: &str, code: u16) {
        self.inner
            .lock()
            .unwrap()
            .model_failures
            .insert(id.to_string(), code);
    }

    /// Registers a version whose files point wherever the caller says.
    pub fn add_version(&self, id: &str, model: &str, version: &str, files: &[(&str, &str)]) {
        let files: Vec<Value> = files
            .iter()
            .map(|(name, url)| json!({ "name": name, "downloadUrl": url }))
            .collect();
        let body = json!({
            "id": id,
            "name": version,
            "model": { "name": model },
            "files": files,
        });
        self.inner
            .lock()
            .unwrap()
            .versions
            .insert(id.to_string(), body);
    }

    /// Registers a version with a single file served by this fake.
    pub fn add_hosted_version(&self, id: &str, model: &str, version: &str, file: &str, bytes: &[u8]) {
        let url = self.file_url(file);
        self.add_version(id, model, version, &[(file, url.as_str())]);
        self.host_file(file, bytes);
    }

    pub fn fail_version(&self, id: &str, code: u16) {
        self.inner
            .lock()
            .unwrap()
            .version_failures
            .insert(id.to_string(), code);
    }

    pub fn host_file(&self, name: &str, bytes: &[u8]) {
        self.inner
            .lock()
            .unwrap()
            .files
            .insert(name.to_string(), bytes.to_vec());
    }

    pub fn fail_file(&self, name: &str, code: u16) {
        self.inner
            .lock()
            .unwrap()
            .file_failures
            .insert(name.to_string(), code);
    }

    pub fn model_lookups(&self) -> usize {
        self.inner.lock().unwrap().model_lookups
    }

    pub fn file_requests(&self) -> usize {
        self.inner.lock().unwrap().file_requests
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.inner.lock().unwrap().last_authorization.clone()
    }

    pub fn last_file_query(&self) -> Option<String> {
        self.inner.lock().unwrap().last_file_query.clone()
    }
}

/// A file host that promises `declared` bytes, sends `sent` of them, then hangs up.
pub async fn truncating_host(declared: usize, sent: usize) -> String {
    raw_host(declared, sent, None).await
}

/// A file host that sends headers and part of the body, then goes quiet.
pub async fn stalling_host(declared: usize, sent: usize) -> String {
    raw_host(declared, sent, Some(Duration::from_secs(30))).await
}

async fn raw_host(declared: usize, sent: usize, stall: Option<Duration>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;

            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/octet-stream\r\ncontent-length: {declared}\r\n\r\n"
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&vec![7u8; sent]).await;
            let _ = socket.flush().await;

            if let Some(stall) = stall {
                tokio::time::sleep(stall).await;
            }
            drop(socket);
        }
    });

    format!("http://{addr}/file.safetensors")
}
