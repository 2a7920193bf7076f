//! In-process registry and transport fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use modelsync::config::Config;
use modelsync::models::PAYLOAD_FILES;
use modelsync::registry::HttpRegistry;
use modelsync::transport::MirrorTransport;
use modelsync::{Result, SyncError};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
struct RegistryState {
    records: Vec<(String, String)>,
    files: HashMap<(String, String), Vec<u8>>,
    failing: HashSet<String>,
    malformed: bool,
    listing_requests: usize,
    file_requests: usize,
    range_requests: usize,
}

type Shared = Arc<Mutex<RegistryState>>;

/// Registry HTTP API served from memory on an ephemeral port
#[derive(Clone)]
pub struct FakeRegistry {
    pub url: String,
    state: Shared,
}

impl FakeRegistry {
    pub async fn start() -> Self {
        let state = Shared::default();
        let app = Router::new()
            .route("/model", get(list))
            .route("/models/{uuid}/{file}", get(file))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    /// Listed artifact with all payload files downloadable
    pub fn add_artifact(&self, id: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.records.push((id.to_string(), name.to_string()));
        for file in PAYLOAD_FILES {
            state
                .files
                .insert((id.to_string(), file.to_string()), payload(id, file));
        }
    }

    /// Listed artifact without any downloadable files
    pub fn add_record(&self, id: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .records
            .push((id.to_string(), name.to_string()));
    }

    pub fn fail_file(&self, file: &str) {
        self.state.lock().unwrap().failing.insert(file.to_string());
    }

    pub fn heal(&self) {
        self.state.lock().unwrap().failing.clear();
    }

    pub fn set_malformed(&self) {
        self.state.lock().unwrap().malformed = true;
    }

    pub fn listing_requests(&self) -> usize {
        self.state.lock().unwrap().listing_requests
    }

    pub fn file_requests(&self) -> usize {
        self.state.lock().unwrap().file_requests
    }

    pub fn range_requests(&self) -> usize {
        self.state.lock().unwrap().range_requests
    }

    pub fn http(&self) -> HttpRegistry {
        HttpRegistry::new(&self.url, None, Duration::from_secs(5)).unwrap()
    }
}

async fn list(State(state): State<Shared>) -> Response {
    let mut state = state.lock().unwrap();
    state.listing_requests += 1;
    if state.malformed {
        return Json(json!({ "models": [] })).into_response();
    }
    let data: Vec<_> = state
        .records
        .iter()
        .map(|(id, name)| json!({ "uuid": id, "name": name }))
        .collect();
    Json(json!({ "data": data })).into_response()
}

async fn file(
    State(state): State<Shared>,
    UrlPath((uuid, file)): UrlPath<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let mut state = state.lock().unwrap();
    state.file_requests += 1;
    if state.failing.contains(&file) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let Some(body) = state.files.get(&(uuid, file)).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let offset = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.strip_suffix('-'))
        .and_then(|v| v.parse::<usize>().ok());

    match offset {
        None => body.into_response(),
        Some(offset) => {
            state.range_requests += 1;
            if offset >= body.len() {
                StatusCode::RANGE_NOT_SATISFIABLE.into_response()
            } else {
                (StatusCode::PARTIAL_CONTENT, body[offset..].to_vec()).into_response()
            }
        }
    }
}

/// Deterministic payload content for one artifact file
pub fn payload(id: &str, file: &str) -> Vec<u8> {
    format!("{id}:{file};").repeat(64).into_bytes()
}

/// Config with every path inside `temp_dir` and no progress output
pub fn config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    let root = temp_dir.path();
    config.paths.staging_root = root.join("staging");
    config.paths.archive_dir = root.join("archives");
    config.paths.model_store = root.join("models");
    config.paths.upload_dir = root.join("uploads");
    config.transfer.download_attempts = 2;
    config.transfer.retry_delay_ms = 0;
    config.transfer.progress = false;
    config
}

/// Transport that keeps sent bundles in a local directory and, on trigger,
/// can make the artifact appear on a fake mirror
pub struct FakeTransport {
    remote_dir: PathBuf,
    mirror: Option<(FakeRegistry, String, String)>,
    fail_send: bool,
    fail_trigger: bool,
    sends: AtomicUsize,
    triggers: AtomicUsize,
}

impl FakeTransport {
    pub fn new(remote_dir: impl Into<PathBuf>) -> Self {
        let remote_dir = remote_dir.into();
        std::fs::create_dir_all(&remote_dir).unwrap();
        Self {
            remote_dir,
            mirror: None,
            fail_send: false,
            fail_trigger: false,
            sends: AtomicUsize::new(0),
            triggers: AtomicUsize::new(0),
        }
    }

    /// Add `id` to `mirror` when the import is triggered
    pub fn importing_into(mut self, mirror: &FakeRegistry, id: &str, name: &str) -> Self {
        self.mirror = Some((mirror.clone(), id.to_string(), name.to_string()));
        self
    }

    pub fn failing_send(mut self) -> Self {
        self.fail_send = true;
        self
    }

    pub fn failing_trigger(mut self) -> Self {
        self.fail_trigger = true;
        self
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn triggers(&self) -> usize {
        self.triggers.load(Ordering::SeqCst)
    }

    pub fn remote_dir(&self) -> &Path {
        &self.remote_dir
    }
}

#[async_trait]
impl MirrorTransport for FakeTransport {
    fn name(&self) -> &str {
        "fake"
    }

    async fn send(&self, bundle: &Path, _mirror_registry: &str) -> Result<String> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if self.fail_send {
            return Err(SyncError::Transport("connection refused".to_string()));
        }
        let name = bundle.file_name().unwrap();
        let dest = self.remote_dir.join(name);
        std::fs::copy(bundle, &dest)?;
        Ok(dest.display().to_string())
    }

    async fn trigger_import(&self, _mirror_registry: &str) -> Result<()> {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        if self.fail_trigger {
            return Err(SyncError::Transport("remote importer exited with 1".to_string()));
        }
        if let Some((mirror, id, name)) = &self.mirror {
            mirror.add_record(id, name);
        }
        Ok(())
    }
}
