use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use log::{error, info, warn};
use serde::Serialize;
use std::io::Write;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::dj::StatusHandle;
use crate::library::{validate_track_name, TRACK_EXTENSION};
use crate::schedule::{parse_hour, BroadcastWindow};
use crate::store::MetadataStore;

// State for control API handlers
pub struct AppState {
    pub music_dir: PathBuf,
    pub store: Arc<MetadataStore>,
    pub status: StatusHandle,
    pub max_upload_bytes: usize,
}

/// Build the control API router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/playlist", get(playlist_handler))
        .route("/upload", post(upload_handler))
        .route("/delete/{filename}", delete(delete_handler))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(cors)
        .with_state(state)
}

/// Serve the control API until the process exits
pub fn serve(state: AppState, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    println!("Starting control API server");
    println!("Music directory: {}", state.music_dir.display());
    println!("Metadata file: {}", state.store.path().display());
    println!("Listening on: http://[::]:{} (IPv4 + IPv6)", port);
    println!("Endpoints:");
    println!("  POST   /upload             - Upload a track (file, start_hour, end_hour)");
    println!("  GET    /playlist           - Track schedules");
    println!("  DELETE /delete/:filename   - Delete a track");
    println!("  GET    /status             - DJ loop status");
    println!("  GET    /health             - Health check");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let app = router(Arc::new(state));
        let listener = tokio::net::TcpListener::bind(format!("[::]:{}", port)).await?;
        axum::serve(listener, app).await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "detail": detail.into() })),
    )
        .into_response()
}

// Health check endpoint - returns 200 OK if server is running
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status.snapshot())
}

async fn playlist_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.load())
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub info: String,
    pub schedule: String,
    pub filename: String,
    pub start_hour: Option<u8>,
    pub end_hour: Option<u8>,
}

async fn upload_handler(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let mut upload: Option<(String, axum::body::Bytes)> = None;
    let mut start_hour: Option<u8> = None;
    let mut end_hour: Option<u8> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                let detail = format!("Invalid multipart body: {}", e.body_text());
                return error_response(e.status(), detail);
            }
        };

        match field.name().unwrap_or_default().to_string().as_str() {
            "file" => {
                let filename = match field.file_name() {
                    Some(name) => name.to_string(),
                    None => {
                        return error_response(StatusCode::BAD_REQUEST, "File part has no filename")
                    }
                };
                let data = match field.bytes().await {
                    Ok(data) => data,
                    Err(e) => {
                        let detail = format!("Failed to read upload: {}", e.body_text());
                        return error_response(e.status(), detail);
                    }
                };
                upload = Some((filename, data));
            }
            name @ ("start_hour" | "end_hour") => {
                let text = match field.text().await {
                    Ok(text) => text,
                    Err(e) => return error_response(e.status(), e.body_text()),
                };
                let hour = match parse_hour(&text) {
                    Ok(hour) => hour,
                    Err(e) => {
                        return error_response(StatusCode::BAD_REQUEST, format!("{}: {}", name, e))
                    }
                };
                if name == "start_hour" {
                    start_hour = hour;
                } else {
                    end_hour = hour;
                }
            }
            other => {
                warn!("Ignoring unexpected upload field '{}'", other);
            }
        }
    }

    let (filename, data) = match upload {
        Some(upload) => upload,
        None => return error_response(StatusCode::BAD_REQUEST, "Missing 'file' part"),
    };
    if let Err(e) = validate_track_name(&filename) {
        return error_response(StatusCode::BAD_REQUEST, e);
    }
    if is_store_file(&state, &filename).await {
        return error_response(StatusCode::BAD_REQUEST, reserved_name_detail(&filename));
    }
    if !filename.ends_with(TRACK_EXTENSION) {
        warn!(
            "Uploaded '{}' does not end in {}, it will not be played",
            filename, TRACK_EXTENSION
        );
    }

    let window = BroadcastWindow::new(start_hour, end_hour);
    let music_dir = state.music_dir.clone();
    let store = Arc::clone(&state.store);
    let name = filename.clone();
    let size = data.len();

    let saved = tokio::task::spawn_blocking(move || {
        save_upload(&music_dir, &store, &name, &data, window)
    });
    match saved.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Failed to save upload '{}': {}", filename, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
        }
        Err(e) => {
            error!("Upload task for '{}' failed: {}", filename, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Upload task failed");
        }
    }

    info!("Saved '{}' ({} bytes), schedule {}", filename, size, window);
    Json(UploadResponse {
        info: format!("file '{}' saved", filename),
        schedule: window.to_string(),
        filename,
        start_hour: window.start_hour,
        end_hour: window.end_hour,
    })
    .into_response()
}

fn reserved_name_detail(filename: &str) -> String {
    format!("Invalid filename '{}': reserved for the metadata store", filename)
}

/// Whether `filename` in the music directory is the metadata document or its lock
///
/// The document usually lives in the music directory, and writing or removing
/// it through the API would bypass the store's locking.
async fn is_store_file(state: &AppState, filename: &str) -> bool {
    let candidate = state.music_dir.join(filename);
    for reserved in [state.store.path().to_path_buf(), state.store.lock_path()] {
        if reserved.file_name() != candidate.file_name() {
            continue;
        }
        if reserved == candidate {
            return true;
        }
        // Same name, so compare the directories once resolved
        let (Some(a), Some(b)) = (reserved.parent(), candidate.parent()) else {
            continue;
        };
        if let (Ok(a), Ok(b)) = (canonical_dir(a).await, canonical_dir(b).await) {
            if a == b {
                return true;
            }
        }
    }
    false
}

async fn canonical_dir(dir: &FsPath) -> std::io::Result<PathBuf> {
    if dir.as_os_str().is_empty() {
        tokio::fs::canonicalize(".").await
    } else {
        tokio::fs::canonicalize(dir).await
    }
}

/// Write the track, then record its schedule
///
/// The data goes to a temp file in the music directory first and is renamed
/// into place, so the scheduling loop never picks up a half-written track.
fn save_upload(
    music_dir: &FsPath,
    store: &MetadataStore,
    filename: &str,
    data: &[u8],
    window: BroadcastWindow,
) -> Result<(), String> {
    let target = music_dir.join(filename);
    let mut tmp = tempfile::NamedTempFile::new_in(music_dir)
        .map_err(|e| format!("Failed to create temp file in '{}': {}", music_dir.display(), e))?;
    tmp.write_all(data)
        .and_then(|_| tmp.flush())
        .map_err(|e| format!("Failed to write '{}': {}", filename, e))?;
    tmp.persist(&target)
        .map_err(|e| format!("Failed to move upload to '{}': {}", target.display(), e.error))?;

    store
        .upsert(filename, window)
        .map_err(|e| format!("Failed to update metadata for '{}': {}", filename, e))
}

async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Response {
    if let Err(e) = validate_track_name(&filename) {
        return error_response(StatusCode::BAD_REQUEST, e);
    }
    if is_store_file(&state, &filename).await {
        return error_response(StatusCode::BAD_REQUEST, reserved_name_detail(&filename));
    }

    let path = state.music_dir.join(&filename);
    let is_file = match tokio::fs::metadata(&path).await {
        Ok(meta) => meta.is_file(),
        Err(_) => false,
    };
    if !is_file {
        return error_response(StatusCode::NOT_FOUND, "File not found");
    }

    if let Err(e) = tokio::fs::remove_file(&path).await {
        error!("Failed to delete '{}': {}", path.display(), e);
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to delete file: {}", e),
        );
    }

    let store = Arc::clone(&state.store);
    let name = filename.clone();
    match tokio::task::spawn_blocking(move || store.remove(&name)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            // File is gone already; a stale entry is ignored by the loop
            warn!("Deleted '{}' but failed to update metadata: {}", filename, e);
        }
        Err(e) => warn!("Metadata update task for '{}' failed: {}", filename, e),
    }

    info!("Deleted '{}'", filename);
    Json(serde_json::json!({ "status": "deleted" })).into_response()
}
