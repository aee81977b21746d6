//! # Control API Tests
//!
//! These tests start the real router on an ephemeral port and exercise the
//! upload / playlist / delete endpoints against a temporary music directory.
//!
//! ## Running the Tests
//!
//! ```bash
//! cargo test --test api_test
//! ```

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;

use radio_dj::api::{router, AppState};
use radio_dj::dj::StatusHandle;
use radio_dj::library::list_tracks;
use radio_dj::schedule::{eligible_tracks, BroadcastWindow};
use radio_dj::store::MetadataStore;

struct TestServer {
    url: String,
    dir: tempfile::TempDir,
    store: Arc<MetadataStore>,
    _handle: tokio::task::JoinHandle<()>,
}

/// Start a test API server over a fresh music directory
async fn start_test_api_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MetadataStore::new(dir.path().join("metadata.json")));

    let state = Arc::new(AppState {
        music_dir: dir.path().to_path_buf(),
        store: Arc::clone(&store),
        status: StatusHandle::new(),
        max_upload_bytes: 1024 * 1024,
    });
    let app = router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("http://{}", addr);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give server time to start
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

    TestServer {
        url,
        dir,
        store,
        _handle: handle,
    }
}

fn track_part(name: &str, data: &[u8]) -> Part {
    Part::bytes(data.to_vec())
        .file_name(name.to_string())
        .mime_str("audio/mpeg")
        .unwrap()
}

async fn upload(server: &TestServer, form: Form) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/upload", server.url))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_upload_with_schedule() {
    let server = start_test_api_server().await;

    let form = Form::new()
        .part("file", track_part("night.mp3", b"ID3 night"))
        .text("start_hour", "22")
        .text("end_hour", "2");
    let response = upload(&server, form).await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["info"], "file 'night.mp3' saved");
    assert_eq!(body["schedule"], "22-2");
    assert_eq!(body["start_hour"], 22);
    assert_eq!(body["end_hour"], 2);

    let saved = std::fs::read(server.dir.path().join("night.mp3")).unwrap();
    assert_eq!(saved, b"ID3 night");
    assert_eq!(
        server.store.load()["night.mp3"],
        BroadcastWindow::new(Some(22), Some(2))
    );
}

#[tokio::test]
async fn test_upload_without_schedule_is_unrestricted() {
    let server = start_test_api_server().await;

    let form = Form::new().part("file", track_part("anytime.mp3", b"ID3"));
    let response = upload(&server, form).await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["schedule"], "None-None");
    assert!(body["start_hour"].is_null());

    // The loop would consider it at every hour
    let tracks = list_tracks(server.dir.path());
    let playlist = server.store.load();
    for hour in 0..24 {
        assert_eq!(
            eligible_tracks(&tracks, &playlist, hour),
            vec!["anytime.mp3".to_string()],
            "hour {}",
            hour
        );
    }
}

#[tokio::test]
async fn test_empty_hour_fields_mean_no_bound() {
    let server = start_test_api_server().await;

    let form = Form::new()
        .part("file", track_part("a.mp3", b"ID3"))
        .text("start_hour", "")
        .text("end_hour", "");
    let response = upload(&server, form).await;
    assert_eq!(response.status(), 200);
    assert_eq!(server.store.load()["a.mp3"], BroadcastWindow::unrestricted());
}

#[tokio::test]
async fn test_reupload_replaces_schedule() {
    let server = start_test_api_server().await;

    let form = Form::new()
        .part("file", track_part("a.mp3", b"v1"))
        .text("start_hour", "9")
        .text("end_hour", "17");
    assert_eq!(upload(&server, form).await.status(), 200);

    let form = Form::new()
        .part("file", track_part("a.mp3", b"v2"))
        .text("start_hour", "18")
        .text("end_hour", "20");
    assert_eq!(upload(&server, form).await.status(), 200);

    let playlist = server.store.load();
    assert_eq!(playlist.len(), 1);
    assert_eq!(playlist["a.mp3"], BroadcastWindow::new(Some(18), Some(20)));
    assert_eq!(std::fs::read(server.dir.path().join("a.mp3")).unwrap(), b"v2");
}

#[tokio::test]
async fn test_upload_rejects_out_of_range_hour() {
    let server = start_test_api_server().await;

    let form = Form::new()
        .part("file", track_part("a.mp3", b"ID3"))
        .text("start_hour", "25");
    let response = upload(&server, form).await;
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("start_hour"));
    assert!(!server.dir.path().join("a.mp3").exists());
    assert!(server.store.load().is_empty());
}

#[tokio::test]
async fn test_upload_requires_file() {
    let server = start_test_api_server().await;

    let form = Form::new().text("start_hour", "3");
    let response = upload(&server, form).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_playlist_returns_metadata() {
    let server = start_test_api_server().await;
    server
        .store
        .upsert("a.mp3", BroadcastWindow::new(Some(6), Some(9)))
        .unwrap();
    server
        .store
        .upsert("b.mp3", BroadcastWindow::unrestricted())
        .unwrap();

    let response = reqwest::get(format!("{}/playlist", server.url)).await.unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["a.mp3"]["start_hour"], 6);
    assert_eq!(body["a.mp3"]["end_hour"], 9);
    assert!(body["b.mp3"]["start_hour"].is_null());
    assert!(body["b.mp3"]["end_hour"].is_null());
}

#[tokio::test]
async fn test_playlist_empty_when_no_metadata() {
    let server = start_test_api_server().await;

    let body: Value = reqwest::get(format!("{}/playlist", server.url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, serde_json::json!({}));
}

#[tokio::test]
async fn test_delete_removes_file_and_metadata() {
    let server = start_test_api_server().await;

    let form = Form::new()
        .part("file", track_part("gone.mp3", b"ID3"))
        .text("start_hour", "1")
        .text("end_hour", "2");
    assert_eq!(upload(&server, form).await.status(), 200);

    let response = reqwest::Client::new()
        .delete(format!("{}/delete/gone.mp3", server.url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "deleted");

    assert!(!server.dir.path().join("gone.mp3").exists());
    assert!(!server.store.load().contains_key("gone.mp3"));
}

#[tokio::test]
async fn test_delete_nonexistent_file_is_not_found() {
    let server = start_test_api_server().await;
    // Entry without a file on disk must survive a failed delete
    server
        .store
        .upsert("ghost.mp3", BroadcastWindow::new(Some(3), Some(4)))
        .unwrap();
    let before = server.store.load();

    let response = reqwest::Client::new()
        .delete(format!("{}/delete/ghost.mp3", server.url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], "File not found");

    assert_eq!(server.store.load(), before);
}

#[tokio::test]
async fn test_health_and_status() {
    let server = start_test_api_server().await;

    let response = reqwest::get(format!("{}/health", server.url)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");

    let body: Value = reqwest::get(format!("{}/status", server.url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["state"], "starting");
    assert_eq!(body["restarts"], 0);
    assert!(body["current_track"].is_null());
}

#[tokio::test]
async fn test_upload_cannot_replace_metadata_document() {
    let server = start_test_api_server().await;
    server
        .store
        .upsert("night.mp3", BroadcastWindow::new(Some(22), Some(2)))
        .unwrap();
    let before = server.store.load();

    for name in ["metadata.json", "metadata.json.lock"] {
        let form = Form::new().part("file", track_part(name, b"garbage"));
        let response = upload(&server, form).await;
        assert_eq!(response.status(), 400, "upload of {}", name);
        let body: Value = response.json().await.unwrap();
        assert!(body["detail"].as_str().unwrap().contains("reserved"));
    }

    assert_eq!(server.store.load(), before);
    let document = std::fs::read_to_string(server.store.path()).unwrap();
    assert!(document.contains("night.mp3"));

    // Later writes still see the existing schedules
    let form = Form::new()
        .part("file", track_part("day.mp3", b"ID3"))
        .text("start_hour", "9")
        .text("end_hour", "17");
    assert_eq!(upload(&server, form).await.status(), 200);
    let playlist = server.store.load();
    assert_eq!(playlist["night.mp3"], BroadcastWindow::new(Some(22), Some(2)));
    assert_eq!(playlist["day.mp3"], BroadcastWindow::new(Some(9), Some(17)));
}

#[tokio::test]
async fn test_delete_cannot_remove_metadata_document() {
    let server = start_test_api_server().await;
    server
        .store
        .upsert("night.mp3", BroadcastWindow::new(Some(22), Some(2)))
        .unwrap();

    for name in ["metadata.json", "metadata.json.lock"] {
        let response = reqwest::Client::new()
            .delete(format!("{}/delete/{}", server.url, name))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400, "delete of {}", name);
    }

    assert!(server.store.path().exists());
    assert!(server.store.lock_path().exists());
    assert_eq!(
        server.store.load()["night.mp3"],
        BroadcastWindow::new(Some(22), Some(2))
    );
}

#[tokio::test]
async fn test_reserved_check_follows_store_location() {
    // Store kept outside the music directory: the same name is an ordinary upload
    let dir = tempfile::tempdir().unwrap();
    let music_dir = dir.path().join("music");
    std::fs::create_dir(&music_dir).unwrap();
    let store = Arc::new(MetadataStore::new(dir.path().join("metadata.json")));

    let state = Arc::new(AppState {
        music_dir: music_dir.clone(),
        store: Arc::clone(&store),
        status: StatusHandle::new(),
        max_upload_bytes: 1024 * 1024,
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

    let form = Form::new().part("file", track_part("metadata.json", b"{}"));
    let response = reqwest::Client::new()
        .post(format!("{}/upload", url))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(music_dir.join("metadata.json").exists());
    assert!(store.load().contains_key("metadata.json"));
}
