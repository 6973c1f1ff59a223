//! HTTP & WebSocket Integration Tests
//!
//! Router-level tests via `oneshot`, plus one real server for the WebSocket
//! progress channel.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use helpers::{eventually, wav_bytes, write_stem_dir, InstantSeparator};
use http_body_util::BodyExt;
use riff_sp::config::ServiceConfig;
use riff_sp::models::Fingerprint;
use riff_sp::{build_router, AppState};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tower::ServiceExt;
use uuid::Uuid;

const BOUNDARY: &str = "riff-test-boundary";

struct Part<'a> {
    name: &'a str,
    filename: Option<&'a str>,
    content_type: Option<&'a str>,
    data: Vec<u8>,
}

fn file_part<'a>(content_type: &'a str, data: Vec<u8>) -> Part<'a> {
    Part {
        name: "file",
        filename: Some("song.wav"),
        content_type: Some(content_type),
        data,
    }
}

fn multipart_request(parts: &[Part]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(filename) = part.filename {
            disposition.push_str(&format!("; filename=\"{}\"", filename));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        if let Some(content_type) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/process")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn test_state(temp: &TempDir) -> AppState {
    let mut config = ServiceConfig::rooted_at(temp.path());
    config.max_upload_bytes = 64 * 1024;
    AppState::new(config, Arc::new(InstantSeparator::new())).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_method(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// TC-HTTP-001: Health reports service identity and live counters
#[tokio::test]
async fn tc_http_001_health() {
    let temp = TempDir::new().unwrap();
    let app = build_router(test_state(&temp));

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "riff-sp");
    assert_eq!(json["active_jobs"], 0);
    assert_eq!(json["subscribers"], 0);
    assert!(json["uptime_seconds"].is_u64());
    assert!(!json["revision"].as_str().unwrap().is_empty());
}

/// TC-HTTP-002: Valid upload is accepted and ends up in the cache
#[tokio::test]
async fn tc_http_002_upload_accepted() {
    let temp = TempDir::new().unwrap();
    let state = test_state(&temp);
    let app = build_router(state.clone());

    let response = app
        .oneshot(multipart_request(&[file_part("audio/wav", wav_bytes(512, 1))]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "processing");
    assert!(json["client_id"].as_str().unwrap().parse::<Uuid>().is_ok());

    eventually(|| async { state.cache.stats().await.unwrap().entry_count == 1 }).await;
    eventually(|| async { state.orchestrator.active_jobs().await == 0 }).await;

    // Upload spool is empty again
    let leftovers = std::fs::read_dir(&state.config.upload_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("upload-"))
        .count();
    assert_eq!(leftovers, 0);
}

/// TC-HTTP-003: Client-chosen id is honored; reusing it while running conflicts
#[tokio::test]
async fn tc_http_003_client_chosen_id() {
    let temp = TempDir::new().unwrap();
    let state = test_state(&temp);
    let client_id = Uuid::new_v4();
    let id_text = client_id.to_string();

    let response = build_router(state.clone())
        .oneshot(multipart_request(&[
            Part {
                name: "client_id",
                filename: None,
                content_type: None,
                data: id_text.clone().into_bytes(),
            },
            file_part("audio/x-wav", wav_bytes(256, 2)),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["client_id"], id_text);

    let response = build_router(state)
        .oneshot(multipart_request(&[Part {
            name: "client_id",
            filename: None,
            content_type: None,
            data: b"not-a-uuid".to_vec(),
        }]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// TC-HTTP-004: Intake rejects bad media type, oversize, non-audio, empty and
/// missing payloads
#[tokio::test]
async fn tc_http_004_intake_rejections() {
    let temp = TempDir::new().unwrap();
    let state = test_state(&temp);

    let cases: Vec<(Vec<Part>, StatusCode, &str)> = vec![
        (
            vec![file_part("text/plain", b"hello".to_vec())],
            StatusCode::BAD_REQUEST,
            "UNSUPPORTED_MEDIA_TYPE",
        ),
        (
            vec![file_part("audio/wav", wav_bytes(32 * 1024, 3))],
            StatusCode::PAYLOAD_TOO_LARGE,
            "PAYLOAD_TOO_LARGE",
        ),
        (
            vec![file_part("audio/mpeg", b"%PDF-1.7 definitely not audio".to_vec())],
            StatusCode::BAD_REQUEST,
            "UNSUPPORTED_MEDIA_TYPE",
        ),
        (
            vec![file_part("audio/wav", Vec::new())],
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
        ),
        (
            vec![Part {
                name: "other",
                filename: None,
                content_type: None,
                data: b"x".to_vec(),
            }],
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
        ),
    ];

    for (parts, status, code) in cases {
        let response = build_router(state.clone())
            .oneshot(multipart_request(&parts))
            .await
            .unwrap();
        assert_eq!(response.status(), status, "expected {}", code);
        assert_eq!(body_json(response).await["error"]["code"], code);
    }

    // Nothing was queued and no spooled file survived
    assert_eq!(state.orchestrator.active_jobs().await, 0);
    let spooled = std::fs::read_dir(&state.config.upload_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(spooled, 0);
}

/// TC-HTTP-005: Cancel and status of unknown jobs are 404
#[tokio::test]
async fn tc_http_005_unknown_job() {
    let temp = TempDir::new().unwrap();
    let state = test_state(&temp);
    let id = Uuid::new_v4();

    let response = build_router(state.clone())
        .oneshot(with_method("POST", &format!("/api/cancel/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "NOT_FOUND");

    let response = build_router(state)
        .oneshot(get(&format!("/api/jobs/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// TC-HTTP-006: Cache administration endpoints
#[tokio::test]
async fn tc_http_006_cache_admin() {
    let temp = TempDir::new().unwrap();
    let state = test_state(&temp);
    let source = write_stem_dir(&temp.path().join("src"), 8, 1);
    let fp_a: Fingerprint = "00000000000000aa".parse().unwrap();
    let fp_b: Fingerprint = "00000000000000bb".parse().unwrap();
    state.cache.put(&fp_a, &source).await.unwrap();
    state.cache.put(&fp_b, &source).await.unwrap();

    let response = build_router(state.clone())
        .oneshot(get("/api/cache/stats"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats = body_json(response).await;
    assert_eq!(stats["entry_count"], 2);
    assert_eq!(stats["total_bytes"], 64);

    // Malformed fingerprints never reach the filesystem
    let response = build_router(state.clone())
        .oneshot(with_method("DELETE", "/api/cache/NOT-HEX"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = build_router(state.clone())
        .oneshot(with_method("DELETE", "/api/cache/00000000000000aa"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["removed"], 1);

    let response = build_router(state.clone())
        .oneshot(with_method("DELETE", "/api/cache/00000000000000aa"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Fresh entries survive the default horizon
    let response = build_router(state.clone())
        .oneshot(with_method("POST", "/api/cache/prune"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["removed"], 0);

    let response = build_router(state.clone())
        .oneshot(with_method("DELETE", "/api/cache"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["removed"], 1);
    assert_eq!(state.cache.stats().await.unwrap().entry_count, 0);
}

/// TC-HTTP-007: WebSocket ping/pong and progress delivery over a real socket
#[tokio::test]
async fn tc_http_007_websocket_progress_channel() {
    let temp = TempDir::new().unwrap();
    let state = test_state(&temp);
    let hub = state.hub.clone();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });

    let client_id = Uuid::new_v4();
    let (mut socket, _) = connect_async(format!("ws://{}/ws/{}", addr, client_id))
        .await
        .unwrap();
    eventually(|| async { hub.is_registered(client_id).await }).await;

    // Unknown messages are ignored; ping is answered
    socket
        .send(Message::Text(r#"{"type":"subscribe"}"#.to_string()))
        .await
        .unwrap();
    socket
        .send(Message::Text(r#"{"type":"ping"}"#.to_string()))
        .await
        .unwrap();
    let reply = next_json(&mut socket).await;
    assert_eq!(reply, serde_json::json!({"type": "pong"}));

    assert!(hub.send_progress(client_id, 42.0, "Running stem separation...", None).await);
    let progress = next_json(&mut socket).await;
    assert_eq!(progress["type"], "progress");
    assert_eq!(progress["data"]["progress"], 42.0);

    // Closing the socket unregisters the subscriber
    socket.close(None).await.unwrap();
    eventually(|| async { !hub.is_registered(client_id).await }).await;
}

async fn next_json<S>(socket: &mut S) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(std::time::Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for message")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}
