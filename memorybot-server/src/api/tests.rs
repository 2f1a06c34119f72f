use super::*;
use axum::body::Body;
use axum::http::Request;
use http_body_util::BodyExt;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use memorybot_core::store::sqlite::SqliteVectorStore;
use memorybot_core::store::{Metadata, Record, keys};
use memorybot_core::testutil::{MockAnalyzer, MockDescriber, MockEmbedder, MockProvider};

// ── Helpers ─────────────────────────────────────────────────────────

const BOUNDARY: &str = "memorybot-test-boundary";

fn test_config(images_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.paths.images_dir = images_dir.display().to_string();
    config.paths.storage_root = String::new();
    config.paths.serving_root = String::new();
    config.ingest.min_interval_ms = 0;
    config.ingest.max_retries = 0;
    config
}

fn test_state_with(
    images_dir: &std::path::Path,
    provider: MockProvider,
) -> Arc<AppState<MockProvider>> {
    Arc::new(AppState::new(
        test_config(images_dir),
        provider,
        Arc::new(MockEmbedder::new(4)),
        Arc::new(SqliteVectorStore::open_in_memory("images", 4).unwrap()),
        Arc::new(MockDescriber::new()),
        Arc::new(MockAnalyzer::new()),
    ))
}

fn test_app(images_dir: &std::path::Path) -> (Arc<AppState<MockProvider>>, Router) {
    let state = test_state_with(images_dir, MockProvider::new(&["Here ", "you go."]));
    (state.clone(), router(state))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

async fn delete(app: &Router, uri: &str) -> StatusCode {
    send(app, Request::builder().method("DELETE").uri(uri).body(Body::empty()).unwrap())
        .await
        .0
}

fn multipart_body(files: &[(&str, &[u8])]) -> Body {
    let mut body = Vec::new();
    for (name, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    Body::from(body)
}

async fn upload(app: &Router, files: &[(&str, &[u8])]) -> (StatusCode, serde_json::Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(multipart_body(files))
            .unwrap(),
    )
    .await
}

fn write_image(dir: &std::path::Path, name: &str) {
    std::fs::write(dir.join(name), [0u8; 16]).unwrap();
}

// ── Health & warnings ───────────────────────────────────────────────

#[tokio::test]
async fn health_reports_embedder_and_record_count() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = test_app(dir.path());

    let (status, json) = get_json(&app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["model_name"], "mock-embedder");
    assert_eq!(json["dimensions"], 4);
    assert_eq!(json["collection"], "images");
    assert_eq!(json["records"], 0);
}

#[tokio::test]
async fn warnings_start_empty() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = test_app(dir.path());
    let (status, json) = get_json(&app, "/api/warnings").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, serde_json::json!([]));
}

// ── Upload, gallery, detail ─────────────────────────────────────────

#[tokio::test]
async fn upload_saves_and_ingests_files() {
    let dir = tempfile::tempdir().unwrap();
    let (state, app) = test_app(dir.path());

    let (status, json) = upload(&app, &[("girl.jpg", b"jpeg"), ("sky.png", b"png")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["saved"].as_array().unwrap().len(), 2);
    assert_eq!(json["ingested"]["succeeded"].as_array().unwrap().len(), 2);
    assert!(dir.path().join("girl.jpg").is_file());
    assert_eq!(state.store.count().unwrap(), 2);

    let (_, gallery) = get_json(&app, "/api/gallery").await;
    let paths: Vec<&str> = gallery
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_str().unwrap())
        .collect();
    assert_eq!(paths.len(), 2);
    assert!(paths[0].ends_with("girl.jpg"));
    assert!(paths[1].ends_with("sky.png"));
}

#[tokio::test]
async fn upload_rejects_unsupported_extension() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = test_app(dir.path());

    let (status, json) = upload(&app, &[("notes.txt", b"hello")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "bad_request");
    assert!(!dir.path().join("notes.txt").exists());
}

#[tokio::test]
async fn upload_strips_directories_from_file_names() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = test_app(dir.path());

    let (status, _) = upload(&app, &[("../../escape.jpg", b"jpeg")]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(dir.path().join("escape.jpg").is_file());
}

#[tokio::test]
async fn image_detail_returns_normalized_entry() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = test_app(dir.path());
    upload(&app, &[("girl.jpg", b"jpeg")]).await;

    let path = dir.path().join("girl.jpg").display().to_string();
    let (status, json) = get_json(&app, &format!("/api/images?image={path}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["image_path"], path);
    assert_eq!(json["document"], "A photo of girl");
    assert_eq!(json["color_palette"], serde_json::json!(["red", "blue"]));
    assert_eq!(json["potential_use_cases"], serde_json::json!([]));
}

#[tokio::test]
async fn image_detail_unknown_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = test_app(dir.path());
    let (status, json) = get_json(&app, "/api/images?image=missing.jpg").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "not_found");
}

#[tokio::test]
async fn duplicate_paths_surface_as_warnings() {
    let dir = tempfile::tempdir().unwrap();
    let (state, app) = test_app(dir.path());
    for id in ["first", "second"] {
        let mut metadata = Metadata::new();
        metadata.insert(keys::IMAGE_PATH.into(), "shared.jpg".into());
        state
            .store
            .upsert(Record {
                id: id.into(),
                embedding: vec![1.0, 0.0, 0.0, 0.0],
                document: id.into(),
                metadata,
            })
            .unwrap();
    }

    let (status, json) = get_json(&app, "/api/images?image=shared.jpg").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["document"], "second");

    let (_, warnings) = get_json(&app, "/api/warnings").await;
    let warnings = warnings.as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["code"], "path_collision");

    assert_eq!(delete(&app, "/api/collection").await, StatusCode::NO_CONTENT);
    let (_, warnings) = get_json(&app, "/api/warnings").await;
    assert_eq!(warnings, serde_json::json!([]));
}

#[tokio::test]
async fn gallery_listing_reports_duplicate_paths() {
    let dir = tempfile::tempdir().unwrap();
    let (state, app) = test_app(dir.path());
    for id in ["first", "second"] {
        let mut metadata = Metadata::new();
        metadata.insert(keys::IMAGE_PATH.into(), "shared.jpg".into());
        state
            .store
            .upsert(Record {
                id: id.into(),
                embedding: vec![1.0, 0.0, 0.0, 0.0],
                document: id.into(),
                metadata,
            })
            .unwrap();
    }

    let (status, gallery) = get_json(&app, "/api/gallery").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(gallery, serde_json::json!(["shared.jpg"]));

    let (_, warnings) = get_json(&app, "/api/warnings").await;
    let warnings = warnings.as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["code"], "path_collision");
    assert!(warnings[0]["message"].as_str().unwrap().contains("keeping 'second'"));
}

// ── Search ──────────────────────────────────────────────────────────

#[tokio::test]
async fn search_without_query_reports_status() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = test_app(dir.path());

    let (status, json) = post_json(&app, "/api/search", serde_json::json!({ "text": "" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"]["kind"], "no_query");
    assert_eq!(json["results"], serde_json::json!([]));
}

#[tokio::test]
async fn search_text_returns_at_most_top_k() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = test_app(dir.path());
    upload(&app, &[("a.jpg", b"a"), ("b.jpg", b"b"), ("c.jpg", b"c")]).await;

    let (status, json) = post_json(
        &app,
        "/api/search",
        serde_json::json!({ "text": "a photo", "top_k": 2 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"]["kind"], "ok");
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0]["score"].as_f64().unwrap() >= results[1]["score"].as_f64().unwrap());
    assert!(results[0]["tags"].is_array());
}

#[tokio::test]
async fn search_negative_top_k_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = test_app(dir.path());
    upload(&app, &[("a.jpg", b"a")]).await;

    let (status, json) = post_json(
        &app,
        "/api/search",
        serde_json::json!({ "text": "a photo", "top_k": -3 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"]["kind"], "ok");
    assert_eq!(json["results"], serde_json::json!([]));
}

#[tokio::test]
async fn search_by_uploaded_image_with_both_strategies() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = test_app(dir.path());
    upload(&app, &[("a.jpg", b"a"), ("b.jpg", b"b")]).await;

    for strategy in ["score", "vector"] {
        let (status, json) = post_json(
            &app,
            "/api/search",
            serde_json::json!({ "text": "a photo", "image": "a.jpg", "strategy": strategy }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "strategy {strategy}");
        assert_eq!(json["results"].as_array().unwrap().len(), 2);
    }
}

#[tokio::test]
async fn search_unknown_image_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = test_app(dir.path());
    let (status, _) = post_json(&app, "/api/search", serde_json::json!({ "image": "nope.jpg" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Chat ────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_creates_session_and_records_history() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = test_app(dir.path());
    upload(&app, &[("girl.jpg", b"jpeg")]).await;

    let (status, json) = post_json(&app, "/api/chat", serde_json::json!({ "text": "Who is this?" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["response"], "Here you go.");
    assert_eq!(json["status"]["kind"], "ok");
    assert!(json["retrieved_context"].as_str().unwrap().starts_with("Document 1:"));
    let session_id = json["session_id"].as_str().unwrap().to_string();

    let (status, json) = get_json(&app, &format!("/api/chat/{session_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let history = json["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["content"]["type"], "user_text");
    assert_eq!(history[1]["content"]["type"], "assistant_text");
}

#[tokio::test]
async fn chat_reuses_given_session() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = test_app(dir.path());

    for _ in 0..2 {
        let (status, json) = post_json(
            &app,
            "/api/chat",
            serde_json::json!({ "session_id": "abc", "text": "hello" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["session_id"], "abc");
    }

    let (_, json) = get_json(&app, "/api/chat/abc").await;
    assert_eq!(json["history"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn chat_with_image_only_uses_fallback_prompt() {
    let dir = tempfile::tempdir().unwrap();
    write_image(dir.path(), "query.jpg");
    let (_, app) = test_app(dir.path());

    let (status, json) = post_json(
        &app,
        "/api/chat",
        serde_json::json!({ "session_id": "img", "image": "query.jpg" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, json_history) = get_json(&app, "/api/chat/img").await;
    let first = &json_history["history"][0];
    assert_eq!(first["content"]["type"], "user_text_with_image");
    assert_eq!(first["content"]["text"], "Describe this image");
    assert_eq!(json["session_id"], "img");
}

#[tokio::test]
async fn chat_without_query_leaves_history_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = test_app(dir.path());

    let (status, json) = post_json(&app, "/api/chat", serde_json::json!({ "session_id": "empty" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"]["kind"], "no_query");
    assert_eq!(json["response"], "Please provide a text query or image to search.");

    let (_, json) = get_json(&app, "/api/chat/empty").await;
    assert_eq!(json["history"], serde_json::json!([]));
}

#[tokio::test]
async fn chat_provider_failure_is_bad_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state_with(dir.path(), MockProvider::failing());
    let app = router(state);

    let (status, json) = post_json(&app, "/api/chat", serde_json::json!({ "text": "hi" })).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], "external_service_error");
}

#[tokio::test]
async fn reset_session_removes_it_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (state, app) = test_app(dir.path());
    post_json(&app, "/api/chat", serde_json::json!({ "session_id": "s", "text": "hi" })).await;
    post_json(&app, "/api/chat", serde_json::json!({ "text": "anonymous" })).await;
    assert_eq!(state.sessions.len(), 2);

    assert_eq!(delete(&app, "/api/chat/s").await, StatusCode::NO_CONTENT);
    assert_eq!(delete(&app, "/api/chat/s").await, StatusCode::NO_CONTENT);
    assert_eq!(delete(&app, "/api/chat/unknown").await, StatusCode::NO_CONTENT);
    assert_eq!(state.sessions.len(), 1);

    let (status, _) = get_json(&app, "/api/chat/s").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    post_json(&app, "/api/chat", serde_json::json!({ "session_id": "s", "text": "again" })).await;
    let (_, json) = get_json(&app, "/api/chat/s").await;
    assert_eq!(json["history"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_session_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = test_app(dir.path());
    let (status, _) = get_json(&app, "/api/chat/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Ingest & collection ─────────────────────────────────────────────

#[tokio::test]
async fn ingest_defaults_to_images_dir() {
    let dir = tempfile::tempdir().unwrap();
    write_image(dir.path(), "one.jpg");
    write_image(dir.path(), "two.png");
    write_image(dir.path(), "skip.txt");
    let (state, app) = test_app(dir.path());

    let (status, json) = post_json(&app, "/api/ingest", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["succeeded"].as_array().unwrap().len(), 2);
    assert_eq!(json["failed"], serde_json::json!([]));
    assert_eq!(state.store.count().unwrap(), 2);
}

#[tokio::test]
async fn ingest_missing_directory_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = test_app(dir.path());
    let (status, _) = post_json(
        &app,
        "/api/ingest",
        serde_json::json!({ "directory": "/nonexistent/memorybot" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reset_collection_empties_store() {
    let dir = tempfile::tempdir().unwrap();
    let (state, app) = test_app(dir.path());
    upload(&app, &[("a.jpg", b"a")]).await;
    assert_eq!(state.store.count().unwrap(), 1);

    assert_eq!(delete(&app, "/api/collection").await, StatusCode::NO_CONTENT);
    assert_eq!(state.store.count().unwrap(), 0);
    let (_, gallery) = get_json(&app, "/api/gallery").await;
    assert_eq!(gallery, serde_json::json!([]));
}

// ── Static files ────────────────────────────────────────────────────

#[tokio::test]
async fn static_files_are_served_as_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let static_dir = tempfile::tempdir().unwrap();
    std::fs::write(static_dir.path().join("index.html"), "<h1>memorybot</h1>").unwrap();
    let (_, app) = test_app(dir.path());
    let app = app.fallback_service(ServeDir::new(static_dir.path()));

    let response = app
        .oneshot(Request::builder().uri("/index.html").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"<h1>memorybot</h1>");
}
