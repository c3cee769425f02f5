//! HTTP gateway tests driving the router in-process.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use ara_index::config::{BackendKind, BlobConfig, Config};
use ara_index::indexer::Indexer;
use ara_index::server::router;
use ara_index::store::{
    Backend, BlobIndexStore, MemoryKv, MemoryObjectStore, ObjectDocuments, ObjectStore,
};

const BOUNDARY: &str = "ara-index-test-boundary";

fn sharded_app(token: Option<&str>) -> Router {
    let mut config = Config::minimal();
    config.server.auth_token = token.map(str::to_string);
    let backend = Backend::sharded(MemoryKv::new(), "rag_index", 900_000);
    router(&config, Arc::new(Indexer::new(&config, backend)))
}

fn blob_app(objects: Arc<MemoryObjectStore>, page_size: usize) -> Router {
    let config = Config::minimal();
    let backend = Backend {
        kind: BackendKind::Blob,
        index: Arc::new(BlobIndexStore::new(objects.clone(), "rag/index.json")),
        documents: Arc::new(ObjectDocuments::new(objects, "seed/", "uploads/", page_size)),
    };
    router(&config, Arc::new(Indexer::new(&config, backend)))
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

fn json_of(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// `(field name, file name, content)` parts encoded as multipart/form-data.
fn upload(parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
    let mut body = Vec::new();
    for (field, file_name, content) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        let disposition = match file_name {
            Some(file_name) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, file_name
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", field),
        };
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(content.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/rag/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn stored_index(app: &Router) -> Value {
    let (status, _, body) = send(app, get("/rag/index")).await;
    assert_eq!(status, StatusCode::OK);
    json_of(&body)
}

#[tokio::test]
async fn health_reports_version_without_auth() {
    let app = sharded_app(Some("secret"));
    let (status, headers, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let body = json_of(&body);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn health_exemption_covers_get_only() {
    let app = sharded_app(Some("secret"));
    let (status, _, body) = send(&app, post_empty("/health")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_of(&body), json!({"error": "unauthorized"}));

    let authorized = Request::builder()
        .method(Method::POST)
        .uri("/health")
        .header(header::AUTHORIZATION, "Bearer secret")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, authorized).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_of(&body), json!({"error": "not_found"}));
}

#[tokio::test]
async fn sharded_unwritten_index_is_empty_list() {
    let app = sharded_app(None);
    let (status, headers, body) = send(&app, get("/rag/index")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    assert_eq!(body, br#"{"chunks":[]}"#);
}

#[tokio::test]
async fn blob_unwritten_index_is_not_found() {
    let app = blob_app(Arc::new(MemoryObjectStore::new()), 1000);
    let (status, _, body) = send(&app, get("/rag/index")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_of(&body), json!({"error": "index_not_found"}));
}

#[tokio::test]
async fn bearer_token_is_enforced() {
    let app = sharded_app(Some("secret"));

    let wrong = Request::builder()
        .uri("/rag/index")
        .header(header::AUTHORIZATION, "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_of(&body), json!({"error": "unauthorized"}));
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

    let (status, _, _) = send(&app, get("/rag/index")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let unknown = Request::builder()
        .uri("/nope")
        .header(header::AUTHORIZATION, "secret")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, unknown).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let right = Request::builder()
        .uri("/rag/index")
        .header(header::AUTHORIZATION, "Bearer secret")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, right).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn preflight_is_no_content_with_cors_headers() {
    let app = blob_app(Arc::new(MemoryObjectStore::new()), 1000);
    let preflight = Request::builder()
        .method(Method::OPTIONS)
        .uri("/rag/upload")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app, preflight).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_METHODS],
        "GET, POST, OPTIONS"
    );
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
        "authorization, content-type"
    );
}

#[tokio::test]
async fn preflight_still_requires_token() {
    let app = sharded_app(Some("secret"));
    let preflight = Request::builder()
        .method(Method::OPTIONS)
        .uri("/rag/index")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, preflight).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let preflight = Request::builder()
        .method(Method::OPTIONS)
        .uri("/rag/index")
        .header(header::AUTHORIZATION, "Bearer secret")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, preflight).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn unmatched_path_or_method_is_not_found() {
    let app = sharded_app(None);
    for req in [
        get("/rag/unknown"),
        get("/rag/upload"),
        Request::builder()
            .method(Method::DELETE)
            .uri("/rag/index")
            .body(Body::empty())
            .unwrap(),
    ] {
        let (status, _, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json_of(&body), json!({"error": "not_found"}));
    }
}

#[tokio::test]
async fn upload_plain_text_yields_one_pageless_chunk() {
    let app = sharded_app(None);
    let (status, _, body) =
        send(&app, upload(&[("files", Some("notes.txt"), "hello world")])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_of(&body),
        json!({
            "status": "uploaded_and_indexed",
            "indexed_chunks": 1,
            "sources": ["notes.txt"]
        })
    );

    assert_eq!(
        stored_index(&app).await,
        json!({
            "chunks": [
                {"id": "notes.txt-c0", "source": "notes.txt", "page": null, "text": "hello world"}
            ]
        })
    );
}

#[tokio::test]
async fn upload_without_files_is_rejected() {
    let app = sharded_app(None);

    let (status, _, body) = send(&app, upload(&[("comment", None, "no files here")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&body), json!({"error": "no_files"}));

    let (status, _, body) = send(&app, upload(&[("files", Some(""), "unnamed")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&body), json!({"error": "no_files"}));
}

#[tokio::test]
async fn upload_without_multipart_body_is_bad_request() {
    let app = sharded_app(None);
    let (status, _, body) = send(&app, post_empty("/rag/upload")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&body), json!({"error": "invalid_multipart"}));
}

#[tokio::test]
async fn upload_replaces_previous_index() {
    let app = sharded_app(None);
    send(&app, upload(&[("files", Some("first.md"), "# First")])).await;
    let (status, _, body) = send(
        &app,
        upload(&[
            ("files", Some("b.txt"), "bravo"),
            ("files", Some("a.md"), "alpha"),
            ("files", Some("sheet.xlsx"), "PK"),
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let report = json_of(&body);
    assert_eq!(report["indexed_chunks"], 2);
    assert_eq!(report["sources"], json!(["a.md", "b.txt"]));

    let index = stored_index(&app).await;
    let ids: Vec<_> = index["chunks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["b.txt-c0", "a.md-c0"]);
}

#[tokio::test]
async fn upload_with_unreadable_pdf_fails_and_keeps_index() {
    let app = sharded_app(None);
    send(&app, upload(&[("files", Some("keep.txt"), "kept")])).await;

    let (status, _, body) =
        send(&app, upload(&[("files", Some("broken.pdf"), "not a pdf")])).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_of(&body);
    assert_eq!(body["error"], "index_failed");
    assert!(body["message"].as_str().unwrap().contains("broken.pdf"));

    let index = stored_index(&app).await;
    assert_eq!(index["chunks"][0]["source"], "keep.txt");
}

#[tokio::test]
async fn sharded_seed_replaces_index_with_empty_list() {
    let app = sharded_app(None);
    send(&app, upload(&[("files", Some("notes.txt"), "hello world")])).await;

    let (status, _, body) = send(&app, post_empty("/rag/index-seed")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_of(&body),
        json!({"status": "indexed", "indexed_chunks": 0, "sources": []})
    );
    assert_eq!(stored_index(&app).await, json!({"chunks": []}));
}

#[tokio::test]
async fn blob_seed_over_empty_prefix_creates_empty_index() {
    let objects = Arc::new(MemoryObjectStore::new());
    objects
        .put("uploads/1-old.txt", b"not seed".to_vec(), "text/plain")
        .await
        .unwrap();
    let app = blob_app(objects.clone(), 1000);

    let (status, _, _) = send(&app, get("/rag/index")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = send(&app, post_empty("/rag/index-seed")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_of(&body),
        json!({"status": "indexed", "indexed_chunks": 0, "sources": []})
    );

    let (status, headers, body) = send(&app, get("/rag/index")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    assert_eq!(body, br#"{"chunks":[]}"#);
    assert_eq!(
        objects.get("rag/index.json").await.unwrap().as_deref(),
        Some(&br#"{"chunks":[]}"#[..])
    );
}

#[tokio::test]
async fn blob_seed_pages_through_listing() {
    let objects = Arc::new(MemoryObjectStore::new());
    for (key, text) in [
        ("seed/e.txt", "echo"),
        ("seed/c.md", "charlie"),
        ("seed/a.txt", "alpha"),
        ("seed/d.csv", "skipped,format"),
        ("seed/b.md", "bravo"),
        ("uploads/1-z.txt", "not seed"),
    ] {
        objects
            .put(key, text.as_bytes().to_vec(), "text/plain")
            .await
            .unwrap();
    }
    let app = blob_app(objects, 2);

    let (status, _, body) = send(&app, post_empty("/rag/index-seed")).await;
    assert_eq!(status, StatusCode::OK);
    let report = json_of(&body);
    assert_eq!(report["status"], "indexed");
    assert_eq!(report["indexed_chunks"], 4);
    assert_eq!(report["sources"], json!(["a.txt", "b.md", "c.md", "e.txt"]));

    let index = stored_index(&app).await;
    assert_eq!(index["chunks"][0]["id"], "a.txt-c0");
    assert_eq!(index["chunks"][3]["text"], "echo");
}

#[tokio::test]
async fn blob_upload_retains_raw_file() {
    let objects = Arc::new(MemoryObjectStore::new());
    let app = blob_app(objects.clone(), 1000);

    let (status, _, _) = send(&app, upload(&[("files", Some("notes.txt"), "hello world")])).await;
    assert_eq!(status, StatusCode::OK);

    let retained: Vec<_> = objects
        .keys()
        .await
        .into_iter()
        .filter(|k| k.starts_with("uploads/"))
        .collect();
    assert_eq!(retained.len(), 1);
    assert!(retained[0].ends_with("-notes.txt"));
    assert_eq!(
        objects.get(&retained[0]).await.unwrap().as_deref(),
        Some(&b"hello world"[..])
    );
    assert_eq!(
        objects.content_type("rag/index.json").await.as_deref(),
        Some("application/json")
    );
}

#[tokio::test]
async fn blob_backend_from_config() {
    let mut config = Config::minimal();
    config.store.backend = BackendKind::Blob;
    config.store.blob = BlobConfig {
        objects: ara_index::config::ObjectsKind::Memory,
        ..BlobConfig::default()
    };
    let backend = ara_index::store::open_backend(&config).await.unwrap();
    assert_eq!(backend.kind, BackendKind::Blob);
    let app = router(&config, Arc::new(Indexer::new(&config, backend)));
    let (status, _, _) = send(&app, get("/rag/index")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
