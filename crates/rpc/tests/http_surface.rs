use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use filelink_registry::{FileDescriptor, OwnerRef, RegistryStore, Token};
use filelink_relay::{RelayResolver, RelayStats, StreamingProxy, StubContentSource};
use filelink_rpc::{build_router, AdminGateway, AppState};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

const SECRET: &str = "s3cret";
const MOVIE_LEN: usize = 10_000;

fn movie_bytes() -> Vec<u8> {
    (0..MOVIE_LEN).map(|i| (i % 199) as u8).collect()
}

async fn spawn_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/files/movie.mp4", get(|| async { movie_bytes().into_response() }))
        .route(
            "/files/broken.mp4",
            get(|| async { StatusCode::FORBIDDEN.into_response() }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct Harness {
    _dir: TempDir,
    registry: Arc<RegistryStore>,
    source: Arc<StubContentSource>,
    app: Router,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(RegistryStore::open(dir.path().join("database.json")));
    let source = Arc::new(StubContentSource::new());
    let resolver = Arc::new(RelayResolver::new(
        registry.clone(),
        source.clone(),
        Duration::from_secs(5),
    ));
    let proxy = Arc::new(StreamingProxy::new(
        reqwest::Client::new(),
        Arc::new(RelayStats::new()),
    ));
    let admin = Arc::new(AdminGateway::new(registry.clone(), SECRET));
    let state = AppState::new(
        registry.clone(),
        resolver,
        proxy,
        admin,
        Duration::from_secs(10),
    );

    Harness {
        _dir: dir,
        registry,
        source,
        app: build_router(Arc::new(state)),
    }
}

fn register(registry: &RegistryStore, token: &str, upstream: &str, name: &str, mime: &str) {
    registry
        .put(
            Token::new(token),
            FileDescriptor::new(upstream, name, Some(mime.to_string()), 1_000_000, OwnerRef(7)),
        )
        .unwrap();
}

async fn fetch(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

fn restore_request(key: &str, field: &str, content: &str) -> Request<Body> {
    let boundary = "filelinkboundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"backup.json\"\r\n\
         Content-Type: application/json\r\n\r\n\
         {content}\r\n\
         --{boundary}--\r\n"
    );
    Request::builder()
        .method("POST")
        .uri(format!("/admin/restore?key={key}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn operational_endpoints() {
    let h = harness();
    register(&h.registry, "t1", "R1", "a.bin", "application/pdf");

    let root = fetch(&h.app, "/").await;
    assert_eq!(root.status(), StatusCode::OK);
    assert_eq!(body_bytes(root).await, b"Bot is Running.");

    assert_eq!(body_bytes(fetch(&h.app, "/ping").await).await, b"pong");

    let health: serde_json::Value =
        serde_json::from_slice(&body_bytes(fetch(&h.app, "/health").await).await).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["files"], 1);
    assert_eq!(health["req_total"], 3);

    let metrics = fetch(&h.app, "/metrics").await;
    assert_eq!(
        metrics.headers()[header::CONTENT_TYPE],
        "text/plain; version=0.0.4"
    );
    let text = String::from_utf8(body_bytes(metrics).await).unwrap();
    assert!(text.contains("filelink_registry_files 1\n"));
    assert!(text.contains("filelink_http_requests_total 4\n"));
    assert!(text.contains("filelink_relay_streams_total{outcome=\"started\"} 0\n"));
}

#[tokio::test]
async fn landing_page() {
    let h = harness();
    register(&h.registry, "t1", "R1", "<b>movie</b>.mp4", "video/mp4");

    let page = fetch(&h.app, "/file/t1").await;
    assert_eq!(page.status(), StatusCode::OK);
    assert!(page.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    let html = String::from_utf8(body_bytes(page).await).unwrap();
    assert!(html.contains("&lt;b&gt;movie&lt;/b&gt;.mp4"));
    assert!(html.contains("/stream/t1"));

    assert_eq!(fetch(&h.app, "/file/unknown").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stream_relays_registered_file() {
    let upstream = spawn_upstream().await;
    let h = harness();
    register(&h.registry, "abc", "R1", "movie.mp4", "video/mp4");
    h.source
        .insert("R1", format!("http://{upstream}/files/movie.mp4"));

    let response = fetch(&h.app, "/stream/abc").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "inline; filename=\"movie.mp4\""
    );
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH],
        MOVIE_LEN.to_string().as_str()
    );
    assert_eq!(body_bytes(response).await, movie_bytes());
}

#[tokio::test]
async fn stream_error_statuses() {
    let upstream = spawn_upstream().await;
    let h = harness();

    let unknown = fetch(&h.app, "/stream/nope").await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    let error: serde_json::Value = serde_json::from_slice(&body_bytes(unknown).await).unwrap();
    assert_eq!(error["error"], "File not found");

    // Registered, but the content source no longer knows the reference.
    register(&h.registry, "revoked", "R-GONE", "a.mp4", "video/mp4");
    assert_eq!(
        fetch(&h.app, "/stream/revoked").await.status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );

    // Exchange works, but the upstream refuses the fetch.
    register(&h.registry, "refused", "R-BROKEN", "b.mp4", "video/mp4");
    h.source
        .insert("R-BROKEN", format!("http://{upstream}/files/broken.mp4"));
    assert_eq!(
        fetch(&h.app, "/stream/refused").await.status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );

    assert_eq!(h.registry.len(), 2);
}

#[tokio::test]
async fn admin_rejects_wrong_secret_everywhere() {
    let h = harness();
    register(&h.registry, "t1", "R1", "a.bin", "application/pdf");
    let before = h.registry.export_snapshot().unwrap();

    for uri in [
        "/admin",
        "/admin?key=wrong",
        "/admin/delete/t1?key=wrong",
        "/admin/delete/t1",
        "/admin/backup?key=wrong",
        "/admin?key=wrong&key=x",
        "/admin/delete/t1?key=a&key=b",
        "/admin/backup?key=a&key=b",
        "/admin?key=s3cret&key=s3cret",
    ] {
        assert_eq!(fetch(&h.app, uri).await.status(), StatusCode::FORBIDDEN, "{uri}");
    }

    let restore = h
        .app
        .clone()
        .oneshot(restore_request("wrong", "backup_file", "{}"))
        .await
        .unwrap();
    assert_eq!(restore.status(), StatusCode::FORBIDDEN);

    let duplicated = h
        .app
        .clone()
        .oneshot(restore_request("a&key=b", "backup_file", "{}"))
        .await
        .unwrap();
    assert_eq!(duplicated.status(), StatusCode::FORBIDDEN);

    // A bad key is rejected before the body is even looked at.
    let not_multipart = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/restore?key=wrong")
                .body(Body::from("garbage"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(not_multipart.status(), StatusCode::FORBIDDEN);

    assert_eq!(h.registry.export_snapshot().unwrap(), before);
}

#[tokio::test]
async fn admin_panel_and_delete() {
    let h = harness();
    register(&h.registry, "t1", "R1", "report.pdf", "application/pdf");
    register(&h.registry, "t2", "R2", "movie.mp4", "video/mp4");

    let panel = fetch(&h.app, &format!("/admin?key={SECRET}")).await;
    assert_eq!(panel.status(), StatusCode::OK);
    let html = String::from_utf8(body_bytes(panel).await).unwrap();
    assert!(html.contains("report.pdf"));
    assert!(html.contains("movie.mp4"));
    assert!(html.contains("/admin/delete/t1?key=s3cret"));

    let deleted = fetch(&h.app, &format!("/admin/delete/t1?key={SECRET}")).await;
    assert!(deleted.status().is_redirection());
    assert_eq!(
        deleted.headers()[header::LOCATION],
        format!("/admin?key={SECRET}").as_str()
    );
    assert_eq!(h.registry.get(&Token::new("t1")), None);
    assert!(h.registry.get(&Token::new("t2")).is_some());

    // Deleting an unknown token still lands back on the panel.
    let again = fetch(&h.app, &format!("/admin/delete/t1?key={SECRET}")).await;
    assert!(again.status().is_redirection());
}

#[tokio::test]
async fn backup_and_restore() {
    let h = harness();
    register(&h.registry, "t1", "R1", "report.pdf", "application/pdf");

    let backup = fetch(&h.app, &format!("/admin/backup?key={SECRET}")).await;
    assert_eq!(backup.status(), StatusCode::OK);
    assert_eq!(backup.headers()[header::CONTENT_TYPE], "application/json");
    assert_eq!(
        backup.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"database_backup.json\""
    );
    let artifact = body_bytes(backup).await;
    assert_eq!(artifact, h.registry.export_snapshot().unwrap());

    // Swap the registry for a different one, then restore the backup.
    register(&h.registry, "t2", "R2", "movie.mp4", "video/mp4");
    let restored = h
        .app
        .clone()
        .oneshot(restore_request(
            SECRET,
            "backup_file",
            std::str::from_utf8(&artifact).unwrap(),
        ))
        .await
        .unwrap();
    assert!(restored.status().is_redirection());
    assert_eq!(h.registry.len(), 1);
    assert!(h.registry.get(&Token::new("t1")).is_some());
    assert_eq!(h.registry.get(&Token::new("t2")), None);
}

#[tokio::test]
async fn malformed_restore_leaves_registry_untouched() {
    let h = harness();
    register(&h.registry, "t1", "R1", "report.pdf", "application/pdf");
    let before = h.registry.export_snapshot().unwrap();

    for (field, content) in [
        ("backup_file", "this is not json"),
        ("backup_file", ""),
        ("backup_file", r#"{"t9": {"file_id": ""}}"#),
        ("other_field", "{}"),
    ] {
        let response = h
            .app
            .clone()
            .oneshot(restore_request(SECRET, field, content))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{field}: {content}");
    }

    assert_eq!(h.registry.export_snapshot().unwrap(), before);
    assert_eq!(std::fs::read(h.registry.path()).unwrap(), before);
}
