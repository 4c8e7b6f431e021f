//! Fetch workers against a mock HTTP server

use crate::common::{
    http_client, http_fetcher, now, open, submit, temp_db, worker, RecordingSink,
};
use chrono::Duration;
use frontier_scheduler::crawler::{Conditional, FetchResponse, Step};
use frontier_scheduler::poll::hash_body;
use frontier_scheduler::storage::{FrontierStore, HostStore};
use frontier_scheduler::{FrontierStatus, Origin};
use std::sync::Arc;
use tokio::sync::watch;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE: &str = "<html><head><title>Post</title></head><body><p>Hello</p></body></html>";

#[tokio::test]
async fn test_fetch_completes_and_delivers() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/post"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(PAGE)
                .insert_header("ETag", "\"v1\"")
                .insert_header("Last-Modified", "Mon, 01 Jan 2024 00:00:00 GMT"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let mut storage = open(&db);
    let id = submit(
        &mut storage,
        &format!("{}/post", mock_server.uri()),
        Origin::Feed,
        t0,
    );

    let sink = Arc::new(RecordingSink::default());
    let mut worker = worker(&db, "worker-0", sink.clone());
    let (_tx, mut shutdown) = watch::channel(false);

    let step = worker.step(t0, &mut shutdown).await.unwrap();
    assert_eq!(step, Step::Completed(FrontierStatus::Fetched));

    let entry = storage.get_entry(id).unwrap().unwrap();
    assert_eq!(entry.status, FrontierStatus::Fetched);
    assert_eq!(entry.fetch_count, 1);
    assert_eq!(entry.content_hash, Some(hash_body(PAGE.as_bytes())));
    assert_eq!(entry.etag.as_deref(), Some("\"v1\""));
    assert_eq!(
        entry.last_modified.as_deref(),
        Some("Mon, 01 Jan 2024 00:00:00 GMT")
    );

    let documents = sink.documents.lock().unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].entry.id, id);
    assert_eq!(documents[0].body, PAGE.as_bytes());
    assert!(documents[0].duplicates.is_empty());
    drop(documents);

    // Nothing else to claim
    let step = worker
        .step(t0 + Duration::seconds(5), &mut shutdown)
        .await
        .unwrap();
    assert_eq!(step, Step::Idle);
}

#[tokio::test]
async fn test_identical_content_reports_duplicates() {
    let mock_server = MockServer::start().await;
    for page in ["/one", "/two"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&mock_server)
            .await;
    }

    let (_dir, db) = temp_db();
    let t0 = now();
    let mut storage = open(&db);
    let one = submit(&mut storage, &format!("{}/one", mock_server.uri()), Origin::Feed, t0);
    submit(&mut storage, &format!("{}/two", mock_server.uri()), Origin::Manual, t0);

    let sink = Arc::new(RecordingSink::default());
    let mut worker = worker(&db, "worker-0", sink.clone());
    let (_tx, mut shutdown) = watch::channel(false);

    worker.step(t0, &mut shutdown).await.unwrap();
    worker
        .step(t0 + Duration::seconds(2), &mut shutdown)
        .await
        .unwrap();

    let documents = sink.documents.lock().unwrap();
    assert_eq!(documents.len(), 2);
    assert!(documents[0].duplicates.is_empty());
    assert_eq!(documents[1].duplicates, vec![one]);
}

#[tokio::test]
async fn test_not_found_is_dead() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let mut storage = open(&db);
    let id = submit(
        &mut storage,
        &format!("{}/missing", mock_server.uri()),
        Origin::Manual,
        t0,
    );

    let sink = Arc::new(RecordingSink::default());
    let mut worker = worker(&db, "worker-0", sink.clone());
    let (_tx, mut shutdown) = watch::channel(false);

    let step = worker.step(t0, &mut shutdown).await.unwrap();
    assert_eq!(step, Step::Completed(FrontierStatus::Dead));

    let entry = storage.get_entry(id).unwrap().unwrap();
    assert_eq!(entry.status, FrontierStatus::Dead);
    assert_eq!(entry.last_error_type.as_deref(), Some("not_found"));
    assert!(entry.last_error.unwrap().starts_with("not_found"));
    assert!(sink.urls().is_empty());
}

#[tokio::test]
async fn test_server_error_is_retried_with_backoff() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let mut storage = open(&db);
    let id = submit(
        &mut storage,
        &format!("{}/flaky", mock_server.uri()),
        Origin::Manual,
        t0,
    );

    let mut worker = worker(&db, "worker-0", Arc::new(RecordingSink::default()));
    let (_tx, mut shutdown) = watch::channel(false);

    let step = worker.step(t0, &mut shutdown).await.unwrap();
    assert_eq!(step, Step::Completed(FrontierStatus::Pending));

    let entry = storage.get_entry(id).unwrap().unwrap();
    assert_eq!(entry.status, FrontierStatus::Pending);
    assert_eq!(entry.retry_count, 1);
    assert_eq!(entry.last_error_type.as_deref(), Some("upstream"));
    assert!(entry.next_fetch_at >= t0 + Duration::seconds(60));
    assert!(entry.next_fetch_at < t0 + Duration::seconds(70));
}

#[tokio::test]
async fn test_rate_limited_penalizes_host_and_requeues() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
        .mount(&mock_server)
        .await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let mut storage = open(&db);
    let url = format!("{}/busy", mock_server.uri());
    let id = submit(&mut storage, &url, Origin::Manual, t0);
    submit(
        &mut storage,
        &format!("{}/other", mock_server.uri()),
        Origin::Manual,
        t0,
    );
    let host = Url::parse(&url).unwrap().host_str().unwrap().to_string();

    let mut worker = worker(&db, "worker-0", Arc::new(RecordingSink::default()));
    let (_tx, mut shutdown) = watch::channel(false);

    let step = worker.step(t0, &mut shutdown).await.unwrap();
    assert_eq!(step, Step::Completed(FrontierStatus::Pending));

    let state = storage.get_host_state(&host).unwrap().unwrap();
    assert!(state.min_delay >= Duration::seconds(120));

    let entry = storage.get_entry(id).unwrap().unwrap();
    assert_eq!(entry.status, FrontierStatus::Pending);
    assert_eq!(entry.last_error_type.as_deref(), Some("rate_limited"));
    assert!(entry.next_fetch_at >= t0 + Duration::seconds(120));
    assert!(entry.next_fetch_at < t0 + Duration::seconds(130));

    // Other URLs on the host wait out the penalty
    let blocked = worker
        .step(t0 + Duration::seconds(60), &mut shutdown)
        .await
        .unwrap();
    assert_eq!(blocked, Step::Idle);
}

#[tokio::test]
async fn test_host_state_write_failure_requeues_as_internal() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/post"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let mut storage = open(&db);
    let id = submit(
        &mut storage,
        &format!("{}/post", mock_server.uri()),
        Origin::Manual,
        t0,
    );

    // Claims still update host rows; storing robots.txt state fails
    let conn = rusqlite::Connection::open(&db).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER reject_robots BEFORE UPDATE ON host_state
         WHEN NEW.robots_fetched_at IS NOT NULL
         BEGIN SELECT RAISE(ABORT, 'host_state is read-only'); END;",
    )
    .unwrap();

    let mut worker = worker(&db, "worker-0", Arc::new(RecordingSink::default()));
    let (_tx, mut shutdown) = watch::channel(false);
    assert!(worker.step(t0, &mut shutdown).await.is_err());

    let entry = storage.get_entry(id).unwrap().unwrap();
    assert_eq!(entry.status, FrontierStatus::Pending);
    assert_eq!(entry.claimed_by, None);
    assert_eq!(entry.last_error_type.as_deref(), Some("internal"));
    assert!(entry.next_fetch_at > t0);
}

#[tokio::test]
async fn test_robots_disallow_is_dead_without_fetch() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private/\n"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let mut storage = open(&db);
    let private = submit(
        &mut storage,
        &format!("{}/private/page", mock_server.uri()),
        Origin::Feed,
        t0,
    );
    let public = submit(
        &mut storage,
        &format!("{}/public", mock_server.uri()),
        Origin::Manual,
        t0,
    );

    let mut worker = worker(&db, "worker-0", Arc::new(RecordingSink::default()));
    let (_tx, mut shutdown) = watch::channel(false);

    // Feed origin outranks manual, so the private page is claimed first
    let step = worker.step(t0, &mut shutdown).await.unwrap();
    assert_eq!(step, Step::Completed(FrontierStatus::Dead));
    let entry = storage.get_entry(private).unwrap().unwrap();
    assert_eq!(entry.last_error.as_deref(), Some("robots_blocked"));

    // The cached rules serve the second claim
    let step = worker
        .step(t0 + Duration::seconds(2), &mut shutdown)
        .await
        .unwrap();
    assert_eq!(step, Step::Completed(FrontierStatus::Fetched));
    let entry = storage.get_entry(public).unwrap().unwrap();
    assert_eq!(entry.status, FrontierStatus::Fetched);
}

#[tokio::test]
async fn test_redirect_loop_is_dead() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
        .mount(&mock_server)
        .await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let mut storage = open(&db);
    let id = submit(
        &mut storage,
        &format!("{}/loop", mock_server.uri()),
        Origin::Manual,
        t0,
    );

    let mut worker = worker(&db, "worker-0", Arc::new(RecordingSink::default()));
    let (_tx, mut shutdown) = watch::channel(false);

    let step = worker.step(t0, &mut shutdown).await.unwrap();
    assert_eq!(step, Step::Completed(FrontierStatus::Dead));

    let entry = storage.get_entry(id).unwrap().unwrap();
    assert!(entry.last_error.unwrap().starts_with("too_many_redirects"));
    assert_eq!(entry.last_error_type.as_deref(), Some("unexpected"));
}

#[tokio::test]
async fn test_conditional_request_not_modified() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = http_fetcher(http_client());
    let url = Url::parse(&format!("{}/feed.xml", mock_server.uri())).unwrap();
    let conditional = Conditional::new(Some("\"v1\""), None);

    let response = fetcher.fetch(&url, &conditional, now()).await;
    assert!(matches!(response, FetchResponse::NotModified { .. }));
}
