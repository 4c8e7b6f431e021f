//! Feed polling, auto-disable and adaptive intervals against a mock server

use crate::common::{http_client, http_fetcher, now, open, plain_http, politeness, temp_db};
use chrono::{DateTime, Duration, Utc};
use frontier_scheduler::crawler::LinkExtractor;
use frontier_scheduler::poll::{DisableDecision, FeedPoller, PollResult, SourceRegistry};
use frontier_scheduler::state::{DisableReason, FeedDisableState};
use frontier_scheduler::storage::{
    AdaptiveStore, FeedStateStore, FrontierStore, HostStore, SourceRecord, SourceStore,
};
use frontier_scheduler::{normalize_url, url_hash, ErrorKind, Origin, Severity};
use std::path::Path;
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rss(base: &str, items: &[&str]) -> String {
    let items: String = items
        .iter()
        .map(|item| format!("<item><title>{0}</title><link>{1}{0}</link></item>", item, base))
        .collect();
    format!(
        r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>News</title><link>{}/</link>
<description>Latest posts</description>{}</channel></rss>"#,
        base, items
    )
}

fn source(server: &MockServer, adaptive: bool) -> SourceRecord {
    SourceRecord {
        id: "news".to_string(),
        name: "News".to_string(),
        feed_url: Some(format!("{}/feed.xml", server.uri())),
        base_url: None,
        poll_interval: Duration::minutes(30),
        adaptive,
        rate_limit: None,
        base_priority: 5,
        strip_trailing_slash: true,
        disable: FeedDisableState::active(),
    }
}

fn poller(db: &Path, source: &SourceRecord, t0: DateTime<Utc>) -> FeedPoller {
    let mut storage = open(db);
    storage.upsert_source(source, t0).unwrap();
    let client = http_client();
    FeedPoller::new(
        storage,
        Arc::new(http_fetcher(client.clone())),
        Arc::new(LinkExtractor),
        politeness(client),
        plain_http(),
        Duration::hours(24),
    )
}

async fn serve_status(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

async fn serve_feed(server: &MockServer, body: String) {
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "application/rss+xml"),
        )
        .mount(server)
        .await;
}

fn is_due(poller: &FeedPoller, at: DateTime<Utc>) -> bool {
    !poller.storage().list_due_sources(at).unwrap().is_empty()
}

#[tokio::test]
async fn test_poll_submits_items_then_sends_validators() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .and(header("If-None-Match", "\"f1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss(&base, &["/posts/1", "/posts/2?utm_source=rss"]))
                .insert_header("ETag", "\"f1\""),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let source = source(&mock_server, false);
    let mut poller = poller(&db, &source, t0);

    let results = poller.poll_due(t0).await.unwrap();
    assert_eq!(
        results,
        vec![(
            "news".to_string(),
            PollResult::Fetched {
                items: 2,
                submitted: 2
            }
        )]
    );

    let second = normalize_url(&format!("{}/posts/2", base), None, &plain_http()).unwrap();
    let entry = poller
        .storage()
        .get_entry_by_hash(&url_hash(&second))
        .unwrap()
        .unwrap();
    assert_eq!(entry.origin, Origin::Feed);
    assert_eq!(entry.priority, 7);
    assert_eq!(entry.source_id.as_deref(), Some("news"));
    assert_eq!(entry.url, second.to_string());

    // Not due again until the interval has passed
    assert!(!is_due(&poller, t0 + Duration::minutes(29)));

    let later = t0 + Duration::minutes(30);
    let result = poller.poll_source(&source, later).await.unwrap();
    assert_eq!(result, PollResult::NotModified);

    let state = poller
        .storage_mut()
        .get_or_create_feed_state("news", source.feed_url.as_deref().unwrap())
        .unwrap();
    assert_eq!(state.last_polled_at, Some(later));
    assert_eq!(state.last_etag.as_deref(), Some("\"f1\""));
    assert_eq!(state.consecutive_errors, 0);
}

#[tokio::test]
async fn test_rate_limited_poll_penalizes_host_without_counting() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
        .mount(&mock_server)
        .await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let source = source(&mock_server, false);
    let mut poller = poller(&db, &source, t0);

    for i in 0..12 {
        let result = poller
            .poll_source(&source, t0 + Duration::hours(i))
            .await
            .unwrap();
        match result {
            PollResult::Failed { error, decision } => {
                assert_eq!(error.kind, ErrorKind::RateLimited);
                assert_eq!(error.retry_after, Some(Duration::seconds(120)));
                assert_eq!(decision, DisableDecision::Unchanged);
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    let host = poller
        .storage()
        .get_host_state("127.0.0.1")
        .unwrap()
        .unwrap();
    assert!(host.min_delay >= Duration::seconds(120));

    let state = poller
        .storage_mut()
        .get_or_create_feed_state("news", source.feed_url.as_deref().unwrap())
        .unwrap();
    assert_eq!(state.consecutive_errors, 0);
    assert!(!poller.storage().disable_state("news").unwrap().is_disabled());
}

#[tokio::test]
async fn test_three_not_found_disable_until_enabled() {
    let mock_server = MockServer::start().await;
    serve_status(&mock_server, 404).await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let source = source(&mock_server, false);
    let mut poller = poller(&db, &source, t0);

    let mut decisions = Vec::new();
    for i in 0..3 {
        match poller
            .poll_source(&source, t0 + Duration::hours(i))
            .await
            .unwrap()
        {
            PollResult::Failed { decision, .. } => decisions.push(decision),
            other => panic!("expected failure, got {:?}", other),
        }
    }
    assert_eq!(
        decisions,
        vec![
            DisableDecision::Unchanged,
            DisableDecision::Unchanged,
            DisableDecision::Disabled(DisableReason::Auto(ErrorKind::NotFound)),
        ]
    );

    let disabled_at = t0 + Duration::hours(2);
    let state = poller.storage().disable_state("news").unwrap();
    assert_eq!(state.reason, Some(DisableReason::Auto(ErrorKind::NotFound)));
    assert_eq!(state.disabled_at, Some(disabled_at));
    assert!(!is_due(&poller, disabled_at + Duration::hours(47)));

    // Enabling skips the rest of the cooldown
    poller.storage_mut().enable_feed("news").unwrap();
    assert!(!poller.storage().disable_state("news").unwrap().is_disabled());
    assert!(is_due(&poller, disabled_at + Duration::hours(1)));
}

#[tokio::test]
async fn test_gone_cooldown_then_successful_probe() {
    let mock_server = MockServer::start().await;
    serve_status(&mock_server, 410).await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let source = source(&mock_server, false);
    let mut poller = poller(&db, &source, t0);

    let result = poller.poll_source(&source, t0).await.unwrap();
    assert!(matches!(
        result,
        PollResult::Failed {
            decision: DisableDecision::Disabled(DisableReason::Auto(ErrorKind::Gone)),
            ..
        }
    ));

    assert!(!is_due(&poller, t0 + Duration::hours(71) + Duration::minutes(59)));
    let probe_at = t0 + Duration::hours(72) + Duration::minutes(1);
    assert!(is_due(&poller, probe_at));

    mock_server.reset().await;
    serve_feed(&mock_server, rss(&mock_server.uri(), &["/back"])).await;

    let due = poller.poll_due(probe_at).await.unwrap();
    assert_eq!(due.len(), 1);
    assert!(matches!(due[0].1, PollResult::Fetched { items: 1, .. }));
    assert!(!poller.storage().disable_state("news").unwrap().is_disabled());
}

#[tokio::test]
async fn test_failed_probe_disables_again() {
    let mock_server = MockServer::start().await;
    serve_status(&mock_server, 410).await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let source = source(&mock_server, false);
    let mut poller = poller(&db, &source, t0);

    poller.poll_source(&source, t0).await.unwrap();

    let probe_at = t0 + Duration::hours(73);
    let result = poller.poll_due(probe_at).await.unwrap();
    assert!(matches!(
        result[0].1,
        PollResult::Failed {
            decision: DisableDecision::Redisabled(DisableReason::Auto(ErrorKind::Gone)),
            ..
        }
    ));

    // The cooldown restarts from the failed probe
    let state = poller.storage().disable_state("news").unwrap();
    assert_eq!(state.disabled_at, Some(probe_at));
    assert!(!is_due(&poller, probe_at + Duration::hours(71)));
}

#[tokio::test]
async fn test_unexpected_errors_never_disable() {
    let mock_server = MockServer::start().await;
    serve_status(&mock_server, 418).await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let source = source(&mock_server, false);
    let mut poller = poller(&db, &source, t0);

    for i in 0..15 {
        match poller
            .poll_source(&source, t0 + Duration::hours(i))
            .await
            .unwrap()
        {
            PollResult::Failed { error, decision } => {
                assert_eq!(error.kind, ErrorKind::Unexpected);
                assert_eq!(error.severity, Severity::Error);
                assert_eq!(decision, DisableDecision::Unchanged);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
    assert!(!poller.storage().disable_state("news").unwrap().is_disabled());
}

#[tokio::test]
async fn test_unchanged_feed_stretches_interval() {
    let mock_server = MockServer::start().await;
    serve_feed(&mock_server, rss(&mock_server.uri(), &["/posts/1"])).await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let source = source(&mock_server, true);
    let mut poller = poller(&db, &source, t0);

    let expected = [
        Duration::minutes(30),
        Duration::minutes(60),
        Duration::hours(2),
        Duration::hours(4),
        Duration::hours(8),
        Duration::hours(16),
        Duration::hours(24),
        Duration::hours(24),
    ];

    let mut at = t0;
    for interval in expected {
        assert!(is_due(&poller, at));
        poller.poll_source(&source, at).await.unwrap();

        let state = poller.storage().get_adaptive_state("news").unwrap().unwrap();
        assert_eq!(state.current_interval, interval);
        assert!(!is_due(&poller, at + interval - Duration::minutes(1)));
        at = at + interval;
    }

    // New content drops back to the baseline
    mock_server.reset().await;
    serve_feed(&mock_server, rss(&mock_server.uri(), &["/posts/1", "/posts/2"])).await;

    let result = poller.poll_source(&source, at).await.unwrap();
    assert_eq!(
        result,
        PollResult::Fetched {
            items: 2,
            submitted: 1
        }
    );
    let state = poller.storage().get_adaptive_state("news").unwrap().unwrap();
    assert_eq!(state.unchanged_count, 0);
    assert_eq!(state.current_interval, Duration::minutes(30));
    assert_eq!(state.last_change_at, at);
}

#[tokio::test]
async fn test_one_failing_source_does_not_stop_the_tick() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();
    serve_feed(&mock_server, rss(&base, &["/posts/1"])).await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let news = source(&mock_server, false);
    let broken = SourceRecord {
        id: "broken".to_string(),
        name: "Broken".to_string(),
        ..news.clone()
    };
    let mut poller = poller(&db, &news, t0);
    poller.storage_mut().upsert_source(&broken, t0).unwrap();

    let conn = rusqlite::Connection::open(&db).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER reject_broken BEFORE INSERT ON feed_state
         WHEN NEW.source_id = 'broken'
         BEGIN SELECT RAISE(ABORT, 'feed_state is read-only'); END;",
    )
    .unwrap();

    let results = poller.poll_due(t0).await.unwrap();
    assert_eq!(
        results,
        vec![(
            "news".to_string(),
            PollResult::Fetched {
                items: 1,
                submitted: 1
            }
        )]
    );
}

#[tokio::test]
async fn test_discovered_feed_is_stored_and_polled() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><head>
                <link rel="alternate" type="application/rss+xml" title="Posts" href="/posts.rss">
            </head><body>Blog</body></html>"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/posts.rss"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&base, &["/posts/1"])))
        .mount(&mock_server)
        .await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let blog = SourceRecord {
        id: "blog".to_string(),
        name: "Blog".to_string(),
        feed_url: None,
        base_url: Some(format!("{}/", base)),
        ..source(&mock_server, false)
    };
    let mut poller = poller(&db, &blog, t0);
    assert!(poller.poll_due(t0).await.unwrap().is_empty());

    let found = poller.discover_feeds(t0).await.unwrap();
    let feed_url = format!("{}/posts.rss", base);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].0, "blog");
    assert_eq!(found[0].1.as_str(), feed_url);

    let stored = poller.storage().get_source("blog").unwrap().unwrap();
    assert_eq!(stored.feed_url.as_deref(), Some(feed_url.as_str()));

    // Already discovered: nothing left to search
    assert!(poller.discover_feeds(t0).await.unwrap().is_empty());

    let results = poller.poll_due(t0).await.unwrap();
    assert_eq!(
        results,
        vec![(
            "blog".to_string(),
            PollResult::Fetched {
                items: 1,
                submitted: 1
            }
        )]
    );
}

#[tokio::test]
async fn test_failed_discovery_waits_for_retry_window() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>No feed</body></html>"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let (_dir, db) = temp_db();
    let t0 = now();
    let blog = SourceRecord {
        id: "blog".to_string(),
        name: "Blog".to_string(),
        feed_url: None,
        base_url: Some(format!("{}/", mock_server.uri())),
        ..source(&mock_server, false)
    };
    let mut poller = poller(&db, &blog, t0).with_discovery_retry(Duration::hours(24));

    assert!(poller.discover_feeds(t0).await.unwrap().is_empty());
    assert!(poller
        .discover_feeds(t0 + Duration::hours(23))
        .await
        .unwrap()
        .is_empty());
    assert!(poller
        .discover_feeds(t0 + Duration::hours(24))
        .await
        .unwrap()
        .is_empty());

    let stored = poller.storage().get_source("blog").unwrap().unwrap();
    assert_eq!(stored.feed_url, None);
}
