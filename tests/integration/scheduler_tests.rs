//! The full worker pool, reaper and poller wired to one database

use crate::common::{open, temp_db, RecordingSink};
use chrono::Utc;
use frontier_scheduler::config::parse_config;
use frontier_scheduler::crawler::run_scheduler;
use frontier_scheduler::storage::FrontierStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_scheduler_polls_fetches_and_stops() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>News</title><link>{0}/</link><description>d</description>
<item><title>one</title><link>{0}/posts/1</link></item>
<item><title>two</title><link>{0}/posts/2</link></item>
</channel></rss>"#,
            base
        )))
        .mount(&mock_server)
        .await;
    for post in ["/posts/1", "/posts/2"] {
        Mock::given(method("GET"))
            .and(path(post))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(format!("<html><body>{}</body></html>", post)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let (_dir, db) = temp_db();
    let config = parse_config(&format!(
        r#"
[politeness]
floor-ms = 100

[worker]
count = 2
idle-ms = 50
poll-every-secs = 1

[normalizer]
upgrade-to-https = false

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[output]
database-path = "{}"

[[source]]
id = "news"
feed-url = "{}/feed.xml"
"#,
        db.display(),
        base
    ))
    .expect("Failed to parse config");

    let sink = Arc::new(RecordingSink::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = {
        let sink = sink.clone();
        tokio::spawn(async move { run_scheduler(&config, sink, shutdown_rx).await })
    };

    let storage = open(&db);
    let mut fetched = 0;
    for _ in 0..100 {
        fetched = storage.frontier_stats(Utc::now()).unwrap().fetched;
        if fetched == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(fetched, 2);

    shutdown_tx.send(true).unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(summary.completed, 2);
    let mut urls = sink.urls();
    urls.sort();
    assert_eq!(urls, vec![format!("{}/posts/1", base), format!("{}/posts/2", base)]);
}
