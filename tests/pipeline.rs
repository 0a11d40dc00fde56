//! End-to-end pipeline tests: real HTTP (wiremock), real feed parsing, and an
//! in-memory SQLite database per test.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedpipe::dispatch::{
    partition_feeds, DispatchOptions, DispatchSummary, Dispatcher, PipelineContext, TracingRecorder,
    WorkerReport,
};
use feedpipe::feed::{
    AddressRepair, Fetcher, FetcherConfig, FixedDraw, HttpSource, LinkDiscovery, NoRepair,
    Processor, ProcessorConfig, MAX_FEED_SIZE,
};
use feedpipe::storage::Database;

fn rss(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(guid, title)| {
            format!(
                "<item><guid>{guid}</guid><title>{title}</title><link>https://example.com/{guid}</link>\
                 <pubDate>Tue, 14 Nov 2023 22:13:20 GMT</pubDate></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Example</title>
<link>https://example.com/</link>{items}</channel></rss>"#
    )
}

fn rss_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("Content-Type", "application/rss+xml")
        .insert_header("ETag", "\"v1\"")
}

async fn run(
    db: &Database,
    repair: Arc<dyn AddressRepair>,
    queues: Vec<Vec<i64>>,
) -> Vec<WorkerReport> {
    let ctx = PipelineContext {
        db: db.clone(),
        fetcher: Fetcher::new(
            db.clone(),
            Arc::new(HttpSource::new(MAX_FEED_SIZE).unwrap()),
            Arc::new(FixedDraw(1.0)),
            FetcherConfig {
                timeout: Duration::from_secs(10),
                ..Default::default()
            },
        ),
        processor: Processor::new(db.clone(), repair, ProcessorConfig::default()),
        recorder: Arc::new(TracingRecorder),
    };
    let mut dispatcher = Dispatcher::new(ctx, DispatchOptions::default(), queues.len());
    dispatcher.add_jobs(queues);
    dispatcher.run_jobs().await
}

async fn mark_known_good(db: &Database, feed_id: i64) {
    let mut feed = db.get_feed_by_id(feed_id).await.unwrap();
    feed.known_good = true;
    feed.fetched_once = true;
    db.save_feed(&feed).await.unwrap();
}

#[tokio::test]
async fn test_new_feed_with_distinct_guids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(rss_response(rss(&[("1", "One"), ("2", "Two"), ("3", "Three")])))
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let id = db.insert_feed(&format!("{}/feed", server.uri()), "Example").await.unwrap();

    let reports = run(&db, Arc::new(NoRepair), vec![vec![id]]).await;

    assert_eq!(reports[0].stats.ok, 1);
    assert_eq!(reports[0].stories.new, 3);
    assert_eq!(reports[0].stories.updated, 0);
    assert_eq!(reports[0].stories.same, 0);

    let feed = db.get_feed_by_id(id).await.unwrap();
    assert!(feed.known_good);
    assert!(feed.fetched_once);
    assert_eq!(feed.etag.as_deref(), Some("\"v1\""));
    assert_eq!(feed.story_count, 3);
}

#[tokio::test]
async fn test_known_good_feed_not_modified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(rss_response(rss(&[("1", "One"), ("2", "Two"), ("3", "Three")])))
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let id = db.insert_feed(&format!("{}/feed", server.uri()), "Example").await.unwrap();

    run(&db, Arc::new(NoRepair), vec![vec![id]]).await;
    let reports = run(&db, Arc::new(NoRepair), vec![vec![id]]).await;

    assert_eq!(reports[0].stats.unchanged, 1);
    assert_eq!(reports[0].stories, Default::default());

    let history = db.feed_history(id).await.unwrap();
    assert_eq!(history[0].status_code, 304);
    assert_eq!(history[0].message, "Not modified");
    assert_eq!(db.get_stories_for_feed(id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_permanent_redirect_moves_known_good_feed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(rss_response(rss(&[("1", "One"), ("2", "Two")])))
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let id = db.insert_feed(&format!("{}/old", server.uri()), "Example").await.unwrap();
    mark_known_good(&db, id).await;

    let reports = run(&db, Arc::new(NoRepair), vec![vec![id]]).await;

    assert_eq!(reports[0].stats.ok, 1);
    assert_eq!(reports[0].stories.new, 2);
    let feed = db.get_feed_by_id(id).await.unwrap();
    assert_eq!(feed.address, format!("{}/new", server.uri()));
}

#[tokio::test]
async fn test_html_page_with_failed_repair_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body>Not a feed</body></html>")
                .insert_header("Content-Type", "text/html"),
        )
        .mount(&server)
        .await;
    // The site root has no alternate link, so repair finds nothing
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let id = db.insert_feed(&format!("{}/feed", server.uri()), "Example").await.unwrap();
    let repair = Arc::new(LinkDiscovery::new(reqwest::Client::new()));

    let reports = run(&db, repair, vec![vec![id]]).await;

    assert_eq!(reports[0].stats.cant_parse, 1);
    let history = db.feed_history(id).await.unwrap();
    assert_eq!(history[0].status_code, 552);
    assert_eq!(history[0].message, "Non-xml feed");
    assert!(!db.get_feed_by_id(id).await.unwrap().known_good);
}

#[tokio::test]
async fn test_failing_feed_does_not_stop_queue() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(rss_response(rss(&[("b1", "B")])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/c"))
        .respond_with(rss_response(rss(&[("c1", "C")])))
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    // Nothing listens on port 1: the connection is refused outright
    let a = db.insert_feed("http://127.0.0.1:1/a", "A").await.unwrap();
    let b = db.insert_feed(&format!("{}/b", server.uri()), "B").await.unwrap();
    let c = db.insert_feed(&format!("{}/c", server.uri()), "C").await.unwrap();

    let reports = run(&db, Arc::new(NoRepair), vec![vec![a, b, c]]).await;
    let summary = DispatchSummary::from_reports(&reports);

    assert_eq!(summary.feeds, 3);
    assert_eq!(summary.outcomes.exception, 1);
    assert_eq!(summary.outcomes.ok, 2);
    assert_eq!(db.feed_history(a).await.unwrap()[0].status_code, 500);
    assert_eq!(db.get_stories_for_feed(b).await.unwrap().len(), 1);
    assert_eq!(db.get_stories_for_feed(c).await.unwrap().len(), 1);
    assert_eq!(reports[0].last_feed.as_ref().map(|f| f.id), Some(c));
}

#[tokio::test]
async fn test_degenerate_guids_across_runs_are_stable() {
    let server = MockServer::start().await;
    let body = format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Same</title>
{}</channel></rss>"#,
        (0..4)
            .map(|i| format!(
                "<item><guid>https://example.com/</guid><title>Post {i}</title>\
                 <link>https://example.com/post/{i}</link></item>"
            ))
            .collect::<String>()
    );
    Mock::given(method("GET"))
        .respond_with(rss_response(body))
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let id = db.insert_feed(&format!("{}/feed", server.uri()), "Same").await.unwrap();

    let first = run(&db, Arc::new(NoRepair), vec![vec![id]]).await;
    let second = run(&db, Arc::new(NoRepair), vec![vec![id]]).await;

    assert_eq!(first[0].stories.new, 4);
    assert_eq!(second[0].stories.new, 0);
    assert_eq!(second[0].stories.same, 4);
    assert_eq!(db.get_stories_for_feed(id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_partitioned_workers_cover_every_feed_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(rss_response(rss(&[("1", "One")])))
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(db.insert_feed(&format!("{}/feed/{i}", server.uri()), "F").await.unwrap());
    }
    ids.push(ids[0]);

    let reports = run(&db, Arc::new(NoRepair), partition_feeds(&ids, 2)).await;
    let summary = DispatchSummary::from_reports(&reports);

    assert_eq!(summary.workers, 2);
    assert_eq!(summary.feeds, 5);
    assert_eq!(summary.stories.new, 5);
}

#[tokio::test]
async fn test_repair_page_with_non_ascii_text_does_not_stop_queue() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><head><title>İstanbul</title>
<link rel="alternate" type="application/rss+xml" href="/rss"></head></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(rss_response(rss(&[("r1", "Moved")])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(rss_response(rss(&[("b1", "B")])))
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let a = db.insert_feed(&format!("{}/a", server.uri()), "A").await.unwrap();
    let b = db.insert_feed(&format!("{}/b", server.uri()), "B").await.unwrap();
    let repair = Arc::new(LinkDiscovery::new(reqwest::Client::new()));

    let reports = run(&db, repair, vec![vec![a, b]]).await;
    let summary = DispatchSummary::from_reports(&reports);

    assert_eq!(summary.feeds, 2);
    assert_eq!(summary.outcomes.http_error, 1);
    assert_eq!(summary.outcomes.ok, 1);
    let repaired = db.get_feed_by_id(a).await.unwrap();
    assert_eq!(repaired.address, format!("{}/rss", server.uri()));
    assert!(repaired.next_scheduled_update.is_some());
    assert_eq!(db.get_stories_for_feed(b).await.unwrap().len(), 1);
}
