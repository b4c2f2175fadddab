//! End-to-end pipeline tests against scripted sites
//!
//! These tests drive the public API with in-memory transports and verify
//! the complete flow of a search:
//! - Form login and cookie reuse across queries
//! - Transparent session recovery mid-request
//! - Pagination with early stop on a short page
//! - Single-flight result caching
//! - Torrent downloads over the authenticated session
//! - Multi-site fan-out where one bad site cannot poison the rest

use std::sync::Arc;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use harpoon::testing::{
    self, DemoRow, DemoTracker, MockResponse, MockTransport, results_page,
};
use harpoon::{
    DownloadOutcome, SearchManager, SearchQuery, SitePipeline, TorznabFeed, cats,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("harpoon=debug")
        .with_test_writer()
        .try_init();
}

/// A transport where the demo tracker's login endpoints already work
fn demo_transport() -> Arc<MockTransport> {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    transport.stub(
        "/takelogin.php",
        MockResponse::redirect("/my.php")
            .with_set_cookie("uid=42; Path=/; HttpOnly")
            .with_set_cookie("pass=s3cret; Path=/"),
    );
    transport.stub("/my.php", MockResponse::html(200, &testing::account_page()));
    transport
}

fn demo_pipeline(transport: &Arc<MockTransport>) -> SitePipeline {
    SitePipeline::new(
        Arc::new(DemoTracker::new("https://demo.example")),
        transport.clone(),
    )
}

fn tv_rows(count: usize) -> Vec<DemoRow> {
    (0..count)
        .map(|i| {
            DemoRow::new(
                2000 + i as u32,
                &format!("Some Show S01E{:02} 1080p WEB-DL", i + 1),
                "201",
            )
        })
        .collect()
}

// ============================================================================
// Login and pagination
// ============================================================================

#[tokio::test]
async fn test_search_logs_in_once_and_stops_on_short_page() {
    let transport = demo_transport();
    // Two full pages of 25, then a short one; page 3 is never asked for
    transport.stub("page=0", MockResponse::html(200, &results_page(&tv_rows(25))));
    transport.stub("page=1", MockResponse::html(200, &results_page(&tv_rows(25))));
    transport.stub("page=2", MockResponse::html(200, &results_page(&tv_rows(10))));

    let pipeline = SitePipeline::new(
        Arc::new(DemoTracker::new("https://demo.example").with_paging(25, 5)),
        transport.clone(),
    );
    let (releases, from_cache) = pipeline
        .search(&SearchQuery::search("some show"))
        .await
        .unwrap();

    assert_eq!(releases.len(), 60);
    assert!(!from_cache);
    assert_eq!(transport.request_count("/takelogin.php"), 1);
    assert_eq!(transport.request_count("page=2"), 1);
    assert_eq!(transport.request_count("page=3"), 0);

    // Every page request rode the session established by the login
    let search_request = transport.last_request("page=0").unwrap();
    assert_eq!(search_request.cookies.as_deref(), Some("uid=42; pass=s3cret"));

    // Normalization attributed each release to the site
    assert_eq!(releases[0].site_id.as_deref(), Some("demo"));
    assert_eq!(releases[0].categories, vec![cats::TV_HD]);
}

#[tokio::test]
async fn test_session_survives_across_queries() {
    let transport = demo_transport();
    transport.stub("page=0", MockResponse::html(200, &results_page(&tv_rows(3))));

    let pipeline = demo_pipeline(&transport);
    assert_eq!(pipeline.test().await.unwrap(), 3);
    assert_eq!(pipeline.test().await.unwrap(), 3);

    // One login serves both connection tests, and test queries skip the cache
    assert_eq!(transport.request_count("/takelogin.php"), 1);
    assert_eq!(transport.request_count("page=0"), 2);
}

#[tokio::test]
async fn test_login_failure_carries_the_sites_message() {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    transport.stub("/takelogin.php", MockResponse::html(200, ""));
    transport.stub(
        "/my.php",
        MockResponse::html(200, &testing::login_rejected_page()),
    );

    let pipeline = demo_pipeline(&transport);
    let err = pipeline.search(&SearchQuery::browse()).await.unwrap_err();

    assert_eq!(err.stage(), "auth");
    assert!(err.to_string().contains("Invalid username or password"));
    assert_eq!(transport.request_count("/takelogin.php"), 1);
}

// ============================================================================
// Session expiry recovery
// ============================================================================

#[tokio::test]
async fn test_expired_session_recovers_transparently() {
    let transport = demo_transport();
    // The first response has no logout link: the cookie lapsed server-side
    transport.stub_sequence(
        "page=0",
        vec![
            MockResponse::html(200, &testing::logged_out_page()),
            MockResponse::html(200, &results_page(&tv_rows(2))),
        ],
    );

    let pipeline = demo_pipeline(&transport);
    let (releases, _) = pipeline.search(&SearchQuery::browse()).await.unwrap();

    assert_eq!(releases.len(), 2);
    // Initial login, then one re-login and one re-issue
    assert_eq!(transport.request_count("/takelogin.php"), 2);
    assert_eq!(transport.request_count("page=0"), 2);
}

#[tokio::test]
async fn test_second_expiry_after_relogin_gives_up() {
    let transport = demo_transport();
    transport.stub(
        "page=0",
        MockResponse::html(200, &testing::logged_out_page()),
    );

    let pipeline = demo_pipeline(&transport);
    let err = pipeline.search(&SearchQuery::browse()).await.unwrap_err();

    assert_eq!(err.stage(), "auth");
    // Exactly one recovery attempt, not a login loop
    assert_eq!(transport.request_count("/takelogin.php"), 2);
    assert_eq!(transport.request_count("page=0"), 2);
}

// ============================================================================
// Caching
// ============================================================================

#[tokio::test]
async fn test_identical_concurrent_searches_fetch_once() {
    let transport = demo_transport();
    transport.stub("page=0", MockResponse::html(200, &results_page(&tv_rows(2))));

    let pipeline = Arc::new(demo_pipeline(&transport));
    let query = SearchQuery::search("some show");

    let a = tokio::spawn({
        let pipeline = pipeline.clone();
        let query = query.clone();
        async move { pipeline.search(&query).await.unwrap() }
    });
    let b = tokio::spawn({
        let pipeline = pipeline.clone();
        let query = query.clone();
        async move { pipeline.search(&query).await.unwrap() }
    });

    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(transport.request_count("page=0"), 1);
    // One of the two computed, the other was served the same data back
    assert_ne!(a.1, b.1);
    assert!(Arc::ptr_eq(&a.0, &b.0));
}

// ============================================================================
// Offset and limit
// ============================================================================

#[tokio::test]
async fn test_offset_and_limit_slice_after_fetching_enough_pages() {
    init_tracing();
    let transport = demo_transport();
    transport.stub(
        "page=0",
        MockResponse::html(
            200,
            &results_page(&[
                DemoRow::new(1, "Release A", "201"),
                DemoRow::new(2, "Release B", "201"),
            ]),
        ),
    );
    transport.stub(
        "page=1",
        MockResponse::html(
            200,
            &results_page(&[
                DemoRow::new(3, "Release C", "201"),
                DemoRow::new(4, "Release D", "201"),
            ]),
        ),
    );

    let pipeline = SitePipeline::new(
        Arc::new(DemoTracker::new("https://demo.example").with_paging(2, 5)),
        transport.clone(),
    );

    // Skip the first row, take three: both pages are needed to cover it
    let query = SearchQuery::browse().with_paging(3, 1);
    let (releases, _) = pipeline.search(&query).await.unwrap();

    let titles: Vec<&str> = releases.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["Release B", "Release C", "Release D"]);
    assert_eq!(transport.request_count("page=1"), 1);
}

// ============================================================================
// Downloads
// ============================================================================

#[tokio::test]
async fn test_download_rides_the_authenticated_session() {
    let transport = demo_transport();
    transport.stub("page=0", MockResponse::html(200, &results_page(&tv_rows(1))));
    transport.stub(
        "/download.php",
        MockResponse::new(
            200,
            "application/x-bittorrent",
            b"d8:announce3:url4:infod0:ee".to_vec(),
        ),
    );

    let pipeline = demo_pipeline(&transport);
    let (releases, _) = pipeline.search(&SearchQuery::browse()).await.unwrap();

    let outcome = pipeline.download(&releases[0]).await.unwrap();
    assert_matches!(outcome, DownloadOutcome::Torrent(ref bytes) if bytes.starts_with(b"d8:announce"));

    let request = transport.last_request("/download.php").unwrap();
    assert_eq!(request.cookies.as_deref(), Some("uid=42; pass=s3cret"));
}

#[tokio::test]
async fn test_download_rejects_an_html_page() {
    let transport = demo_transport();
    transport.stub("page=0", MockResponse::html(200, &results_page(&tv_rows(1))));
    transport.stub(
        "/download.php",
        MockResponse::html(200, "<html>You have reached your download quota</html>"),
    );

    let pipeline = demo_pipeline(&transport);
    let (releases, _) = pipeline.search(&SearchQuery::browse()).await.unwrap();

    let err = pipeline.download(&releases[0]).await.unwrap_err();
    assert_eq!(err.stage(), "parse");
}

// ============================================================================
// Multi-site fan-out
// ============================================================================

const UBUNTU_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:torznab="http://torznab.com/schemas/2015/feed">
  <channel>
    <item>
      <title>Ubuntu 24.04 Desktop amd64</title>
      <guid>https://feed.example/d/1</guid>
      <link>https://feed.example/dl/1.torrent</link>
      <pubDate>Sun, 19 Jan 2025 10:00:00 +0000</pubDate>
      <category>4020</category>
      <torznab:attr name="seeders" value="90"/>
      <torznab:attr name="peers" value="100"/>
    </item>
    <item>
      <title>ubuntu-server 22.04 iso</title>
      <guid>https://feed.example/d/2</guid>
      <link>https://feed.example/dl/2.torrent</link>
      <pubDate>Fri, 17 Jan 2025 10:00:00 +0000</pubDate>
      <category>4020</category>
    </item>
  </channel>
</rss>"#;

#[tokio::test]
async fn test_fan_out_merges_sites_and_tolerates_a_broken_one() {
    let transport = demo_transport();
    transport.stub(
        "page=0",
        MockResponse::html(200, &results_page(&[DemoRow::new(7, "Ubuntu 24.04 LTS amd64", "999")])),
    );
    transport.stub("feed.example/api", MockResponse::xml(200, UBUNTU_FEED));
    transport.stub(
        "broken.example/api",
        MockResponse::html(200, "<html>Scheduled maintenance</html>"),
    );

    let manager = SearchManager::new(transport.clone());
    manager.register(Arc::new(DemoTracker::new("https://demo.example")));
    manager.register(Arc::new(
        TorznabFeed::new("geek", "Geek Feed", "https://feed.example", "key1").unwrap(),
    ));
    manager.register(Arc::new(
        TorznabFeed::new("broken", "Broken Feed", "https://broken.example", "key2").unwrap(),
    ));

    let query = SearchQuery::search("ubuntu").with_categories(vec![cats::PC]);
    let results = manager.search_all(&query).await;
    assert_eq!(results.len(), 3);

    let demo = results.iter().find(|r| r.site_id == "demo").unwrap();
    assert_eq!(demo.releases.len(), 1);
    assert!(demo.error.is_none());
    // The demo site's "999" token is unmapped and lands in Other
    assert_eq!(demo.releases[0].categories, vec![cats::OTHER]);

    let feed = results.iter().find(|r| r.site_id == "geek").unwrap();
    assert_eq!(feed.releases.len(), 2);

    let broken = results.iter().find(|r| r.site_id == "broken").unwrap();
    assert!(broken.releases.is_empty());
    assert!(broken.error.is_some());

    // Merged view is newest-first across sites
    let merged = SearchManager::merge(results);
    assert_eq!(merged.len(), 3);
    assert_eq!(merged[0].title, "Ubuntu 24.04 Desktop amd64");
    assert_eq!(merged[2].title, "ubuntu-server 22.04 iso");

    // The feed carried its key in every request
    let feed_request = transport.last_request("feed.example").unwrap();
    assert!(feed_request.url.contains("apikey=key1"));
    assert!(feed_request.url.contains("cat=4000"));
}
