//! Per-site orchestration
//!
//! A [`SitePipeline`] wires one adapter to the shared machinery: session,
//! rate-limited executor, normalizer, and result cache. It owns the page
//! loop (sequential, stopping at the first short page), applies the
//! caller's offset and limit after normalization, and bounds how many
//! queries may run against the site at once.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::adapter::SiteAdapter;
use crate::cache::SearchCache;
use crate::capabilities::Capabilities;
use crate::error::PipelineError;
use crate::executor::RequestExecutor;
use crate::normalize::Normalizer;
use crate::query::SearchQuery;
use crate::release::ReleaseInfo;
use crate::session::{SessionManager, SessionStatus};
use crate::transport::Transport;

/// Queries one site is allowed to run at the same time
const MAX_CONCURRENT_QUERIES: usize = 2;

/// What a download request produced
#[derive(Debug, Clone)]
pub enum DownloadOutcome {
    /// The raw .torrent file
    Torrent(Vec<u8>),
    /// The site answered with a magnet URI instead of a file
    Magnet(String),
}

/// One site's fully wired search pipeline
pub struct SitePipeline {
    adapter: Arc<dyn SiteAdapter>,
    session: SessionManager,
    executor: RequestExecutor,
    normalizer: Normalizer,
    cache: SearchCache,
    query_permits: Semaphore,
}

impl SitePipeline {
    pub fn new(adapter: Arc<dyn SiteAdapter>, transport: Arc<dyn Transport>) -> Self {
        let config = adapter.config();
        Self {
            session: SessionManager::new(config.id.clone(), adapter.login_flow()),
            executor: RequestExecutor::new(config.id.clone(), transport, config.executor.clone()),
            cache: SearchCache::new(config.cache_ttl),
            normalizer: adapter.normalizer(),
            query_permits: Semaphore::new(MAX_CONCURRENT_QUERIES),
            adapter,
        }
    }

    pub fn id(&self) -> &str {
        self.adapter.id()
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.adapter.config().capabilities
    }

    pub fn session_status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Run a search. The boolean is true when the results came from cache.
    ///
    /// Queries the site's capabilities cannot serve return empty results
    /// rather than an error, so one narrow site never poisons a fan-out.
    pub async fn search(
        &self,
        query: &SearchQuery,
    ) -> Result<(Arc<Vec<ReleaseInfo>>, bool), PipelineError> {
        let _permit = self.query_permits.acquire().await.ok();

        if !self.adapter.config().capabilities.can_handle(query) {
            debug!(site = %self.id(), kind = %query.kind, "Query kind not supported, returning empty");
            return Ok((Arc::new(vec![]), false));
        }

        if !query.cache || query.is_test {
            let releases = self.fetch(query).await?;
            return Ok((Arc::new(releases), false));
        }

        let key = query.fingerprint();
        self.cache.get_or_compute(&key, || self.fetch(query)).await
    }

    /// Probe the site end to end with an uncached browse query
    pub async fn test(&self) -> Result<usize, PipelineError> {
        let query = SearchQuery::browse().as_test();
        let (releases, _) = self.search(&query).await?;
        info!(site = %self.id(), count = releases.len(), "Site test complete");
        Ok(releases.len())
    }

    /// Translate, fetch page by page, parse, and normalize
    async fn fetch(&self, query: &SearchQuery) -> Result<Vec<ReleaseInfo>, PipelineError> {
        let requests = self.adapter.translate(query);
        if requests.is_empty() {
            debug!(site = %self.id(), query = %query.describe(), "Nothing to request for this query");
            return Ok(vec![]);
        }

        let page_size = self.adapter.config().page_size;
        // A failed page fails the whole query unless the site opted into
        // keeping what already landed
        let best_effort = self.adapter.config().best_effort;
        let mut collected: Vec<ReleaseInfo> = Vec::new();

        for request in &requests {
            let response = match self
                .executor
                .execute_authenticated(&self.session, &request.to_http())
                .await
            {
                Ok(response) => response,
                Err(e) if best_effort && !collected.is_empty() => {
                    warn!(site = %self.id(), page = request.page, error = %e, "Page fetch failed, keeping earlier pages");
                    break;
                }
                Err(e) => return Err(e),
            };

            let page = match self.adapter.parse(&response, query) {
                Ok(page) => page,
                Err(e) if best_effort && !collected.is_empty() => {
                    warn!(site = %self.id(), page = request.page, error = %e, "Page parse failed, keeping earlier pages");
                    break;
                }
                Err(e) => return Err(e),
            };

            let short_page = page.len() < page_size;
            collected.extend(page);
            if short_page {
                debug!(site = %self.id(), page = request.page, "Short page ends pagination");
                break;
            }
        }

        let mut releases = self.normalizer.normalize(query, collected);

        let offset = query.offset.unwrap_or(0).max(0) as usize;
        if offset > 0 {
            releases.drain(..offset.min(releases.len()));
        }
        if let Some(limit) = query.limit {
            if limit > 0 {
                releases.truncate(limit as usize);
            }
        }

        info!(
            site = %self.id(),
            query = %query.describe(),
            count = releases.len(),
            "Search complete"
        );
        Ok(releases)
    }

    /// Fetch a release's torrent file through the site's session
    pub async fn download(&self, release: &ReleaseInfo) -> Result<DownloadOutcome, PipelineError> {
        if release.link.is_none() {
            if let Some(magnet) = &release.magnet_uri {
                return Ok(DownloadOutcome::Magnet(magnet.clone()));
            }
        }

        let request =
            self.adapter
                .download_request(release)
                .ok_or_else(|| PipelineError::Validation {
                    reason: format!("release '{}' has no download link", release.title),
                })?;

        let response = self
            .executor
            .execute_authenticated(&self.session, &request)
            .await?;

        if response.is_redirect() {
            if let Some(location) = response.location() {
                if location.starts_with("magnet:") {
                    return Ok(DownloadOutcome::Magnet(location.to_string()));
                }
            }
        }

        // torrent files are bencoded dictionaries, so they begin with 'd'
        if response.body.starts_with(b"d") {
            return Ok(DownloadOutcome::Torrent(response.body));
        }

        Err(PipelineError::Parse {
            site: self.id().to_string(),
            reason: "download did not return a torrent file".to_string(),
            payload: String::from_utf8_lossy(&response.body).into_owned(),
        })
    }

    /// Drop expired cache entries, returning how many were removed
    pub fn purge_cache(&self) -> usize {
        self.cache.purge_expired()
    }

    /// Forget the session and all cached results
    pub async fn reset(&self) {
        self.session.invalidate().await;
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SiteConfig;
    use crate::capabilities::Capabilities;
    use crate::testing::{MockResponse, MockTransport};
    use crate::translate::{SearchRequest, page_count};
    use crate::transport::RawResponse;

    /// Minimal adapter: one GET per page, one release per body line
    struct StubAdapter {
        config: SiteConfig,
    }

    impl StubAdapter {
        fn new() -> Self {
            Self {
                config: SiteConfig::new("stub", "Stub", "https://stub.example")
                    .with_capabilities(Capabilities::new())
                    .with_paging(2, 3),
            }
        }

        fn best_effort() -> Self {
            let mut stub = Self::new();
            stub.config = stub.config.with_best_effort();
            stub
        }

        fn paged(page_size: usize, max_pages: usize) -> Self {
            let mut stub = Self::new();
            stub.config = stub.config.with_paging(page_size, max_pages);
            stub
        }
    }

    impl SiteAdapter for StubAdapter {
        fn config(&self) -> &SiteConfig {
            &self.config
        }

        fn translate(&self, query: &SearchQuery) -> Vec<SearchRequest> {
            let pages = page_count(
                query.wanted_results(),
                self.config.page_size,
                self.config.max_pages,
            );
            (0..pages)
                .map(|p| {
                    SearchRequest::get(format!("{}/list?p={}", self.config.base_url, p))
                        .with_page(p)
                })
                .collect()
        }

        fn parse(
            &self,
            response: &RawResponse,
            _query: &SearchQuery,
        ) -> Result<Vec<ReleaseInfo>, PipelineError> {
            let text = response.text();
            if text.contains("garbage") {
                return Err(PipelineError::Parse {
                    site: "stub".into(),
                    reason: "unrecognized page".into(),
                    payload: text.into_owned(),
                });
            }
            Ok(text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| ReleaseInfo::new(l.trim(), format!("stub-{}", l.trim()), chrono::Utc::now()))
                .collect())
        }
    }

    fn pipeline(transport: Arc<MockTransport>) -> SitePipeline {
        SitePipeline::new(Arc::new(StubAdapter::new()), transport)
    }

    #[tokio::test]
    async fn test_short_page_ends_pagination() {
        let transport = Arc::new(MockTransport::new());
        transport.stub("p=0", MockResponse::html(200, "A\nB"));
        transport.stub("p=1", MockResponse::html(200, "C"));
        transport.stub("p=2", MockResponse::html(200, "D\nE"));

        let pipeline = pipeline(transport.clone());
        let (releases, _) = pipeline.search(&SearchQuery::browse()).await.unwrap();

        assert_eq!(releases.len(), 3);
        assert_eq!(transport.request_count("p=2"), 0);
    }

    #[tokio::test]
    async fn test_pages_accumulate_in_order_until_the_short_one() {
        let transport = Arc::new(MockTransport::new());
        let page = |n: usize, count: usize| {
            (0..count)
                .map(|i| format!("P{}-{}", n, i))
                .collect::<Vec<_>>()
                .join("\n")
        };
        transport.stub("p=0", MockResponse::html(200, &page(0, 100)));
        transport.stub("p=1", MockResponse::html(200, &page(1, 100)));
        transport.stub("p=2", MockResponse::html(200, &page(2, 40)));
        transport.stub("p=3", MockResponse::html(200, &page(3, 100)));

        let pipeline = SitePipeline::new(Arc::new(StubAdapter::paged(100, 5)), transport.clone());
        let (releases, _) = pipeline.search(&SearchQuery::browse()).await.unwrap();

        assert_eq!(releases.len(), 240);
        assert_eq!(releases[0].title, "P0-0");
        assert_eq!(releases[100].title, "P1-0");
        assert_eq!(releases[239].title, "P2-39");
        assert_eq!(transport.request_count("p=3"), 0);
    }

    #[tokio::test]
    async fn test_identical_queries_share_the_cache() {
        let transport = Arc::new(MockTransport::new());
        transport.stub("p=0", MockResponse::html(200, "A"));

        let pipeline = pipeline(transport.clone());
        let query = SearchQuery::search("a");

        let (_, from_cache) = pipeline.search(&query).await.unwrap();
        assert!(!from_cache);
        let (releases, from_cache) = pipeline.search(&query).await.unwrap();
        assert!(from_cache);
        assert_eq!(releases.len(), 1);
        assert_eq!(transport.request_count("p=0"), 1);
    }

    #[tokio::test]
    async fn test_test_queries_bypass_the_cache() {
        let transport = Arc::new(MockTransport::new());
        transport.stub("p=0", MockResponse::html(200, "A"));

        let pipeline = pipeline(transport.clone());
        pipeline.search(&SearchQuery::browse().as_test()).await.unwrap();
        pipeline.search(&SearchQuery::browse().as_test()).await.unwrap();

        assert_eq!(transport.request_count("p=0"), 2);
    }

    #[tokio::test]
    async fn test_unsupported_query_kind_is_empty_not_an_error() {
        let transport = Arc::new(MockTransport::new());
        let pipeline = pipeline(transport.clone());

        // the stub advertises plain search only
        let (releases, _) = pipeline
            .search(&SearchQuery::tv_search("show").with_season_episode(1, None))
            .await
            .unwrap();

        assert!(releases.is_empty());
        assert_eq!(transport.total_requests(), 0);
    }

    #[tokio::test]
    async fn test_offset_and_limit_slice_after_normalization() {
        let transport = Arc::new(MockTransport::new());
        transport.stub("p=0", MockResponse::html(200, "A\nB"));
        transport.stub("p=1", MockResponse::html(200, "C\nD"));
        transport.stub("p=2", MockResponse::html(200, "E"));

        let pipeline = pipeline(transport.clone());
        let query = SearchQuery::browse().with_paging(2, 1).without_cache();
        let (releases, _) = pipeline.search(&query).await.unwrap();

        let titles: Vec<_> = releases.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn test_later_page_failure_fails_the_query() {
        let transport = Arc::new(MockTransport::new());
        transport.stub("p=0", MockResponse::html(200, "A\nB"));
        transport.stub("p=1", MockResponse::html(200, "garbage"));

        let pipeline = pipeline(transport.clone());
        let err = pipeline.search(&SearchQuery::browse()).await.unwrap_err();

        assert_eq!(err.stage(), "parse");
    }

    #[tokio::test]
    async fn test_best_effort_site_keeps_earlier_pages() {
        let transport = Arc::new(MockTransport::new());
        transport.stub("p=0", MockResponse::html(200, "A\nB"));
        transport.stub("p=1", MockResponse::html(200, "garbage"));

        let pipeline = SitePipeline::new(Arc::new(StubAdapter::best_effort()), transport);
        let (releases, _) = pipeline.search(&SearchQuery::browse()).await.unwrap();

        assert_eq!(releases.len(), 2);
    }

    #[tokio::test]
    async fn test_first_page_failure_is_an_error() {
        let transport = Arc::new(MockTransport::new());
        transport.stub("p=0", MockResponse::html(200, "garbage"));

        let pipeline = pipeline(transport.clone());
        let err = pipeline.search(&SearchQuery::browse()).await.unwrap_err();
        assert_eq!(err.stage(), "parse");
    }

    #[tokio::test]
    async fn test_download_magnet_only_release() {
        let transport = Arc::new(MockTransport::new());
        let pipeline = pipeline(transport);

        let mut release = ReleaseInfo::new("A", "stub-A", chrono::Utc::now());
        release.magnet_uri = Some("magnet:?xt=urn:btih:feed".to_string());

        match pipeline.download(&release).await.unwrap() {
            DownloadOutcome::Magnet(uri) => assert!(uri.starts_with("magnet:")),
            other => panic!("expected magnet, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_download_rejects_html_masquerading_as_torrent() {
        let transport = Arc::new(MockTransport::new());
        transport.stub("/dl/", MockResponse::html(200, "<html>quota exceeded</html>"));

        let pipeline = pipeline(transport);
        let mut release = ReleaseInfo::new("A", "stub-A", chrono::Utc::now());
        release.link = Some("https://stub.example/dl/1".to_string());

        let err = pipeline.download(&release).await.unwrap_err();
        assert_eq!(err.stage(), "parse");
    }

    #[tokio::test]
    async fn test_download_returns_torrent_bytes() {
        let transport = Arc::new(MockTransport::new());
        transport.stub(
            "/dl/",
            MockResponse::new(200, "application/x-bittorrent", b"d8:announce3:url4:infod0:ee".to_vec()),
        );

        let pipeline = pipeline(transport);
        let mut release = ReleaseInfo::new("A", "stub-A", chrono::Utc::now());
        release.link = Some("https://stub.example/dl/1".to_string());

        match pipeline.download(&release).await.unwrap() {
            DownloadOutcome::Torrent(bytes) => assert!(bytes.starts_with(b"d8:announce")),
            other => panic!("expected torrent bytes, got {other:?}"),
        }
    }
}
