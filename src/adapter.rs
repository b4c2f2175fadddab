//! The per-site adapter contract
//!
//! An adapter is the only part of the system that knows one site's URLs,
//! markup, and category vocabulary. Everything it does is synchronous and
//! deterministic: translate a query into request descriptors, parse a raw
//! response into releases. The pipeline owns all I/O, sessions, pacing,
//! and caching, so an adapter is testable from fixture files alone.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::capabilities::Capabilities;
use crate::error::PipelineError;
use crate::executor::ExecutorConfig;
use crate::normalize::Normalizer;
use crate::query::SearchQuery;
use crate::release::ReleaseInfo;
use crate::session::{LoginFlow, NoAuth};
use crate::translate::SearchRequest;
use crate::transport::{HttpRequest, RawResponse};

/// Static description of one site
#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// Stable identifier, used in logs, cache keys, and registration
    pub id: String,
    /// Human-readable site name
    pub name: String,
    pub base_url: String,
    /// Results per page the site serves; a shorter page ends pagination
    pub page_size: usize,
    /// Upper bound on pages fetched for one query
    pub max_pages: usize,
    /// Keep already-fetched pages when a later page fails, instead of
    /// failing the whole query
    pub best_effort: bool,
    /// Former domains the site answered under; a stale configured URL is
    /// migrated to `base_url` at registration
    pub legacy_urls: Vec<String>,
    pub capabilities: Capabilities,
    pub executor: ExecutorConfig,
    /// How long search results stay served from cache
    pub cache_ttl: Duration,
}

impl SiteConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            base_url: base_url.into(),
            page_size: 50,
            max_pages: 3,
            best_effort: false,
            legacy_urls: vec![],
            capabilities: Capabilities::new(),
            executor: ExecutorConfig::default(),
            cache_ttl: Duration::from_secs(300),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_paging(mut self, page_size: usize, max_pages: usize) -> Self {
        self.page_size = page_size;
        self.max_pages = max_pages;
        self
    }

    pub fn with_best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    pub fn with_legacy_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.legacy_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Replace a configured base URL that points at a former domain with
    /// the current one. Sites move and old saved settings keep working.
    pub fn resolve_base_url(&self, configured: &str) -> String {
        let trimmed = configured.trim_end_matches('/');
        if self
            .legacy_urls
            .iter()
            .any(|legacy| legacy.trim_end_matches('/') == trimmed)
        {
            info!(site = %self.id, configured, current = %self.base_url, "Migrating legacy site URL");
            return self.base_url.clone();
        }
        configured.to_string()
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

/// One site's translation and parsing logic.
///
/// Implementations must be pure in `translate` and `parse`; network access
/// belongs to the pipeline.
pub trait SiteAdapter: Send + Sync {
    fn config(&self) -> &SiteConfig;

    /// How the site is logged into. Public sites keep the default.
    fn login_flow(&self) -> Arc<dyn LoginFlow> {
        Arc::new(NoAuth)
    }

    /// Turn a query into one request descriptor per result page, in page
    /// order. An empty list means the site has nothing to ask for this
    /// query (for example an ID-only search it cannot serve).
    fn translate(&self, query: &SearchQuery) -> Vec<SearchRequest>;

    /// Interpret one raw response into releases. Must reject garbage with
    /// a parse error instead of returning an empty page, so markup drift
    /// is visible instead of silently shrinking results.
    fn parse(
        &self,
        response: &RawResponse,
        query: &SearchQuery,
    ) -> Result<Vec<ReleaseInfo>, PipelineError>;

    /// The normalization pass applied after parsing. Override to change
    /// the missing-category policy or enable the title filter.
    fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.config().id.clone(), self.config().name.clone())
    }

    /// The request that fetches a release's torrent file. `None` when the
    /// release has no download link (magnet-only sites).
    fn download_request(&self, release: &ReleaseInfo) -> Option<HttpRequest> {
        release.link.as_deref().map(HttpRequest::get)
    }

    fn id(&self) -> &str {
        &self.config().id
    }

    fn name(&self) -> &str {
        &self.config().name
    }
}
