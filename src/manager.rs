//! Multi-site registry and query fan-out
//!
//! The [`SearchManager`] owns one [`SitePipeline`] per registered site and
//! runs queries across them concurrently. Sites fail independently: in a
//! fan-out a failing site contributes an error entry, never a missing one,
//! and never takes the others down with it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;

use crate::adapter::SiteAdapter;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::{DownloadOutcome, SitePipeline};
use crate::query::SearchQuery;
use crate::release::ReleaseInfo;
use crate::transport::{HttpTransport, Transport};

/// Outcome of one site's search within a fan-out
#[derive(Debug, Clone, Serialize)]
pub struct SiteSearchResult {
    pub site_id: String,
    pub site_name: String,
    pub releases: Vec<ReleaseInfo>,
    pub elapsed_ms: u64,
    pub from_cache: bool,
    /// Error message when the site failed; `releases` is empty then
    pub error: Option<String>,
}

/// Owns every registered site pipeline
pub struct SearchManager {
    transport: Arc<dyn Transport>,
    pipelines: RwLock<HashMap<String, Arc<SitePipeline>>>,
}

impl SearchManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pipelines: RwLock::new(HashMap::new()),
        }
    }

    /// Manager over a live HTTP transport, tuned from the environment
    pub fn from_env() -> anyhow::Result<Self> {
        let config = PipelineConfig::from_env()?;
        let transport = HttpTransport::new(&config.user_agent, config.request_timeout())?;
        Ok(Self::new(Arc::new(transport)))
    }

    /// Build a pipeline for `adapter` and register it under its site ID.
    /// Re-registering an ID replaces the old pipeline.
    pub fn register(&self, adapter: Arc<dyn SiteAdapter>) {
        let pipeline = Arc::new(SitePipeline::new(adapter, self.transport.clone()));
        tracing::info!(site = %pipeline.id(), name = %pipeline.name(), "Registered site");
        self.pipelines
            .write()
            .insert(pipeline.id().to_string(), pipeline);
    }

    pub fn unregister(&self, site_id: &str) -> bool {
        self.pipelines.write().remove(site_id).is_some()
    }

    /// Registered site IDs, sorted
    pub fn sites(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pipelines.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, site_id: &str) -> Option<Arc<SitePipeline>> {
        self.pipelines.read().get(site_id).cloned()
    }

    fn require(&self, site_id: &str) -> Result<Arc<SitePipeline>, PipelineError> {
        self.get(site_id)
            .ok_or_else(|| PipelineError::SiteNotRegistered(site_id.to_string()))
    }

    /// Search a single site, with typed errors
    pub async fn search_site(
        &self,
        site_id: &str,
        query: &SearchQuery,
    ) -> Result<SiteSearchResult, PipelineError> {
        let pipeline = self.require(site_id)?;
        let start = Instant::now();
        let (releases, from_cache) = pipeline.search(query).await?;

        Ok(SiteSearchResult {
            site_id: pipeline.id().to_string(),
            site_name: pipeline.name().to_string(),
            releases: releases.as_ref().clone(),
            elapsed_ms: start.elapsed().as_millis() as u64,
            from_cache,
            error: None,
        })
    }

    /// Search across all registered sites concurrently
    pub async fn search_all(&self, query: &SearchQuery) -> Vec<SiteSearchResult> {
        let pipelines: Vec<Arc<SitePipeline>> = self.pipelines.read().values().cloned().collect();
        Self::fan_out(pipelines, query).await
    }

    /// Search a chosen subset of sites concurrently. An unknown ID yields
    /// an error entry instead of vanishing from the results.
    pub async fn search_sites(
        &self,
        site_ids: &[&str],
        query: &SearchQuery,
    ) -> Vec<SiteSearchResult> {
        let mut pipelines = Vec::with_capacity(site_ids.len());
        let mut results = Vec::new();
        {
            let registry = self.pipelines.read();
            for id in site_ids {
                match registry.get(*id) {
                    Some(pipeline) => pipelines.push(pipeline.clone()),
                    None => {
                        tracing::warn!(site = %id, "Fan-out names an unregistered site");
                        results.push(SiteSearchResult {
                            site_id: id.to_string(),
                            site_name: String::new(),
                            releases: vec![],
                            elapsed_ms: 0,
                            from_cache: false,
                            error: Some(PipelineError::SiteNotRegistered(id.to_string()).to_string()),
                        });
                    }
                }
            }
        }

        results.extend(Self::fan_out(pipelines, query).await);
        results
    }

    /// Run one query against each pipeline at once. Runs on the caller's
    /// task, so dropping the future cancels the in-flight page fetches.
    async fn fan_out(
        pipelines: Vec<Arc<SitePipeline>>,
        query: &SearchQuery,
    ) -> Vec<SiteSearchResult> {
        let parallel = pipelines.len().max(1);
        stream::iter(pipelines)
            .map(|pipeline| {
                let query = query.clone();
                async move { Self::run_query(pipeline, query).await }
            })
            .buffer_unordered(parallel)
            .collect()
            .await
    }

    /// Search one site, folding any failure into the result envelope
    async fn run_query(pipeline: Arc<SitePipeline>, query: SearchQuery) -> SiteSearchResult {
        let start = Instant::now();

        match pipeline.search(&query).await {
            Ok((releases, from_cache)) => SiteSearchResult {
                site_id: pipeline.id().to_string(),
                site_name: pipeline.name().to_string(),
                releases: releases.as_ref().clone(),
                elapsed_ms: start.elapsed().as_millis() as u64,
                from_cache,
                error: None,
            },
            Err(e) => {
                tracing::warn!(
                    site = %pipeline.id(),
                    stage = e.stage(),
                    error = %e,
                    "Site search failed"
                );
                SiteSearchResult {
                    site_id: pipeline.id().to_string(),
                    site_name: pipeline.name().to_string(),
                    releases: vec![],
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    from_cache: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Merge a fan-out into one flat list, newest first
    pub fn merge(results: Vec<SiteSearchResult>) -> Vec<ReleaseInfo> {
        let mut all: Vec<ReleaseInfo> = results.into_iter().flat_map(|r| r.releases).collect();
        all.sort_by(|a, b| b.publish_date.cmp(&a.publish_date));
        all
    }

    /// Probe one site end to end, returning how many releases its browse
    /// page yielded
    pub async fn test_site(&self, site_id: &str) -> Result<usize, PipelineError> {
        self.require(site_id)?.test().await
    }

    /// Fetch the torrent behind a release via the site it came from. Goes
    /// through that site's session and rate limit, so it works on private
    /// sites where the bare link would not.
    pub async fn download_release(
        &self,
        release: &ReleaseInfo,
    ) -> Result<DownloadOutcome, PipelineError> {
        let site_id = release
            .site_id
            .as_deref()
            .ok_or_else(|| PipelineError::Validation {
                reason: "release carries no site attribution".to_string(),
            })?;
        let pipeline = self.require(site_id)?;

        tracing::debug!(site = %site_id, title = %release.title, "Downloading release");
        pipeline.download(release).await
    }

    /// Drop expired cache entries across every site, returning how many
    /// were removed
    pub fn purge_caches(&self) -> usize {
        self.pipelines.read().values().map(|p| p.purge_cache()).sum()
    }
}
