//! Release normalization
//!
//! Parsers return whatever a site claims; this pass makes the claims safe
//! to rank and store. Counts and volume factors get clamped into their
//! invariants (with a warning, since a violation usually means the site
//! changed its markup), releases missing category information are handled
//! per adapter policy, sitewide promo events override per-release volume
//! factors, and sites with fuzzy search engines get an optional all-words
//! title filter.

use tracing::{debug, warn};

use crate::query::SearchQuery;
use crate::release::ReleaseInfo;
use crate::translate::sanitize_term;

/// What to do with a release whose category could not be determined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingCategoryPolicy {
    /// Assume the site only returned what was asked for and attribute the
    /// query's categories to the release
    #[default]
    AssumeRequested,
    /// Drop the release rather than guess
    Drop,
}

/// Volume-factor adjustments a site's promo labels translate to
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VolumeOverride {
    pub download_factor: Option<f64>,
    pub upload_factor: Option<f64>,
}

impl VolumeOverride {
    /// Download does not count against the ratio
    pub const FREELEECH: VolumeOverride = VolumeOverride {
        download_factor: Some(0.0),
        upload_factor: None,
    };

    /// Download counts half
    pub const HALF_LEECH: VolumeOverride = VolumeOverride {
        download_factor: Some(0.5),
        upload_factor: None,
    };

    /// Upload counts twice
    pub const DOUBLE_UPLOAD: VolumeOverride = VolumeOverride {
        download_factor: None,
        upload_factor: Some(2.0),
    };

    /// Combine two overrides; `other` wins where both set a factor
    pub fn merge(self, other: VolumeOverride) -> VolumeOverride {
        VolumeOverride {
            download_factor: other.download_factor.or(self.download_factor),
            upload_factor: other.upload_factor.or(self.upload_factor),
        }
    }

    pub fn apply(&self, release: &mut ReleaseInfo) {
        if let Some(factor) = self.download_factor {
            release.download_volume_factor = factor;
        }
        if let Some(factor) = self.upload_factor {
            release.upload_volume_factor = factor;
        }
    }
}

/// Per-site normalization pass applied to every parsed page
pub struct Normalizer {
    site_id: String,
    site_name: String,
    missing_category: MissingCategoryPolicy,
    volume_override: Option<VolumeOverride>,
    title_filter: bool,
}

impl Normalizer {
    pub fn new(site_id: impl Into<String>, site_name: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            site_name: site_name.into(),
            missing_category: MissingCategoryPolicy::default(),
            volume_override: None,
            title_filter: false,
        }
    }

    pub fn with_missing_category(mut self, policy: MissingCategoryPolicy) -> Self {
        self.missing_category = policy;
        self
    }

    /// Apply a sitewide promo event (freeleech weekend, double upload) to
    /// every release, overriding whatever factors the listing showed
    pub fn with_volume_override(mut self, event: VolumeOverride) -> Self {
        self.volume_override = Some(event);
        self
    }

    /// Keep only releases whose title contains every word of the query
    /// term. For sites whose search matches descriptions or is otherwise
    /// fuzzier than callers expect.
    pub fn with_title_filter(mut self) -> Self {
        self.title_filter = true;
        self
    }

    /// Normalize one page of parsed releases for the given query
    pub fn normalize(&self, query: &SearchQuery, releases: Vec<ReleaseInfo>) -> Vec<ReleaseInfo> {
        let filter_words: Vec<String> = if self.title_filter {
            query
                .search_term
                .as_deref()
                .map(|t| {
                    sanitize_term(t)
                        .to_lowercase()
                        .split_whitespace()
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default()
        } else {
            vec![]
        };

        let mut kept = Vec::with_capacity(releases.len());

        for mut release in releases {
            if release.title.trim().is_empty() {
                warn!(site = %self.site_id, guid = %release.guid, "Dropping release with empty title");
                continue;
            }

            if !filter_words.is_empty() {
                let title = release.title.to_lowercase();
                if !filter_words.iter().all(|w| title.contains(w.as_str())) {
                    debug!(site = %self.site_id, title = %release.title, "Title does not match query, dropping");
                    continue;
                }
            }

            if release.categories.is_empty() {
                match self.missing_category {
                    MissingCategoryPolicy::AssumeRequested => {
                        release.categories = query.categories.clone();
                    }
                    MissingCategoryPolicy::Drop => {
                        debug!(site = %self.site_id, title = %release.title, "No category information, dropping");
                        continue;
                    }
                }
            }

            if let Some(event) = &self.volume_override {
                event.apply(&mut release);
            }

            self.clamp_counts(&mut release);
            self.clamp_factors(&mut release);

            release.site_id = Some(self.site_id.clone());
            release.site_name = Some(self.site_name.clone());

            kept.push(release);
        }

        kept
    }

    /// Seeders are never negative, and peers (the total swarm) never falls
    /// below the seeders inside it
    fn clamp_counts(&self, release: &mut ReleaseInfo) {
        if let Some(seeders) = release.seeders {
            if seeders < 0 {
                warn!(site = %self.site_id, title = %release.title, seeders, "Negative seeder count, clamping to zero");
                release.seeders = Some(0);
            }
        }
        if let Some(peers) = release.peers {
            if peers < 0 {
                warn!(site = %self.site_id, title = %release.title, peers, "Negative peer count, clamping to zero");
                release.peers = Some(0);
            }
        }
        if let (Some(seeders), Some(peers)) = (release.seeders, release.peers) {
            if peers < seeders {
                warn!(
                    site = %self.site_id,
                    title = %release.title,
                    seeders,
                    peers,
                    "Peer count below seeder count, clamping"
                );
                release.peers = Some(seeders);
            }
        }
    }

    /// Volume factors must be finite and non-negative; anything else resets
    /// to the neutral 1.0
    fn clamp_factors(&self, release: &mut ReleaseInfo) {
        if !release.download_volume_factor.is_finite() || release.download_volume_factor < 0.0 {
            warn!(
                site = %self.site_id,
                title = %release.title,
                factor = release.download_volume_factor,
                "Invalid download volume factor, resetting"
            );
            release.download_volume_factor = 1.0;
        }
        if !release.upload_volume_factor.is_finite() || release.upload_volume_factor < 0.0 {
            warn!(
                site = %self.site_id,
                title = %release.title,
                factor = release.upload_volume_factor,
                "Invalid upload volume factor, resetting"
            );
            release.upload_volume_factor = 1.0;
        }
    }
}
