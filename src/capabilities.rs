//! What a site can answer
//!
//! Capabilities gate dispatch: the manager only forwards a query to sites
//! whose capabilities cover its kind, and translators consult the per-mode
//! parameters to decide between ID lookups and text search.

use serde::{Deserialize, Serialize};

use crate::categories::CategoryMap;
use crate::query::{QueryKind, SearchQuery};

/// TV search parameters a site supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TvSearchParam {
    Q,
    Season,
    Ep,
    ImdbId,
    TvdbId,
    TmdbId,
    DoubanId,
    Year,
}

/// Movie search parameters a site supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovieSearchParam {
    Q,
    ImdbId,
    TmdbId,
    DoubanId,
    Year,
}

/// Capabilities of one site
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Maximum results per page
    pub limits_max: Option<i32>,
    /// Default results per page
    pub limits_default: Option<i32>,

    /// Whether free-text search is available
    pub search_available: bool,

    /// TV search parameters supported (empty = no TV search)
    pub tv_search_params: Vec<TvSearchParam>,

    /// Movie search parameters supported (empty = no movie search)
    pub movie_search_params: Vec<MovieSearchParam>,

    /// The site's category vocabulary
    pub categories: CategoryMap,
}

impl Capabilities {
    /// Create default capabilities (text search only)
    pub fn new() -> Self {
        Self {
            search_available: true,
            limits_default: Some(100),
            limits_max: Some(100),
            ..Default::default()
        }
    }

    pub fn tv_search_available(&self) -> bool {
        !self.tv_search_params.is_empty()
    }

    pub fn movie_search_available(&self) -> bool {
        !self.movie_search_params.is_empty()
    }

    pub fn has_tv_param(&self, param: TvSearchParam) -> bool {
        self.tv_search_params.contains(&param)
    }

    pub fn has_movie_param(&self, param: MovieSearchParam) -> bool {
        self.movie_search_params.contains(&param)
    }

    /// Whether this site can answer the given query at all
    pub fn can_handle(&self, query: &SearchQuery) -> bool {
        match query.kind {
            QueryKind::Search => self.search_available,
            QueryKind::TvSearch => self.tv_search_available(),
            QueryKind::MovieSearch => self.movie_search_available(),
        }
    }
}
