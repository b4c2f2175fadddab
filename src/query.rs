//! Canonical search queries
//!
//! A [`SearchQuery`] is the uniform query every adapter receives. It is an
//! immutable value: adapters that need a rewritten variant derive a copy
//! through the builder methods instead of mutating the caller's instance.

use serde::{Deserialize, Serialize};

/// The kind of search being performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    /// General text search
    #[default]
    Search,
    /// TV show search (supports season/episode)
    TvSearch,
    /// Movie search
    MovieSearch,
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryKind::Search => write!(f, "search"),
            QueryKind::TvSearch => write!(f, "tvsearch"),
            QueryKind::MovieSearch => write!(f, "movie"),
        }
    }
}

/// A search query in canonical form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    /// The kind of search
    pub kind: QueryKind,

    /// Free-text search term. `None` (or empty) together with no structured
    /// IDs means a browse request for the site's latest releases.
    pub search_term: Option<String>,

    /// Canonical category IDs to search in
    pub categories: Vec<i32>,

    /// Maximum number of results the caller wants
    pub limit: Option<i32>,

    /// Result offset for pagination
    pub offset: Option<i32>,

    /// Whether cached results may satisfy this query
    pub cache: bool,

    /// Connectivity-test queries always bypass the cache and are not stored
    pub is_test: bool,

    // TV-specific fields
    /// Season number
    pub season: Option<i32>,
    /// Episode number/identifier
    pub episode: Option<String>,

    // Structured IDs
    /// IMDB ID (e.g., "tt1234567")
    pub imdb_id: Option<String>,
    /// TVDB ID
    pub tvdb_id: Option<i32>,
    /// TMDB ID
    pub tmdb_id: Option<i32>,
    /// Douban ID
    pub douban_id: Option<i32>,

    /// Release year
    pub year: Option<i32>,
}

impl SearchQuery {
    /// Create a new free-text search query
    pub fn search(term: &str) -> Self {
        Self {
            kind: QueryKind::Search,
            search_term: Some(term.to_string()),
            cache: true,
            ..Default::default()
        }
    }

    /// Create a TV search query
    pub fn tv_search(term: &str) -> Self {
        Self {
            kind: QueryKind::TvSearch,
            search_term: Some(term.to_string()),
            cache: true,
            ..Default::default()
        }
    }

    /// Create a movie search query
    pub fn movie_search(term: &str) -> Self {
        Self {
            kind: QueryKind::MovieSearch,
            search_term: Some(term.to_string()),
            cache: true,
            ..Default::default()
        }
    }

    /// Create a browse query for the site's latest releases
    pub fn browse() -> Self {
        Self {
            kind: QueryKind::Search,
            cache: true,
            ..Default::default()
        }
    }

    /// Add season/episode to a TV search
    pub fn with_season_episode(mut self, season: i32, episode: Option<&str>) -> Self {
        self.season = Some(season);
        self.episode = episode.map(|s| s.to_string());
        self
    }

    /// Add an IMDB ID to the query
    pub fn with_imdb(mut self, imdb_id: &str) -> Self {
        self.imdb_id = Some(imdb_id.to_string());
        self
    }

    /// Add categories to the query
    pub fn with_categories(mut self, cats: Vec<i32>) -> Self {
        self.categories = cats;
        self
    }

    /// Add limit/offset paging
    pub fn with_paging(mut self, limit: i32, offset: i32) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Disable the result cache for this query
    pub fn without_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    /// Mark this as a connectivity-test query
    pub fn as_test(mut self) -> Self {
        self.is_test = true;
        self.cache = false;
        self
    }

    /// How many leading results must be fetched to satisfy this query's
    /// offset and limit together; `None` when unbounded. Offsets are
    /// applied on our side, so the fetch has to cover the skipped rows too.
    pub fn wanted_results(&self) -> Option<i32> {
        match self.limit {
            Some(limit) if limit > 0 => Some(limit + self.offset.unwrap_or(0).max(0)),
            _ => None,
        }
    }

    /// Whether this query asks for the latest releases rather than a search
    pub fn is_browse(&self) -> bool {
        self.search_term.as_deref().unwrap_or("").trim().is_empty() && !self.is_id_search()
    }

    /// Check if this is an ID-based search (IMDB, TVDB, etc.)
    pub fn is_id_search(&self) -> bool {
        self.imdb_id.is_some()
            || self.tvdb_id.is_some()
            || self.tmdb_id.is_some()
            || self.douban_id.is_some()
    }

    /// Get the episode search string (e.g., "S01E05")
    pub fn episode_string(&self) -> Option<String> {
        self.season.map(|s| {
            if let Some(ref ep) = self.episode {
                format!("S{:02}E{}", s, ep)
            } else {
                format!("S{:02}", s)
            }
        })
    }

    /// Get the IMDB ID without the "tt" prefix
    pub fn imdb_id_numeric(&self) -> Option<String> {
        self.imdb_id
            .as_ref()
            .map(|id| id.trim_start_matches("tt").to_string())
    }

    /// Human-readable query description for logging
    pub fn describe(&self) -> String {
        let mut parts = vec![];

        if let Some(ref term) = self.search_term {
            parts.push(term.clone());
        }
        if let Some(ep) = self.episode_string() {
            parts.push(ep);
        }
        if let Some(ref imdb) = self.imdb_id {
            parts.push(imdb.clone());
        }
        if parts.is_empty() {
            parts.push("<browse>".to_string());
        }

        parts.join(" ")
    }

    /// Stable fingerprint over the structured query fields, used as the
    /// cache key.
    ///
    /// Categories are sorted and deduplicated first so their order never
    /// changes the key, and the term is whitespace-normalized. The `cache`
    /// and `is_test` flags are deliberately excluded: they control cache
    /// behavior, they are not part of what is being asked.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut categories = self.categories.clone();
        categories.sort_unstable();
        categories.dedup();

        let term = self
            .search_term
            .as_deref()
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty());

        let canonical = FingerprintFields {
            kind: self.kind,
            term,
            categories,
            limit: self.limit,
            offset: self.offset,
            season: self.season,
            episode: self.episode.clone(),
            imdb_id: self.imdb_id.clone(),
            tvdb_id: self.tvdb_id,
            tmdb_id: self.tmdb_id,
            douban_id: self.douban_id,
            year: self.year,
        };

        let json = serde_json::to_string(&canonical).unwrap_or_default();
        let hash = Sha256::digest(json.as_bytes());
        format!("{:x}", hash)
    }
}

/// The exact field set that participates in the fingerprint
#[derive(Serialize)]
struct FingerprintFields {
    kind: QueryKind,
    term: Option<String>,
    categories: Vec<i32>,
    limit: Option<i32>,
    offset: Option<i32>,
    season: Option<i32>,
    episode: Option<String>,
    imdb_id: Option<String>,
    tvdb_id: Option<i32>,
    tmdb_id: Option<i32>,
    douban_id: Option<i32>,
    year: Option<i32>,
}
