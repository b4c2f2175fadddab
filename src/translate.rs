//! Query-to-request translation
//!
//! Adapters turn one [`SearchQuery`](crate::query::SearchQuery) into a list
//! of [`SearchRequest`] descriptors, one per result page, without touching
//! the network. Descriptors deliberately carry no session material: the
//! executor attaches the current cookies at send time, so a descriptor
//! re-issued after a re-login picks up the fresh session.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::query::SearchQuery;
use crate::transport::{HttpMethod, HttpRequest};

/// One site request produced by an adapter's translator
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub form: Option<Vec<(String, String)>>,
    /// Zero-based index of the result page this request fetches
    pub page: usize,
}

impl SearchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: vec![],
            form: None,
            page: 0,
        }
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: vec![],
            form: Some(form),
            page: 0,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    /// Materialize the descriptor into a sendable request. Cookies are not
    /// attached here; the executor injects the current session's.
    pub fn to_http(&self) -> HttpRequest {
        HttpRequest {
            method: self.method,
            url: self.url.clone(),
            headers: self.headers.clone(),
            form: self.form.clone(),
            cookies: None,
        }
    }
}

static TERM_CLEANER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s.\-]").unwrap());

/// Strip characters most site search engines cannot tokenize and collapse
/// runs of whitespace
pub fn sanitize_term(term: &str) -> String {
    let cleaned = TERM_CLEANER.replace_all(term, " ");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The query text including an `SxxEyy` token, for sites without structured
/// season/episode fields
pub fn term_with_episode(query: &SearchQuery) -> Option<String> {
    let term = query.search_term.as_deref().map(sanitize_term);
    let episode = query.episode_string();

    match (term, episode) {
        (Some(t), Some(e)) if !t.is_empty() => Some(format!("{} {}", t, e)),
        (Some(t), None) if !t.is_empty() => Some(t),
        (_, Some(e)) => Some(e),
        _ => None,
    }
}

/// Result offset of a page for sites that paginate by offset
pub fn page_offset(page: usize, page_size: usize) -> usize {
    page * page_size
}

/// How many page requests to emit for a query.
///
/// With an explicit limit, enough pages to cover it; without one, the full
/// ceiling (the orchestrator stops early once a site returns a short page).
pub fn page_count(limit: Option<i32>, page_size: usize, max_pages: usize) -> usize {
    let max_pages = max_pages.max(1);
    match limit {
        Some(limit) if limit > 0 && page_size > 0 => {
            let needed = (limit as usize).div_ceil(page_size);
            needed.clamp(1, max_pages)
        }
        _ => max_pages,
    }
}
