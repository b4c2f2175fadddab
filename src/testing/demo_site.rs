//! A fixture tracker for exercising the full HTML path
//!
//! [`DemoTracker`] models the classic private-tracker shape: a cookie
//! session established by a login form, category checkboxes, and a torrent
//! table scraped out of server-rendered HTML. Paired with
//! [`MockTransport`](super::MockTransport) and the page builders below it
//! drives end-to-end tests without leaving the process.

use std::sync::Arc;
use std::time::Duration;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::adapter::{SiteAdapter, SiteConfig};
use crate::capabilities::{Capabilities, MovieSearchParam, TvSearchParam};
use crate::categories::{CategoryMap, cats};
use crate::error::PipelineError;
use crate::executor::{ExecutorConfig, RateLimitConfig, RetryConfig};
use crate::normalize::Normalizer;
use crate::parse::{parse_count, parse_fuzzy_date, parse_size};
use crate::query::SearchQuery;
use crate::release::ReleaseInfo;
use crate::session::{ExpirySignal, FormLogin, LoginFlow};
use crate::translate::{SearchRequest, page_count, term_with_episode};
use crate::transport::RawResponse;

/// Text shown instead of the torrent table when a search matches nothing
const NO_RESULTS_MARKER: &str = "No torrents found";

/// Present on every page served to a logged-in member
const LOGGED_IN_MARKER: &str = "/logout.php";

/// The domain the demo site retired when it moved to `demo.example`
const LEGACY_URL: &str = "https://demo-tracker.example";

/// A private tracker that exists only in tests
pub struct DemoTracker {
    config: SiteConfig,
    username: String,
    password: String,
}

impl DemoTracker {
    pub fn new(base_url: impl Into<String>) -> Self {
        // The site answers from memory, so real-tracker pacing would only
        // slow tests down
        let executor = ExecutorConfig {
            rate_limit: RateLimitConfig {
                requests_per_second: 1000,
                burst_size: 1000,
            },
            retry: RetryConfig {
                initial_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(5),
                ..RetryConfig::default()
            },
            request_timeout: Duration::from_secs(5),
        };

        let mut config = SiteConfig::new("demo", "Demo Tracker", "https://demo.example")
            .with_legacy_urls([LEGACY_URL])
            .with_capabilities(Self::capabilities())
            .with_paging(25, 3)
            .with_executor(executor);
        config.base_url = config.resolve_base_url(&base_url.into());

        Self {
            config,
            username: "demo".to_string(),
            password: "hunter2".to_string(),
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }

    pub fn with_paging(mut self, page_size: usize, max_pages: usize) -> Self {
        self.config = self.config.with_paging(page_size, max_pages);
        self
    }

    fn capabilities() -> Capabilities {
        let mut categories = CategoryMap::new();
        categories.add("101", cats::MOVIES_HD, "Movies/1080p");
        categories.add("102", cats::MOVIES_UHD, "Movies/2160p");
        categories.add("103", cats::MOVIES_SD, "Movies/DVD");
        categories.add("201", cats::TV_HD, "TV/1080p");
        categories.add("202", cats::TV_SD, "TV/SD");
        categories.add("301", cats::AUDIO_LOSSLESS, "Music/FLAC");

        Capabilities {
            search_available: true,
            limits_default: Some(25),
            limits_max: Some(100),
            tv_search_params: vec![TvSearchParam::Q, TvSearchParam::Season, TvSearchParam::Ep],
            movie_search_params: vec![MovieSearchParam::Q],
            categories,
        }
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Resolve a scraped href against the site root
    fn absolute(&self, href: &str) -> Option<String> {
        let base = Url::parse(&self.config.base_url).ok()?;
        base.join(href).ok().map(String::from)
    }

    fn parse_row(&self, row: ElementRef) -> Option<ReleaseInfo> {
        let name_link = Selector::parse("td.name a").unwrap();
        let dl_link = Selector::parse("td.dl a").unwrap();
        let cat_link = Selector::parse("td.cat a").unwrap();
        let freeleech = Selector::parse("td.name span.freeleech").unwrap();

        let title_el = row.select(&name_link).next()?;
        let title = title_el.text().collect::<String>().trim().to_string();
        if title.is_empty() {
            return None;
        }

        let details = title_el
            .value()
            .attr("href")
            .and_then(|href| self.absolute(href));

        let publish_date = cell_text(row, "td.date")
            .and_then(|text| parse_fuzzy_date(&text))
            .unwrap_or_else(chrono::Utc::now);

        // The details URL doubles as the permanent identifier
        let guid = details.clone().unwrap_or_else(|| title.clone());

        let mut release = ReleaseInfo::new(title, guid, publish_date);
        release.details = details;

        release.link = row
            .select(&dl_link)
            .next()
            .and_then(|el| el.value().attr("href"))
            .and_then(|href| self.absolute(href));

        release.categories = row
            .select(&cat_link)
            .next()
            .and_then(|el| el.value().attr("href"))
            .and_then(|href| self.absolute(href))
            .and_then(|abs| category_token(&abs))
            .map(|token| self.config.capabilities.categories.to_canonical(&token))
            .unwrap_or_default();

        release.size = cell_text(row, "td.size").and_then(|text| parse_size(&text));
        release.seeders = cell_text(row, "td.seeders").and_then(|text| parse_count(&text));
        let leechers = cell_text(row, "td.leechers").and_then(|text| parse_count(&text));
        release.peers = match (release.seeders, leechers) {
            (Some(seeders), Some(leechers)) => Some(seeders + leechers),
            _ => None,
        };

        if row.select(&freeleech).next().is_some() {
            release.download_volume_factor = 0.0;
        }

        Some(release)
    }
}

impl SiteAdapter for DemoTracker {
    fn config(&self) -> &SiteConfig {
        &self.config
    }

    fn login_flow(&self) -> Arc<dyn LoginFlow> {
        Arc::new(FormLogin {
            site: self.config.id.clone(),
            login_url: format!("{}/takelogin.php", self.base()),
            form: vec![
                ("username".to_string(), self.username.clone()),
                ("password".to_string(), self.password.clone()),
            ],
            csrf: None,
            probe_url: Some(format!("{}/my.php", self.base())),
            success_marker: LOGGED_IN_MARKER.to_string(),
            error_selector: Some("div.error".to_string()),
            expiry: vec![
                ExpirySignal::MissingMarker(LOGGED_IN_MARKER.to_string()),
                ExpirySignal::RedirectTo("/login.php".to_string()),
            ],
        })
    }

    fn translate(&self, query: &SearchQuery) -> Vec<SearchRequest> {
        let term = term_with_episode(query);

        let url = if let Some(ref term) = term {
            let mut url = format!(
                "{}/browse.php?search={}",
                self.base(),
                urlencoding::encode(term)
            );
            let tokens = self
                .config
                .capabilities
                .categories
                .to_site_tokens(&query.categories);
            if !tokens.is_empty() {
                url.push_str(&format!(
                    "&cats={}",
                    urlencoding::encode(&tokens.join(","))
                ));
            }
            url
        } else {
            format!("{}/latest.php", self.base())
        };

        let pages = page_count(
            query.wanted_results(),
            self.config.page_size,
            self.config.max_pages,
        );

        (0..pages)
            .map(|page| {
                let separator = if url.contains('?') { "&" } else { "?" };
                SearchRequest::get(format!("{}{}page={}", url, separator, page)).with_page(page)
            })
            .collect()
    }

    fn parse(
        &self,
        response: &RawResponse,
        _query: &SearchQuery,
    ) -> Result<Vec<ReleaseInfo>, PipelineError> {
        let body = response.text();

        if body.contains(NO_RESULTS_MARKER) {
            return Ok(vec![]);
        }

        let document = Html::parse_document(&body);
        let row_selector = Selector::parse("table.torrents tr.torrent").unwrap();
        let rows: Vec<_> = document.select(&row_selector).collect();

        if rows.is_empty() {
            return Err(PipelineError::Parse {
                site: self.config.id.clone(),
                reason: "no torrent table in the response".to_string(),
                payload: body.into_owned(),
            });
        }

        let mut releases = Vec::new();
        for row in rows {
            match self.parse_row(row) {
                Some(release) => releases.push(release),
                None => debug!(site = %self.config.id, "Skipping malformed torrent row"),
            }
        }

        Ok(releases)
    }

    fn normalizer(&self) -> Normalizer {
        // The site searches descriptions too, so titles need re-checking
        Normalizer::new(self.config.id.clone(), self.config.name.clone()).with_title_filter()
    }
}

fn cell_text(row: ElementRef, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let text = row
        .select(&selector)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    if text.is_empty() { None } else { Some(text) }
}

/// Pull the `cat` query parameter out of a category link
fn category_token(absolute_url: &str) -> Option<String> {
    let url = Url::parse(absolute_url).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "cat")
        .map(|(_, value)| value.into_owned())
}

/// One row of the fixture torrent table
#[derive(Debug, Clone)]
pub struct DemoRow {
    pub id: u32,
    pub title: String,
    pub category: String,
    pub size: String,
    pub date: String,
    pub seeders: i32,
    pub leechers: i32,
    pub freeleech: bool,
}

impl DemoRow {
    pub fn new(id: u32, title: &str, category: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            category: category.to_string(),
            size: "1.4 GB".to_string(),
            date: "2025-01-18 14:30:00".to_string(),
            seeders: 12,
            leechers: 3,
            freeleech: false,
        }
    }

    pub fn with_size(mut self, size: &str) -> Self {
        self.size = size.to_string();
        self
    }

    pub fn with_peers(mut self, seeders: i32, leechers: i32) -> Self {
        self.seeders = seeders;
        self.leechers = leechers;
        self
    }

    pub fn with_date(mut self, date: &str) -> Self {
        self.date = date.to_string();
        self
    }

    pub fn freeleech(mut self) -> Self {
        self.freeleech = true;
        self
    }

    fn to_html(&self) -> String {
        let flag = if self.freeleech {
            r#" <span class="freeleech">FL</span>"#
        } else {
            ""
        };
        format!(
            r#"<tr class="torrent">
  <td class="cat"><a href="/browse.php?cat={cat}">{cat}</a></td>
  <td class="name"><a href="/details.php?id={id}">{title}</a>{flag}</td>
  <td class="dl"><a href="/download.php?id={id}">DL</a></td>
  <td class="size">{size}</td>
  <td class="date">{date}</td>
  <td class="seeders">{seeders}</td>
  <td class="leechers">{leechers}</td>
</tr>"#,
            cat = self.category,
            id = self.id,
            title = self.title,
            flag = flag,
            size = self.size,
            date = self.date,
            seeders = self.seeders,
            leechers = self.leechers,
        )
    }
}

fn page_shell(content: &str) -> String {
    format!(
        r#"<html><body>
<div class="nav"><a href="/my.php">demo</a> <a href="/logout.php">Logout</a></div>
{}
</body></html>"#,
        content
    )
}

/// A results page listing the given rows
pub fn results_page(rows: &[DemoRow]) -> String {
    let rows: String = rows.iter().map(DemoRow::to_html).collect();
    page_shell(&format!(
        r#"<table class="torrents">
<tr class="header"><td>Cat</td><td>Name</td><td>DL</td><td>Size</td><td>Added</td><td>S</td><td>L</td></tr>
{}
</table>"#,
        rows
    ))
}

/// A results page for a search that matched nothing
pub fn empty_results_page() -> String {
    page_shell(&format!("<p>{}</p>", NO_RESULTS_MARKER))
}

/// The member profile page the login probe fetches
pub fn account_page() -> String {
    page_shell("<h1>Welcome back, demo</h1>")
}

/// What the site serves once the session cookie has lapsed
pub fn logged_out_page() -> String {
    r#"<html><body><a href="/login.php">Log in</a> to continue.</body></html>"#.to_string()
}

/// The login failure page, marker absent
pub fn login_rejected_page() -> String {
    r#"<html><body><div class="error">Invalid username or password</div></body></html>"#.to_string()
}
