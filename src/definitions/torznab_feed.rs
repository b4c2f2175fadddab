//! Generic Torznab feed adapter
//!
//! Covers any Torznab/Newznab-compatible endpoint: API key in the URL, XML
//! item feeds with `torznab:attr` extensions. Works as-is against most
//! proxy and Usenet APIs and doubles as the reference implementation of the
//! [`SiteAdapter`] contract.
//!
//! # Authentication
//!
//! The API key rides in every URL, so there is no session to keep alive
//! and the default [`NoAuth`](crate::session::NoAuth) flow applies.

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::debug;

use crate::adapter::{SiteAdapter, SiteConfig};
use crate::capabilities::{Capabilities, MovieSearchParam, TvSearchParam};
use crate::categories::{CategoryMap, CategoryMapping, cats};
use crate::error::PipelineError;
use crate::executor::ExecutorConfig;
use crate::parse::parse_fuzzy_date;
use crate::query::SearchQuery;
use crate::release::ReleaseInfo;
use crate::translate::{SearchRequest, page_count, page_offset};
use crate::transport::{HttpRequest, RawResponse};

/// Adapter for Torznab/Newznab API endpoints
pub struct TorznabFeed {
    config: SiteConfig,
    api_key: String,
}

impl TorznabFeed {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        api_url: impl Into<String>,
        api_key: &str,
    ) -> Result<Self, PipelineError> {
        if api_key.is_empty() {
            return Err(PipelineError::Validation {
                reason: "Torznab feeds require an API key".to_string(),
            });
        }

        let config = SiteConfig::new(id, name, api_url)
            .with_capabilities(Self::default_capabilities())
            .with_paging(100, 5);

        Ok(Self {
            config,
            api_key: api_key.to_string(),
        })
    }

    /// Override pacing for this feed (private proxies tolerate far more
    /// than the public-tracker defaults)
    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.config = self.config.with_executor(executor);
        self
    }

    /// What a standards-following Torznab endpoint supports
    fn default_capabilities() -> Capabilities {
        Capabilities {
            search_available: true,
            limits_default: Some(100),
            limits_max: Some(100),
            tv_search_params: vec![
                TvSearchParam::Q,
                TvSearchParam::Season,
                TvSearchParam::Ep,
                TvSearchParam::ImdbId,
                TvSearchParam::TvdbId,
            ],
            movie_search_params: vec![MovieSearchParam::Q, MovieSearchParam::ImdbId],
            categories: CategoryMap::from_mappings(Self::default_categories()),
        }
    }

    /// Torznab categories are already canonical, so the map is an identity
    /// over the standard set
    fn default_categories() -> Vec<CategoryMapping> {
        vec![
            CategoryMapping::new("2000", cats::MOVIES, "Movies"),
            CategoryMapping::new("2030", cats::MOVIES_SD, "Movies/SD"),
            CategoryMapping::new("2040", cats::MOVIES_HD, "Movies/HD"),
            CategoryMapping::new("2045", cats::MOVIES_UHD, "Movies/UHD"),
            CategoryMapping::new("2050", cats::MOVIES_BLURAY, "Movies/BluRay"),
            CategoryMapping::new("5000", cats::TV, "TV"),
            CategoryMapping::new("5030", cats::TV_SD, "TV/SD"),
            CategoryMapping::new("5040", cats::TV_HD, "TV/HD"),
            CategoryMapping::new("5045", cats::TV_UHD, "TV/UHD"),
            CategoryMapping::new("5070", cats::TV_ANIME, "TV/Anime"),
            CategoryMapping::new("3000", cats::AUDIO, "Audio"),
            CategoryMapping::new("3010", cats::AUDIO_MP3, "Audio/MP3"),
            CategoryMapping::new("3040", cats::AUDIO_LOSSLESS, "Audio/Lossless"),
            CategoryMapping::new("4000", cats::PC, "PC"),
            CategoryMapping::new("4020", cats::PC_ISO, "PC/ISO"),
            CategoryMapping::new("7000", cats::BOOKS, "Books"),
            CategoryMapping::new("7020", cats::BOOKS_EBOOK, "Books/EBook"),
            CategoryMapping::new("8000", cats::OTHER, "Other"),
        ]
    }

    /// Build the API URL with query parameters
    fn build_api_url(&self, params: &[(&str, &str)]) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let mut url = format!("{}/api?apikey={}", base, self.api_key);

        for (key, value) in params {
            url.push_str(&format!("&{}={}", key, urlencoding::encode(value)));
        }

        url
    }
}

impl SiteAdapter for TorznabFeed {
    fn config(&self) -> &SiteConfig {
        &self.config
    }

    fn translate(&self, query: &SearchQuery) -> Vec<SearchRequest> {
        let mut params: Vec<(&str, String)> = vec![("t", query.kind.to_string())];

        if let Some(ref term) = query.search_term {
            if !term.trim().is_empty() {
                params.push(("q", term.clone()));
            }
        }

        if !query.categories.is_empty() {
            let cats: String = query
                .categories
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(",");
            params.push(("cat", cats));
        }

        if let Some(season) = query.season {
            params.push(("season", season.to_string()));
        }
        if let Some(ref ep) = query.episode {
            params.push(("ep", ep.clone()));
        }
        if let Some(imdb) = query.imdb_id_numeric() {
            params.push(("imdbid", imdb));
        }
        if let Some(tvdb_id) = query.tvdb_id {
            params.push(("tvdbid", tvdb_id.to_string()));
        }
        if let Some(year) = query.year {
            params.push(("year", year.to_string()));
        }

        let page_size = self.config.page_size;
        let pages = page_count(query.wanted_results(), page_size, self.config.max_pages);

        (0..pages)
            .map(|page| {
                let mut page_params = params.clone();
                page_params.push(("limit", page_size.to_string()));
                page_params.push(("offset", page_offset(page, page_size).to_string()));

                let refs: Vec<(&str, &str)> = page_params
                    .iter()
                    .map(|(k, v)| (*k, v.as_str()))
                    .collect();
                SearchRequest::get(self.build_api_url(&refs)).with_page(page)
            })
            .collect()
    }

    fn parse(
        &self,
        response: &RawResponse,
        _query: &SearchQuery,
    ) -> Result<Vec<ReleaseInfo>, PipelineError> {
        let body = response.text();

        if body.contains("<error") {
            let description = error_description(&body).unwrap_or("unknown feed error");
            // credential rejections need an operator, everything else is
            // the feed misbehaving
            if description.contains("credentials") || description.to_lowercase().contains("api key")
            {
                return Err(PipelineError::Authentication {
                    site: self.config.id.clone(),
                    reason: description.to_string(),
                });
            }
            return Err(PipelineError::Parse {
                site: self.config.id.clone(),
                reason: format!("feed error: {}", description),
                payload: body.into_owned(),
            });
        }

        if !body.contains("<rss") && !body.contains("<feed") && !body.contains("<channel") {
            return Err(PipelineError::Parse {
                site: self.config.id.clone(),
                reason: "response is not a torznab feed".to_string(),
                payload: body.into_owned(),
            });
        }

        parse_feed(&body).map_err(|reason| PipelineError::Parse {
            site: self.config.id.clone(),
            reason,
            payload: body.into_owned(),
        })
    }

    /// Torznab download links need the API key when the feed left it out
    fn download_request(&self, release: &ReleaseInfo) -> Option<HttpRequest> {
        let link = release.link.as_deref()?;
        let url = if link.contains("apikey=") {
            link.to_string()
        } else if link.contains('?') {
            format!("{}&apikey={}", link, self.api_key)
        } else {
            format!("{}?apikey={}", link, self.api_key)
        };
        Some(HttpRequest::get(url))
    }
}

/// Pull the description attribute out of a feed `<error .../>` element
fn error_description(body: &str) -> Option<&str> {
    let start = body.find("description=\"")?;
    let rest = &body[start + 13..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

/// Parse a Torznab XML feed into releases
fn parse_feed(xml: &str) -> Result<Vec<ReleaseInfo>, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut releases = Vec::new();
    let mut item: Option<FeedItem> = None;
    let mut current_tag = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "item" {
                    item = Some(FeedItem::default());
                } else if let Some(ref mut current) = item {
                    current.element(&tag, e);
                }
                current_tag = tag;
            }
            Ok(Event::Empty(ref e)) => {
                // Self-closing tags like <torznab:attr ... />
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if let Some(ref mut current) = item {
                    current.element(&tag, e);
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some(ref mut current) = item {
                    let text = e.unescape().unwrap_or_default().to_string();
                    if !text.is_empty() {
                        current.text(&current_tag, text);
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"item" {
                    if let Some(finished) = item.take() {
                        if let Some(release) = finished.build() {
                            releases.push(release);
                        }
                    }
                }
                current_tag.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "XML error at byte {}: {}",
                    reader.buffer_position(),
                    e
                ));
            }
            _ => {}
        }
    }

    Ok(releases)
}

/// One `<item>` under construction
#[derive(Default)]
struct FeedItem {
    title: Option<String>,
    guid: Option<String>,
    link: Option<String>,
    magnet_uri: Option<String>,
    info_hash: Option<String>,
    details: Option<String>,
    pub_date: Option<DateTime<Utc>>,
    description: Option<String>,
    size: Option<i64>,
    files: Option<i32>,
    grabs: Option<i32>,
    seeders: Option<i32>,
    peers: Option<i32>,
    imdb: Option<i64>,
    tvdb_id: Option<i64>,
    tmdb_id: Option<i64>,
    year: Option<i32>,
    poster: Option<String>,
    categories: Vec<i32>,
    download_volume_factor: Option<f64>,
    upload_volume_factor: Option<f64>,
    minimum_ratio: Option<f64>,
    minimum_seed_time: Option<i64>,
}

impl FeedItem {
    /// Element-level data: torznab attribute pairs and enclosures
    fn element(&mut self, tag: &str, e: &BytesStart) {
        match tag {
            "torznab:attr" | "newznab:attr" => {
                let (name, value) = attr_pair(e);
                self.attr(&name, &value);
            }
            "enclosure" => {
                for attr in e.attributes().flatten() {
                    let value = String::from_utf8_lossy(&attr.value).to_string();
                    match attr.key.as_ref() {
                        b"url" => self.link = Some(value),
                        b"length" => {
                            if let Ok(size) = value.parse::<i64>() {
                                if size > 0 {
                                    self.size = Some(size);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    /// Text content of plain RSS tags
    fn text(&mut self, tag: &str, text: String) {
        match tag {
            "title" => self.title = Some(text),
            "guid" => {
                if self.guid.is_none() {
                    self.guid = Some(text);
                }
            }
            "link" => {
                if self.link.is_none() {
                    self.link = Some(text);
                }
            }
            "comments" => self.details = Some(text),
            "pubDate" => self.pub_date = parse_fuzzy_date(&text),
            "description" => self.description = Some(text),
            "category" => {
                if let Ok(id) = text.parse::<i32>() {
                    if !self.categories.contains(&id) {
                        self.categories.push(id);
                    }
                }
            }
            "size" => {
                if self.size.is_none() {
                    self.size = text.parse().ok();
                }
            }
            _ => {}
        }
    }

    /// A torznab/newznab attribute pair
    fn attr(&mut self, name: &str, value: &str) {
        match name {
            "size" => {
                if let Ok(size) = value.parse::<i64>() {
                    self.size = Some(size);
                }
            }
            "files" => {
                if let Ok(files) = value.parse::<i32>() {
                    self.files = Some(files);
                }
            }
            "grabs" => {
                if let Ok(grabs) = value.parse::<i32>() {
                    self.grabs = Some(grabs);
                }
            }
            "seeders" => {
                if let Ok(seeders) = value.parse::<i32>() {
                    self.seeders = Some(seeders);
                }
            }
            "peers" => {
                if let Ok(peers) = value.parse::<i32>() {
                    self.peers = Some(peers);
                }
            }
            "infohash" => self.info_hash = Some(value.to_string()),
            "magneturl" => self.magnet_uri = Some(value.to_string()),
            "imdb" | "imdbid" => {
                if let Ok(id) = value.trim_start_matches("tt").parse::<i64>() {
                    self.imdb = Some(id);
                }
            }
            "tvdbid" | "tvdb" => {
                if let Ok(id) = value.parse::<i64>() {
                    self.tvdb_id = Some(id);
                }
            }
            "tmdbid" => {
                if let Ok(id) = value.parse::<i64>() {
                    self.tmdb_id = Some(id);
                }
            }
            "year" => {
                if let Ok(year) = value.parse::<i32>() {
                    self.year = Some(year);
                }
            }
            "category" => {
                if let Ok(id) = value.parse::<i32>() {
                    if !self.categories.contains(&id) {
                        self.categories.push(id);
                    }
                }
            }
            "downloadvolumefactor" => self.download_volume_factor = value.parse().ok(),
            "uploadvolumefactor" => self.upload_volume_factor = value.parse().ok(),
            "minimumratio" => self.minimum_ratio = value.parse().ok(),
            "minimumseedtime" => self.minimum_seed_time = value.parse().ok(),
            "poster" | "coverurl" => self.poster = Some(value.to_string()),
            _ => {
                debug!(attr_name = name, attr_value = value, "Unhandled torznab attribute");
            }
        }
    }

    fn build(self) -> Option<ReleaseInfo> {
        let title = self.title?;
        let guid = self.guid.unwrap_or_else(|| title.clone());
        let publish_date = self.pub_date.unwrap_or_else(Utc::now);

        let mut release = ReleaseInfo::new(title, guid, publish_date);
        release.link = self.link;
        release.magnet_uri = self.magnet_uri;
        release.info_hash = self.info_hash;
        release.details = self.details;
        release.description = self.description;
        release.categories = self.categories;
        release.size = self.size;
        release.files = self.files;
        release.grabs = self.grabs;
        release.seeders = self.seeders;
        release.peers = self.peers;
        release.imdb = self.imdb;
        release.tvdb_id = self.tvdb_id;
        release.tmdb_id = self.tmdb_id;
        release.year = self.year;
        release.poster = self.poster;
        release.download_volume_factor = self.download_volume_factor.unwrap_or(1.0);
        release.upload_volume_factor = self.upload_volume_factor.unwrap_or(1.0);
        release.minimum_ratio = self.minimum_ratio;
        release.minimum_seed_time = self.minimum_seed_time;
        Some(release)
    }
}

fn attr_pair(e: &BytesStart) -> (String, String) {
    let mut name = String::new();
    let mut value = String::new();

    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"name" => name = String::from_utf8_lossy(&attr.value).to_string(),
            b"value" => value = String::from_utf8_lossy(&attr.value).to_string(),
            _ => {}
        }
    }

    (name, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> TorznabFeed {
        TorznabFeed::new("geek", "NZBGeek", "https://api.example.com", "myapikey").unwrap()
    }

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:torznab="http://torznab.com/schemas/2015/feed">
  <channel>
    <title>Demo Feed</title>
    <item>
      <title>Ubuntu 24.04 LTS amd64</title>
      <guid>https://feed.example/details/101</guid>
      <link>https://feed.example/dl/101.torrent</link>
      <comments>https://feed.example/details/101</comments>
      <pubDate>Sat, 18 Jan 2025 14:30:00 +0000</pubDate>
      <category>4020</category>
      <size>2147483648</size>
      <torznab:attr name="seeders" value="142"/>
      <torznab:attr name="peers" value="150"/>
      <torznab:attr name="infohash" value="d1e2a3db33f00d"/>
      <torznab:attr name="downloadvolumefactor" value="0"/>
      <torznab:attr name="uploadvolumefactor" value="1"/>
    </item>
    <item>
      <title>Some Show S02E05 1080p WEB-DL</title>
      <pubDate>Fri, 17 Jan 2025 08:00:00 +0000</pubDate>
      <enclosure url="https://feed.example/dl/102.torrent" length="734003200" type="application/x-bittorrent"/>
      <torznab:attr name="category" value="5040"/>
      <torznab:attr name="tvdbid" value="371572"/>
    </item>
  </channel>
</rss>"#;

    fn xml_response(body: &str) -> RawResponse {
        RawResponse {
            status: 200,
            url: "https://api.example.com/api".to_string(),
            headers: vec![("Content-Type".to_string(), "application/xml".to_string())],
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_build_api_url() {
        let url = feed().build_api_url(&[("t", "search"), ("q", "test query")]);
        assert!(url.contains("apikey=myapikey"));
        assert!(url.contains("t=search"));
        assert!(url.contains("q=test%20query"));
    }

    #[test]
    fn test_translate_tv_search() {
        let query = SearchQuery::tv_search("The Expanse")
            .with_season_episode(2, Some("05"))
            .with_categories(vec![cats::TV, cats::TV_HD])
            .with_paging(100, 0);

        let requests = feed().translate(&query);
        assert_eq!(requests.len(), 1);

        let url = &requests[0].url;
        assert!(url.contains("t=tvsearch"));
        assert!(url.contains("q=The%20Expanse"));
        assert!(url.contains("cat=5000%2C5040"));
        assert!(url.contains("season=2"));
        assert!(url.contains("ep=05"));
        assert!(url.contains("limit=100"));
        assert!(url.contains("offset=0"));
    }

    #[test]
    fn test_translate_paginates_by_offset() {
        let query = SearchQuery::search("ubuntu").with_paging(250, 0);
        let requests = feed().translate(&query);

        assert_eq!(requests.len(), 3);
        assert!(requests[0].url.contains("offset=0"));
        assert!(requests[1].url.contains("offset=100"));
        assert!(requests[2].url.contains("offset=200"));
        assert_eq!(requests[2].page, 2);
    }

    #[test]
    fn test_parse_items_and_attributes() {
        let releases = feed()
            .parse(&xml_response(SAMPLE_FEED), &SearchQuery::browse())
            .unwrap();

        assert_eq!(releases.len(), 2);

        let first = &releases[0];
        assert_eq!(first.title, "Ubuntu 24.04 LTS amd64");
        assert_eq!(first.guid, "https://feed.example/details/101");
        assert_eq!(first.size, Some(2_147_483_648));
        assert_eq!(first.seeders, Some(142));
        assert_eq!(first.peers, Some(150));
        assert_eq!(first.categories, vec![cats::PC_ISO]);
        assert_eq!(first.info_hash.as_deref(), Some("d1e2a3db33f00d"));
        assert!(first.is_freeleech());

        let second = &releases[1];
        assert_eq!(second.link.as_deref(), Some("https://feed.example/dl/102.torrent"));
        assert_eq!(second.size, Some(734_003_200));
        assert_eq!(second.categories, vec![cats::TV_HD]);
        assert_eq!(second.tvdb_id, Some(371_572));
        // guid falls back to the title
        assert_eq!(second.guid, second.title);
    }

    #[test]
    fn test_credential_error_is_authentication() {
        let body = r#"<error code="100" description="Incorrect user credentials"/>"#;
        let err = feed()
            .parse(&xml_response(body), &SearchQuery::browse())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Authentication { .. }));
    }

    #[test]
    fn test_other_feed_error_is_parse() {
        let body = r#"<error code="201" description="Incorrect parameter"/>"#;
        let err = feed()
            .parse(&xml_response(body), &SearchQuery::browse())
            .unwrap_err();
        assert_eq!(err.stage(), "parse");
    }

    #[test]
    fn test_html_page_is_rejected() {
        let body = "<html><body>504 Gateway Time-out</body></html>";
        let err = feed()
            .parse(&xml_response(body), &SearchQuery::browse())
            .unwrap_err();
        assert_eq!(err.stage(), "parse");
    }

    #[test]
    fn test_download_request_appends_api_key() {
        let f = feed();

        let mut release = ReleaseInfo::new("A", "g", Utc::now());
        release.link = Some("https://feed.example/dl/101.torrent".to_string());
        let request = f.download_request(&release).unwrap();
        assert!(request.url.ends_with("?apikey=myapikey"));

        release.link = Some("https://feed.example/dl/101.torrent?apikey=other".to_string());
        let request = f.download_request(&release).unwrap();
        assert!(!request.url.contains("apikey=myapikey"));
    }
}
