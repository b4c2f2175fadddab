//! The normalized release record every adapter produces
//!
//! Whatever a site's response looks like, the pipeline hands callers
//! [`ReleaseInfo`] values. Tracker economics (volume factors, ratio and
//! seed-time obligations) ride along so download decisions can account
//! for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Information about one release found on a site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseInfo {
    /// Release title
    pub title: String,

    /// Unique identifier, stable for the same release on the same site
    /// (usually the details URL)
    pub guid: String,

    /// Download link (torrent file)
    pub link: Option<String>,

    /// Magnet URI
    pub magnet_uri: Option<String>,

    /// Info hash
    pub info_hash: Option<String>,

    /// Details page URL
    pub details: Option<String>,

    /// Publication date
    pub publish_date: DateTime<Utc>,

    /// Canonical category IDs
    pub categories: Vec<i32>,

    /// File size in bytes
    pub size: Option<i64>,

    /// Number of files in the torrent
    pub files: Option<i32>,

    /// Number of times snatched/downloaded
    pub grabs: Option<i32>,

    /// Description or tag text
    pub description: Option<String>,

    // Metadata IDs
    /// IMDB ID (numeric part)
    pub imdb: Option<i64>,
    /// TVDB ID
    pub tvdb_id: Option<i64>,
    /// TMDB ID
    pub tmdb_id: Option<i64>,
    /// Douban ID
    pub douban_id: Option<i64>,

    /// Release year
    pub year: Option<i32>,

    // Peer info
    /// Number of seeders
    pub seeders: Option<i32>,
    /// Number of peers (seeders + leechers)
    pub peers: Option<i32>,

    /// Poster/cover image URL
    pub poster: Option<String>,

    // Tracker economics
    /// Download volume factor (0 = freeleech, 1 = normal)
    pub download_volume_factor: f64,
    /// Upload volume factor (usually 1, can be 2 for double upload)
    pub upload_volume_factor: f64,
    /// Minimum share ratio the tracker requires for this release
    pub minimum_ratio: Option<f64>,
    /// Minimum seed time in seconds
    pub minimum_seed_time: Option<i64>,

    /// The site that produced this release
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
}

impl ReleaseInfo {
    /// Create a new release with minimal info
    pub fn new(
        title: impl Into<String>,
        guid: impl Into<String>,
        publish_date: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            guid: guid.into(),
            publish_date,
            link: None,
            magnet_uri: None,
            info_hash: None,
            details: None,
            categories: vec![],
            size: None,
            files: None,
            grabs: None,
            description: None,
            imdb: None,
            tvdb_id: None,
            tmdb_id: None,
            douban_id: None,
            year: None,
            seeders: None,
            peers: None,
            poster: None,
            download_volume_factor: 1.0,
            upload_volume_factor: 1.0,
            minimum_ratio: None,
            minimum_seed_time: None,
            site_id: None,
            site_name: None,
        }
    }

    /// Check if this is a freeleech release
    pub fn is_freeleech(&self) -> bool {
        self.download_volume_factor == 0.0
    }

    /// Get the number of leechers
    pub fn leechers(&self) -> Option<i32> {
        match (self.peers, self.seeders) {
            (Some(peers), Some(seeders)) => Some(peers - seeders),
            _ => None,
        }
    }

    /// Calculate a "gain" score (seeders * size in GB)
    pub fn gain(&self) -> Option<f64> {
        match (self.seeders, self.size) {
            (Some(seeders), Some(size)) => {
                let gb = size as f64 / (1024.0 * 1024.0 * 1024.0);
                Some(seeders as f64 * gb)
            }
            _ => None,
        }
    }
}

impl Default for ReleaseInfo {
    fn default() -> Self {
        Self::new(String::new(), String::new(), Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freeleech() {
        let mut release = ReleaseInfo::default();
        assert!(!release.is_freeleech());
        release.download_volume_factor = 0.0;
        assert!(release.is_freeleech());
    }

    #[test]
    fn test_leechers() {
        let mut release = ReleaseInfo::default();
        assert_eq!(release.leechers(), None);
        release.seeders = Some(10);
        release.peers = Some(14);
        assert_eq!(release.leechers(), Some(4));
    }

    #[test]
    fn test_site_attribution_skipped_when_absent() {
        let release = ReleaseInfo::new("A", "g", Utc::now());
        let json = serde_json::to_string(&release).unwrap();
        assert!(!json.contains("site_id"));
    }
}
