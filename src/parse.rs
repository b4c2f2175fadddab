//! Tolerant field parsing for scraped values
//!
//! Sites render sizes, dates, and counters for humans, not machines.
//! These helpers accept the formats seen in the wild and return `None`
//! instead of failing the whole page over one odd cell.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static SIZE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([\d,]+(?:\.\d+)?)\s*([KMGT]?I?B)").unwrap());

/// Parse a human-readable size string (e.g., "1.5 GB", "700MiB") into bytes
pub fn parse_size(size_str: &str) -> Option<i64> {
    let caps = SIZE_PATTERN.captures(size_str.trim())?;
    let num: f64 = caps[1].replace(',', "").parse().ok()?;

    let multiplier = match caps[2].to_uppercase().as_str() {
        "B" => 1.0,
        "KB" | "KIB" => 1024.0,
        "MB" | "MIB" => 1024.0 * 1024.0,
        "GB" | "GIB" => 1024.0 * 1024.0 * 1024.0,
        "TB" | "TIB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };

    Some((num * multiplier) as i64)
}

/// Parse a count cell (e.g., "1,234") into an integer
pub fn parse_count(s: &str) -> Option<i32> {
    s.trim().replace(',', "").parse().ok()
}

/// Parse a date in any of the formats sites actually emit: RFC 822/2822
/// (feeds), ISO 8601 (JSON APIs), and relative "2 hours ago" text (HTML
/// listings). Returns `None` with a warning when nothing matches.
pub fn parse_fuzzy_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let formats = [
        "%a, %d %b %Y %H:%M:%S %z", // RFC 822
        "%Y-%m-%dT%H:%M:%S%z",      // ISO 8601
    ];

    for format in &formats {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }

    if let Some(dt) = parse_time_ago(s) {
        return Some(dt);
    }

    warn!(date_string = s, "Failed to parse date");
    None
}

/// Parse a relative time string (e.g., "2 hours ago", "3.2 weeks ago")
pub fn parse_time_ago(time_str: &str) -> Option<DateTime<Utc>> {
    let time_str = time_str.to_lowercase();
    let now = Utc::now();

    if time_str == "today" || time_str == "just now" {
        return Some(now);
    }
    if time_str == "yesterday" {
        return Some(now - chrono::Duration::days(1));
    }

    let parts: Vec<&str> = time_str.split_whitespace().collect();
    if parts.len() < 2 {
        return None;
    }

    let num: f64 = parts[0].parse().ok()?;
    let unit = parts[1];
    let seconds = if unit.starts_with("sec") {
        num
    } else if unit.starts_with("min") {
        num * 60.0
    } else if unit.starts_with("hour") {
        num * 3600.0
    } else if unit.starts_with("day") {
        num * 86_400.0
    } else if unit.starts_with("week") {
        num * 7.0 * 86_400.0
    } else if unit.starts_with("month") {
        num * 30.0 * 86_400.0
    } else if unit.starts_with("year") {
        num * 365.0 * 86_400.0
    } else {
        return None;
    };

    Some(now - chrono::Duration::seconds(seconds as i64))
}
