//! Runtime configuration from environment variables

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::executor::{ExecutorConfig, RateLimitConfig, RetryConfig};

/// Pipeline-wide defaults loaded from environment variables. Per-site
/// settings start from these and may be tightened per adapter.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// User-Agent sent with every request
    pub user_agent: String,

    /// Deadline for a single request attempt, in seconds
    pub request_timeout_secs: u64,

    /// How long search results are served from cache, in seconds
    pub cache_ttl_secs: u64,

    /// Token bucket refill rate per site
    pub requests_per_second: u32,

    /// Token bucket burst capacity per site
    pub burst_size: u32,

    /// Attempts per request before giving up
    pub max_retries: u32,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            user_agent: env::var("HARPOON_USER_AGENT").unwrap_or_else(|_| default_user_agent()),

            request_timeout_secs: env::var("HARPOON_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid HARPOON_REQUEST_TIMEOUT_SECS")?,

            cache_ttl_secs: env::var("HARPOON_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("Invalid HARPOON_CACHE_TTL_SECS")?,

            requests_per_second: env::var("HARPOON_REQUESTS_PER_SECOND")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("Invalid HARPOON_REQUESTS_PER_SECOND")?,

            burst_size: env::var("HARPOON_BURST_SIZE")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("Invalid HARPOON_BURST_SIZE")?,

            max_retries: env::var("HARPOON_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("Invalid HARPOON_MAX_RETRIES")?,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Per-site executor settings derived from this config
    pub fn executor(&self) -> ExecutorConfig {
        ExecutorConfig {
            rate_limit: RateLimitConfig {
                requests_per_second: self.requests_per_second,
                burst_size: self.burst_size,
            },
            retry: RetryConfig {
                max_retries: self.max_retries,
                ..RetryConfig::default()
            },
            request_timeout: self.request_timeout(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_secs: 30,
            cache_ttl_secs: 300,
            requests_per_second: 1,
            burst_size: 3,
            max_retries: 3,
        }
    }
}

fn default_user_agent() -> String {
    concat!("harpoon/", env!("CARGO_PKG_VERSION")).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_feed_the_executor() {
        let config = PipelineConfig::default();
        let executor = config.executor();

        assert_eq!(executor.rate_limit.requests_per_second, 1);
        assert_eq!(executor.retry.max_retries, 3);
        assert_eq!(executor.request_timeout, Duration::from_secs(30));
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert!(config.user_agent.starts_with("harpoon/"));
    }
}
