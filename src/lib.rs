//! Harpoon - indexer aggregation pipeline
//!
//! The shared machinery behind torrent-site adapters: category mapping,
//! query translation, cookie sessions with transparent re-login,
//! rate-limited request execution, release normalization, result caching,
//! and multi-site search orchestration. Site adapters implement
//! [`SiteAdapter`] and everything else is provided.

pub mod adapter;
pub mod cache;
pub mod capabilities;
pub mod categories;
pub mod config;
pub mod definitions;
pub mod error;
pub mod executor;
pub mod manager;
pub mod normalize;
pub mod parse;
pub mod pipeline;
pub mod query;
pub mod release;
pub mod session;
pub mod testing;
pub mod translate;
pub mod transport;

pub use adapter::{SiteAdapter, SiteConfig};
pub use cache::SearchCache;
pub use capabilities::{Capabilities, MovieSearchParam, TvSearchParam};
pub use categories::{CategoryMap, CategoryMapping, cats};
pub use config::PipelineConfig;
pub use definitions::TorznabFeed;
pub use error::{PipelineError, TransportError};
pub use executor::{ExecutorConfig, RateLimitConfig, RequestExecutor, RetryConfig};
pub use manager::{SearchManager, SiteSearchResult};
pub use normalize::{MissingCategoryPolicy, Normalizer, VolumeOverride};
pub use pipeline::{DownloadOutcome, SitePipeline};
pub use query::{QueryKind, SearchQuery};
pub use release::ReleaseInfo;
pub use session::{
    ExpirySignal, FormLogin, LoginFlow, NoAuth, SessionManager, SessionState, SessionStatus,
};
pub use translate::SearchRequest;
pub use transport::{HttpRequest, HttpTransport, RawResponse, Transport};
